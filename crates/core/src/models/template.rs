use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Message template for a channel. Each field (e.g. `title`, `content`) is a
/// minijinja template rendered against the event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageTemplate {
    pub id: i64,
    pub name: String,
    /// Channel ident this template renders for.
    pub ident: String,
    pub content: BTreeMap<String, String>,
    pub update_at: i64,
}
