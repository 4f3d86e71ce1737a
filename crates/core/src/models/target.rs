use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A monitored host or service, keyed by `ident`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Target {
    pub ident: String,
    pub group_id: i64,
    pub note: String,
    pub tags_map: BTreeMap<String, String>,
    pub update_at: i64,
}
