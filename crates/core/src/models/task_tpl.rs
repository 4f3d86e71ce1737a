use serde::{Deserialize, Serialize};

/// A remote job template referenced by `${ibex}/<id>/<host>` callbacks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskTemplate {
    pub id: i64,
    pub group_id: i64,
    pub title: String,
    pub account: String,
    pub batch: i64,
    pub tolerance: i64,
    pub timeout: i64,
    pub pause: String,
    pub script: String,
    pub args: String,
    pub update_by: String,
    pub update_at: i64,
}
