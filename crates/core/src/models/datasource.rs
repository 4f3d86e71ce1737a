use serde::{Deserialize, Serialize};

/// A time-series backend; `name` is the cluster a rule evaluates against.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasourceInfo {
    pub id: i64,
    pub name: String,
    pub plugin_type: String,
    pub url: String,
    pub basic_auth_user: String,
    #[serde(skip_serializing)]
    pub basic_auth_pass: String,
    pub timeout_ms: u64,
    pub disabled: bool,
    pub update_at: i64,
}
