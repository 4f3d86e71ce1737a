use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::tag_filter::{prepare_all, TagFilter};

/// Rewrites or clones notifications of a rule (or of every rule when
/// `rule_id == 0`) for events whose tags match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSubscribe {
    pub id: i64,
    pub name: String,
    pub disabled: bool,
    pub group_id: i64,
    pub prod: String,
    pub datasource_ids: Vec<i64>,
    /// 0 subscribes to every rule.
    pub rule_id: i64,
    /// Only events that have been firing at least this long.
    pub for_duration: i64,
    pub tags: Vec<TagFilter>,
    pub severities: Vec<i32>,
    pub redefine_severity: bool,
    pub new_severity: i32,
    pub redefine_channels: bool,
    pub new_channels: Vec<String>,
    /// Recipients of the cloned event.
    pub user_group_ids: Vec<i64>,
    pub redefine_webhooks: bool,
    pub webhooks: Vec<String>,
    pub update_at: i64,
}

impl AlertSubscribe {
    pub fn prepare(&mut self) -> Result<()> {
        prepare_all(&mut self.tags)
    }

    pub fn matches_datasource(&self, datasource_id: i64) -> bool {
        self.datasource_ids.is_empty()
            || self.datasource_ids.contains(&0)
            || self.datasource_ids.contains(&datasource_id)
    }

    pub fn matches_severity(&self, severity: i32) -> bool {
        self.severities.is_empty() || self.severities.contains(&severity)
    }
}
