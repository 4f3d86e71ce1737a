use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::tag_filter::{prepare_all, TagFilter};

/// How a mute decides whether it is currently in effect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MuteTimeType {
    /// Effective inside `[btime, etime]`.
    #[default]
    TimeRange,
    /// Effective inside any of the daily `periodic_mutes` windows.
    Periodic,
}

/// A recurring daily window for periodic mutes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodicMute {
    pub enable_stime: String,
    pub enable_etime: String,
    /// Space separated weekdays, e.g. `"1 2 3 4 5"`.
    pub enable_days_of_week: String,
}

/// A user-defined suppression rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertMute {
    pub id: i64,
    pub group_id: i64,
    pub prod: String,
    pub cause: String,
    /// Empty or containing 0 means every datasource.
    pub datasource_ids: Vec<i64>,
    pub tags: Vec<TagFilter>,
    pub btime: i64,
    pub etime: i64,
    pub disabled: bool,
    pub mute_time_type: MuteTimeType,
    pub periodic_mutes: Vec<PeriodicMute>,
    /// Empty means every severity.
    pub severities: Vec<i32>,
    pub update_at: i64,
}

impl AlertMute {
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
