use serde::{Deserialize, Serialize};

/// Default evaluation interval when a rule leaves it at zero.
pub const DEFAULT_EVAL_INTERVAL: i64 = 10;

/// `algorithm` value for rules whose vectors are pushed by an external
/// anomaly source instead of being queried on a tick.
pub const ALGO_EXTERNAL: &str = "holtwinters";

/// Query fragment marking host-liveness rules. For these, a target that is
/// missing from the target cache means the host is down, so the bg-scope
/// restriction must not hide the alert.
pub const TARGET_UP_SENTINEL: &str = "target_up";

/// Reference from a rule to an event pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineRef {
    pub pipeline_id: i64,
    #[serde(default = "default_true")]
    pub enable: bool,
}

fn default_true() -> bool {
    true
}

/// A user-defined alert rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertRule {
    pub id: i64,
    pub group_id: i64,
    pub name: String,
    pub note: String,
    pub prod: String,
    pub algorithm: String,
    /// Datasource selector; empty or containing 0 means every datasource.
    pub datasource_ids: Vec<i64>,
    pub prom_ql: String,
    pub eval_interval: i64,
    pub for_duration: i64,
    pub recover_duration: i64,
    pub severity: i32,
    /// `key=value` strings merged into every event's tags.
    pub append_tags: Vec<String>,
    pub notify_channels: Vec<String>,
    pub notify_groups: Vec<i64>,
    /// Minutes between repeat notifications; 0 disables repeats.
    pub notify_repeat_step: i64,
    /// Max notifications per firing; 0 means unlimited.
    pub notify_max_number: i64,
    pub notify_recovered: bool,
    /// `HH:MM` start of the daily effective window.
    pub enable_stime: String,
    /// `HH:MM` end of the daily effective window.
    pub enable_etime: String,
    /// Effective weekdays, 0 = Sunday.
    pub enable_days_of_week: Vec<u8>,
    /// Only alert for targets that belong to this rule's business group.
    pub enable_in_bg: bool,
    pub disabled: bool,
    pub callbacks: Vec<String>,
    pub runbook_url: String,
    pub pipeline_configs: Vec<PipelineRef>,
    pub update_at: i64,
}

impl AlertRule {
    /// Evaluation interval with the zero default applied.
    pub fn effective_interval(&self) -> i64 {
        if self.eval_interval <= 0 {
            DEFAULT_EVAL_INTERVAL
        } else {
            self.eval_interval
        }
    }

    pub fn is_external(&self) -> bool {
        self.algorithm == ALGO_EXTERNAL
    }

    pub fn is_target_up_query(&self) -> bool {
        self.prom_ql.contains(TARGET_UP_SENTINEL)
    }

    /// Whether this rule applies to the given datasource.
    pub fn matches_datasource(&self, datasource_id: i64) -> bool {
        self.datasource_ids.is_empty()
            || self.datasource_ids.contains(&0)
            || self.datasource_ids.contains(&datasource_id)
    }

    pub fn enabled_pipelines(&self) -> impl Iterator<Item = i64> + '_ {
        self.pipeline_configs
            .iter()
            .filter(|p| p.enable)
            .map(|p| p.pipeline_id)
    }
}
