use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::rule::AlertRule;

/// An alert event, from candidate through firing to recovery.
///
/// `hash` is the deduplication key for the whole lifecycle. The rule fields
/// are a snapshot taken when the event was built (and refreshed on recovery).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertEvent {
    /// Persisted row id, 0 until stored.
    pub id: i64,
    pub hash: String,
    pub cluster: String,
    pub datasource_id: i64,
    pub group_id: i64,
    pub group_name: String,
    pub target_ident: String,
    pub target_note: String,
    pub tags_map: BTreeMap<String, String>,
    /// `key=value` pairs sorted by key.
    pub tags: Vec<String>,
    pub annotations: BTreeMap<String, String>,
    pub trigger_time: i64,
    pub trigger_value: String,
    pub first_trigger_time: i64,
    pub last_eval_time: i64,
    pub last_sent_time: i64,
    pub notify_cur_number: i64,
    pub is_recovered: bool,

    // rule snapshot
    pub rule_id: i64,
    pub rule_name: String,
    pub rule_note: String,
    pub rule_prod: String,
    pub rule_algo: String,
    pub severity: i32,
    pub prom_ql: String,
    pub prom_eval_interval: i64,
    pub prom_for_duration: i64,
    pub recover_duration: i64,
    pub notify_channels: Vec<String>,
    pub notify_groups: Vec<i64>,
    pub notify_repeat_step: i64,
    pub notify_max_number: i64,
    pub notify_recovered: bool,
    pub callbacks: Vec<String>,
    pub runbook_url: String,
    /// Webhooks replacing the global ones, set by subscriptions.
    pub webhooks: Vec<String>,

    /// Set on subscription clones so they are not rewritten again.
    #[serde(skip)]
    pub is_subscribe: bool,
}

impl AlertEvent {
    /// Copy the current definition of `rule` onto the event.
    pub fn apply_rule(&mut self, rule: &AlertRule) {
        self.rule_id = rule.id;
        self.rule_name = rule.name.clone();
        self.rule_note = rule.note.clone();
        self.rule_prod = rule.prod.clone();
        self.rule_algo = rule.algorithm.clone();
        self.group_id = rule.group_id;
        self.severity = rule.severity;
        self.prom_ql = rule.prom_ql.clone();
        self.prom_eval_interval = rule.effective_interval();
        self.prom_for_duration = rule.for_duration;
        self.recover_duration = rule.recover_duration;
        self.notify_channels = rule.notify_channels.clone();
        self.notify_groups = rule.notify_groups.clone();
        self.notify_repeat_step = rule.notify_repeat_step;
        self.notify_max_number = rule.notify_max_number;
        self.notify_recovered = rule.notify_recovered;
        self.callbacks = rule.callbacks.clone();
        self.runbook_url = rule.runbook_url.clone();
    }

    /// Rebuild the sorted `tags` list from `tags_map`.
    pub fn sync_tags(&mut self) {
        self.tags = self
            .tags_map
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
    }

    /// Insert a tag and keep `tags` in step.
    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags_map.insert(key.into(), value.into());
        self.sync_tags();
    }

    pub fn remove_tag(&mut self, key: &str) -> Option<String> {
        let old = self.tags_map.remove(key);
        if old.is_some() {
            self.sync_tags();
        }
        old
    }

    /// `"Triggered"` or `"Recovered"`, used in templates and logs.
    pub fn status_label(&self) -> &'static str {
        if self.is_recovered {
            "Recovered"
        } else {
            "Triggered"
        }
    }
}

/// Render a sample value: five decimals, trailing zeros and dot trimmed.
pub fn format_trigger_value(value: f64) -> String {
    let s = format!("{value:.5}");
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    }
}

/// Split `key=value` strings into a map, skipping malformed entries.
pub fn parse_tag_pairs<'a>(pairs: impl IntoIterator<Item = &'a String>) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .filter_map(|pair| {
            let (k, v) = pair.trim().split_once('=')?;
            let k = k.trim();
            if k.is_empty() {
                return None;
            }
            Some((k.to_string(), v.trim().to_string()))
        })
        .collect()
}
