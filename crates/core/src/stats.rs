//! In-process alerting counters, exposed on the stats endpoint.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    /// Evaluator ticks per rule id.
    pub rule_evals: HashMap<i64, u64>,
    /// Datasource query failures per rule id.
    pub query_errors: HashMap<i64, u64>,
    /// Events pushed to the queue per rule id.
    pub alerts: HashMap<i64, u64>,
    /// Notification attempts per channel ident.
    pub notify_total: HashMap<String, u64>,
    /// Failed notification attempts per channel ident.
    pub notify_errors: HashMap<String, u64>,
    /// Events rejected by a full queue.
    pub queue_dropped: u64,
    /// Last observed queue length.
    pub queue_size: usize,
    /// Running rule contexts on this replica.
    pub rule_workers: usize,
}

/// Thread-safe counter registry shared by every component.
#[derive(Debug, Default)]
pub struct Stats {
    inner: Mutex<StatsSnapshot>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<F: FnOnce(&mut StatsSnapshot)>(&self, f: F) {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
    }

    pub fn inc_rule_eval(&self, rule_id: i64) {
        self.with(|s| *s.rule_evals.entry(rule_id).or_default() += 1);
    }

    pub fn inc_query_error(&self, rule_id: i64) {
        self.with(|s| *s.query_errors.entry(rule_id).or_default() += 1);
    }

    pub fn inc_alert(&self, rule_id: i64) {
        self.with(|s| *s.alerts.entry(rule_id).or_default() += 1);
    }

    pub fn record_notify(&self, channel: &str, success: bool) {
        self.with(|s| {
            *s.notify_total.entry(channel.to_string()).or_default() += 1;
            if !success {
                *s.notify_errors.entry(channel.to_string()).or_default() += 1;
            }
        });
    }

    pub fn inc_queue_dropped(&self) {
        self.with(|s| s.queue_dropped += 1);
    }

    pub fn set_queue_size(&self, size: usize) {
        self.with(|s| s.queue_size = size);
    }

    pub fn set_rule_workers(&self, n: usize) {
        self.with(|s| s.rule_workers = n);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
