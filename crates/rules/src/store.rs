//! Persistence of fired events.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use vigil_core::AlertEvent;

use crate::error::Result;

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Currently firing events of one rule on one cluster.
    async fn load_active(&self, rule_id: i64, cluster: &str) -> Result<Vec<AlertEvent>>;

    /// Record an event. Firing events upsert the active row; recovered
    /// events clear it. Every call appends to history. Returns the row id.
    async fn persist(&self, event: &AlertEvent) -> Result<i64>;
}

/// In-process store used by tests and store-less deployments.
#[derive(Default)]
pub struct MemoryEventStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    next_id: i64,
    active: HashMap<String, AlertEvent>,
    history: Vec<AlertEvent>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_active(events: Vec<AlertEvent>) -> Self {
        let store = Self::default();
        {
            let mut inner = store.inner.lock().unwrap_or_else(PoisonError::into_inner);
            for e in events {
                inner.active.insert(e.hash.clone(), e);
            }
        }
        store
    }

    pub fn history(&self) -> Vec<AlertEvent> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .clone()
    }

    pub fn active_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .active
            .len()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn load_active(&self, rule_id: i64, cluster: &str) -> Result<Vec<AlertEvent>> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(inner
            .active
            .values()
            .filter(|e| e.rule_id == rule_id && e.cluster == cluster)
            .cloned()
            .collect())
    }

    async fn persist(&self, event: &AlertEvent) -> Result<i64> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.next_id += 1;
        let id = inner.next_id;
        let mut stored = event.clone();
        stored.id = id;
        if event.is_recovered {
            inner.active.remove(&event.hash);
        } else {
            inner.active.insert(event.hash.clone(), stored.clone());
        }
        inner.history.push(stored);
        Ok(id)
    }
}
