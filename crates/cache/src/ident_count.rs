//! Short-lived per-identity counters (notifications per target host).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use vigil_core::Clock;

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const MAX_AGE_SECS: i64 = 120;

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    updated: i64,
}

pub struct IdentCount {
    counters: Mutex<HashMap<String, Counter>>,
    max_age_secs: i64,
    clock: Arc<dyn Clock>,
}

impl IdentCount {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            max_age_secs: MAX_AGE_SECS,
            clock,
        }
    }

    pub fn increment(&self, ident: &str) -> u64 {
        let now = self.clock.now();
        let mut map = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let c = map.entry(ident.to_string()).or_insert(Counter {
            count: 0,
            updated: now,
        });
        c.count += 1;
        c.updated = now;
        c.count
    }

    pub fn get(&self, ident: &str) -> u64 {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(ident)
            .map_or(0, |c| c.count)
    }

    /// Drop counters not touched within the max age; returns how many went.
    pub fn sweep(&self) -> usize {
        let cutoff = self.clock.now() - self.max_age_secs;
        let mut map = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let before = map.len();
        map.retain(|_, c| c.updated >= cutoff);
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn start(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = this.sweep();
                        if removed > 0 {
                            debug!(removed, "ident counters swept");
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}
