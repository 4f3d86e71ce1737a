//! [`Scheduler`]: owns the running rule contexts of this replica.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vigil_core::hash::rule_worker_hash;

use super::external::ExternalRules;
use crate::context::{RuleContext, RuleDeps};
use crate::ring::RingRegistry;

struct Worker {
    ctx: Arc<RuleContext>,
    handle: JoinHandle<()>,
}

/// What one sync changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub started: Vec<String>,
    pub stopped: Vec<String>,
    pub running: usize,
    pub external: usize,
}

/// A context this replica should have, keyed by its worker hash.
struct Desired {
    rule: Arc<vigil_core::AlertRule>,
    cluster: String,
    datasource_id: i64,
}

pub struct Scheduler {
    deps: RuleDeps,
    ring: Arc<RingRegistry>,
    endpoint: String,
    workers: Mutex<HashMap<String, Worker>>,
    external: Arc<ExternalRules>,
}

impl Scheduler {
    pub fn new(deps: RuleDeps, ring: Arc<RingRegistry>, endpoint: impl Into<String>) -> Self {
        Self {
            deps,
            ring,
            endpoint: endpoint.into(),
            workers: Mutex::new(HashMap::new()),
            external: Arc::new(ExternalRules::new()),
        }
    }

    pub fn external(&self) -> Arc<ExternalRules> {
        self.external.clone()
    }

    fn desired(&self) -> (HashMap<String, Desired>, HashMap<String, Desired>) {
        let mut internal = HashMap::new();
        let mut external = HashMap::new();

        for rule in self.deps.caches.rules.get_all() {
            let key = rule.id.to_string();
            for ds in self.deps.caches.clusters_for_rule(&rule) {
                if !self.ring.is_hit(&ds.name, &key, &self.endpoint) {
                    continue;
                }
                let hash = rule_worker_hash(rule.id, rule.effective_interval(), &rule.prom_ql, &ds.name);
                let want = Desired {
                    rule: rule.clone(),
                    cluster: ds.name.clone(),
                    datasource_id: ds.id,
                };
                if rule.is_external() {
                    external.insert(hash, want);
                } else {
                    internal.insert(hash, want);
                }
            }
        }
        (internal, external)
    }

    /// Bring running contexts in line with the cache and the ring.
    pub async fn sync_rules(&self) -> SyncReport {
        let (internal, external) = self.desired();
        let mut report = SyncReport::default();

        // Stop workers that are no longer wanted.
        let (stale, running): (Vec<Worker>, HashSet<String>) = {
            let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
            let gone: Vec<String> = workers
                .keys()
                .filter(|h| !internal.contains_key(*h))
                .cloned()
                .collect();
            let stale = gone.iter().filter_map(|h| workers.remove(h)).collect();
            (stale, workers.keys().cloned().collect())
        };
        for w in stale {
            w.ctx.stop();
            debug!(key = %w.ctx.key(), "rule context stopping");
            report.stopped.push(w.ctx.key().to_string());
            drop(w.handle);
        }

        for (hash, want) in internal {
            if running.contains(&hash) {
                continue;
            }
            let ctx = Arc::new(RuleContext::new(
                &want.rule,
                &want.cluster,
                want.datasource_id,
                self.deps.clone(),
            ));
            if let Err(e) = ctx.prepare().await {
                // a later sync retries
                warn!(key = %ctx.key(), error = %e, "failed to restore active events");
                continue;
            }
            let handle = ctx.start();
            report.started.push(ctx.key().to_string());
            self.workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(hash, Worker { ctx, handle });
        }

        for hash in self.external.hashes() {
            if !external.contains_key(&hash) {
                if let Some(ctx) = self.external.remove(&hash) {
                    report.stopped.push(ctx.key().to_string());
                }
            }
        }
        let known: HashSet<String> = self.external.hashes().into_iter().collect();
        for (hash, want) in external {
            if known.contains(&hash) {
                continue;
            }
            let ctx = Arc::new(RuleContext::new(
                &want.rule,
                &want.cluster,
                want.datasource_id,
                self.deps.clone(),
            ));
            if let Err(e) = ctx.prepare().await {
                warn!(key = %ctx.key(), error = %e, "failed to restore active events");
                continue;
            }
            report.started.push(ctx.key().to_string());
            self.external.insert(ctx);
        }

        report.running = self.running();
        report.external = self.external.len();
        self.deps.stats.set_rule_workers(report.running);
        if !report.started.is_empty() || !report.stopped.is_empty() {
            info!(
                started = report.started.len(),
                stopped = report.stopped.len(),
                running = report.running,
                external = report.external,
                "rule contexts synced"
            );
        }
        report
    }

    pub fn running(&self) -> usize {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Keys of the running contexts, sorted.
    pub fn running_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|w| w.ctx.key().to_string())
            .collect();
        keys.sort();
        keys
    }

    /// Stop every context and wait for the workers to exit.
    pub async fn stop_all(&self) {
        let workers: Vec<Worker> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, w)| w)
            .collect();
        for w in &workers {
            w.ctx.stop();
        }
        for w in workers {
            if let Err(e) = w.handle.await {
                warn!(key = %w.ctx.key(), error = %e, "rule context task failed");
            }
        }
        self.deps.stats.set_rule_workers(0);
    }

    /// Sync loop: wait `delay` for caches to warm, then sync every `interval`.
    pub fn spawn(
        self: &Arc<Self>,
        delay: Duration,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {}
            }
            let mut ticker = tokio::time::interval(interval);
            while !*shutdown.borrow() {
                tokio::select! {
                    _ = ticker.tick() => {
                        this.sync_rules().await;
                    }
                    _ = shutdown.changed() => {}
                }
            }
            this.stop_all().await;
            info!("rule scheduler stopped");
        })
    }
}
