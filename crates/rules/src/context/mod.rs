//! One evaluation worker per (rule, cluster) pair and its firing state.
//!
//! Each tick re-reads the rule from the cache, queries the cluster's
//! datasource, turns the returned series into candidate events, and moves
//! every event through pending, firing and recovered. Only the context's own
//! worker mutates the registry; everything else reads.

mod registry;

#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vigil_cache::CacheSet;
use vigil_core::hash::{event_hash, rule_worker_hash};
use vigil_core::{format_trigger_value, parse_tag_pairs, AlertEvent, AlertRule, Clock, Stats};
use vigil_queue::EventQueue;

pub use self::registry::FiringRegistry;
use crate::datasource::{DatasourceProvider, Vector};
use crate::error::{QueryError, Result};
use crate::mute::{bg_scope_muted, is_muted};
use crate::store::EventStore;

/// Everything a context needs besides its own identity.
#[derive(Clone)]
pub struct RuleDeps {
    pub caches: CacheSet,
    pub datasources: Arc<dyn DatasourceProvider>,
    pub queue: Arc<EventQueue>,
    pub store: Arc<dyn EventStore>,
    pub clock: Arc<dyn Clock>,
    pub stats: Arc<Stats>,
}

pub struct RuleContext {
    key: String,
    hash: String,
    rule_id: i64,
    cluster: String,
    datasource_id: i64,
    interval: Duration,
    deps: RuleDeps,
    registry: RwLock<FiringRegistry>,
    quit: watch::Sender<bool>,
}

impl RuleContext {
    pub fn new(rule: &AlertRule, cluster: &str, datasource_id: i64, deps: RuleDeps) -> Self {
        let interval = rule.effective_interval();
        let (quit, _) = watch::channel(false);
        Self {
            key: format!("{}:{}", cluster, rule.id),
            hash: rule_worker_hash(rule.id, interval, &rule.prom_ql, cluster),
            rule_id: rule.id,
            cluster: cluster.to_string(),
            datasource_id,
            interval: Duration::from_secs(interval as u64),
            deps,
            registry: RwLock::new(FiringRegistry::default()),
            quit,
        }
    }

    /// `cluster:rule_id`.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Restart-sensitive identity; see [`rule_worker_hash`].
    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn rule_id(&self) -> i64 {
        self.rule_id
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Reload the events this rule still has firing from the store.
    pub async fn prepare(&self) -> Result<()> {
        let active = self.deps.store.load_active(self.rule_id, &self.cluster).await?;
        let count = active.len();
        let mut reg = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        for event in active {
            reg.fires.insert(event.hash.clone(), event);
        }
        if count > 0 {
            info!(key = %self.key, count, "restored firing events");
        }
        Ok(())
    }

    /// Spawn the evaluation worker.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let ctx = self.clone();
        let mut quit = self.quit.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ctx.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => ctx.eval().await,
                    _ = quit.changed() => {}
                }
                if *quit.borrow() {
                    debug!(key = %ctx.key, "rule context stopped");
                    break;
                }
            }
        })
    }

    /// Ask the worker to exit after its current tick.
    pub fn stop(&self) {
        self.quit.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.quit.borrow()
    }

    /// One evaluation tick.
    pub async fn eval(&self) {
        let Some(rule) = self.deps.caches.rules.get(&self.rule_id) else {
            debug!(key = %self.key, "rule gone from cache, skipping tick");
            return;
        };
        self.deps.stats.inc_rule_eval(self.rule_id);
        let now = self.deps.clock.now();

        let vectors = match self.query(&rule, now).await {
            Ok(v) => v,
            Err(e) => {
                self.deps.stats.inc_query_error(self.rule_id);
                warn!(key = %self.key, query = %rule.prom_ql, error = %e, "query failed");
                return;
            }
        };
        self.process(&rule, vectors, now);
    }

    async fn query(&self, rule: &AlertRule, now: i64) -> std::result::Result<Vec<Vector>, QueryError> {
        let ds = self
            .deps
            .datasources
            .get(&self.cluster)
            .ok_or_else(|| QueryError::NoDatasource(self.cluster.clone()))?;
        let result = ds.query(&rule.prom_ql, now).await?;
        if !result.warnings.is_empty() {
            return Err(QueryError::Warnings(result.warnings));
        }
        Ok(result.vectors)
    }

    /// Handle vectors pushed from outside the tick loop.
    pub fn handle_vectors(&self, vectors: Vec<Vector>) {
        let Some(rule) = self.deps.caches.rules.get(&self.rule_id) else {
            return;
        };
        let now = self.deps.clock.now();
        self.process(&rule, vectors, now);
    }

    fn process(&self, rule: &AlertRule, vectors: Vec<Vector>, now: i64) {
        let mut current_keys = HashSet::new();
        let mut reg = self.registry.write().unwrap_or_else(PoisonError::into_inner);

        for vector in vectors {
            if vector.value.is_nan() {
                continue;
            }
            let Some(event) = self.build_event(rule, &vector, now) else {
                continue;
            };
            current_keys.insert(event.hash.clone());

            if let Some(reason) = is_muted(rule, &event, &self.deps.caches) {
                debug!(key = %self.key, hash = %event.hash, %reason, "event muted");
                continue;
            }
            self.handle_event(&mut reg, rule, event, now);
        }

        let gone: Vec<String> = reg
            .fires
            .keys()
            .filter(|h| !current_keys.contains(*h))
            .cloned()
            .collect();
        for hash in gone {
            self.recover_single(&mut reg, rule, &hash, now);
        }
        reg.pendings.retain(|h, _| current_keys.contains(h));
    }

    /// Turn one series into a candidate event, or `None` when the target is
    /// outside the rule's business group.
    fn build_event(&self, rule: &AlertRule, vector: &Vector, now: i64) -> Option<AlertEvent> {
        let mut event = AlertEvent {
            hash: event_hash(rule.id, &vector.labels, &self.cluster),
            cluster: self.cluster.clone(),
            datasource_id: self.datasource_id,
            trigger_time: if vector.timestamp > 0 { vector.timestamp } else { now },
            trigger_value: format_trigger_value(vector.value),
            last_eval_time: now,
            ..Default::default()
        };
        event.apply_rule(rule);

        event.tags_map = vector
            .labels
            .iter()
            .filter(|(k, _)| k.as_str() != "__name__")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        event.tags_map.extend(parse_tag_pairs(&rule.append_tags));
        event.tags_map.insert("rulename".into(), rule.name.clone());
        event.sync_tags();

        if let Some(ident) = event.tags_map.get("ident").cloned() {
            if let Some(target) = self.deps.caches.targets.get(&ident) {
                event.target_note = target.note.clone();
            }
            event.target_ident = ident;
        }

        if !rule.is_target_up_query() && bg_scope_muted(rule, &event, &self.deps.caches.targets) {
            debug!(key = %self.key, ident = %event.target_ident, "target outside business group");
            return None;
        }
        Some(event)
    }

    fn handle_event(&self, reg: &mut FiringRegistry, rule: &AlertRule, event: AlertEvent, now: i64) {
        if rule.for_duration == 0 {
            self.fire_event(reg, rule, event, now);
            return;
        }

        let pending = reg
            .pendings
            .entry(event.hash.clone())
            .and_modify(|p| p.last_eval_time = event.last_eval_time)
            .or_insert_with(|| {
                let mut p = event.clone();
                p.first_trigger_time = p.trigger_time;
                p
            });

        if pending.last_eval_time - pending.first_trigger_time + rule.effective_interval()
            >= rule.for_duration
        {
            self.fire_event(reg, rule, event, now);
        }
    }

    fn fire_event(&self, reg: &mut FiringRegistry, rule: &AlertRule, mut event: AlertEvent, now: i64) {
        if !reg.fires.contains_key(&event.hash) {
            event.notify_cur_number = 1;
            event.first_trigger_time = event.trigger_time;
            event.last_sent_time = event.last_eval_time;
            reg.fires.insert(event.hash.clone(), event.clone());
            self.push(event);
            return;
        }
        let Some(stored) = reg.fires.get_mut(&event.hash) else {
            return;
        };

        stored.last_eval_time = event.last_eval_time;
        stored.trigger_value = event.trigger_value.clone();
        if rule.notify_repeat_step == 0 {
            return;
        }
        let due = now > stored.last_sent_time + rule.notify_repeat_step * 60;
        let budget = rule.notify_max_number == 0 || stored.notify_cur_number < rule.notify_max_number;
        if !(due && budget) {
            return;
        }

        stored.notify_cur_number += 1;
        stored.last_sent_time = now;
        event.id = stored.id;
        event.notify_cur_number = stored.notify_cur_number;
        event.first_trigger_time = stored.first_trigger_time;
        event.last_sent_time = now;
        self.push(event);
    }

    fn recover_single(&self, reg: &mut FiringRegistry, rule: &AlertRule, hash: &str, now: i64) {
        let Some(fired) = reg.fires.get(hash) else {
            return;
        };
        if now - fired.last_eval_time < rule.recover_duration {
            return;
        }
        let Some(mut event) = reg.fires.remove(hash) else {
            return;
        };
        reg.pendings.remove(hash);

        event.is_recovered = true;
        event.apply_rule(rule);
        event.last_eval_time = now;
        self.push(event);
    }

    fn push(&self, event: AlertEvent) {
        let hash = event.hash.clone();
        let recovered = event.is_recovered;
        if self.deps.queue.push(event) {
            self.deps.stats.inc_alert(self.rule_id);
            debug!(key = %self.key, %hash, recovered, "event queued");
        } else {
            self.deps.stats.inc_queue_dropped();
            warn!(key = %self.key, %hash, "event queue full, event dropped");
        }
    }

    /// Copy of the firing events, for inspection.
    pub fn firing(&self) -> Vec<AlertEvent> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .fires
            .values()
            .cloned()
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .pendings
            .len()
    }
}
