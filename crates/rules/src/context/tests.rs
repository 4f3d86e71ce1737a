//! Tests for the rule context state machine.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use vigil_cache::{CacheSet, CacheSources, MemorySource, NoSmtp};
use vigil_core::{AlertEvent, AlertMute, AlertRule, DatasourceInfo, ManualClock, Stats, Target};
use vigil_queue::EventQueue;

use super::{RuleContext, RuleDeps};
use crate::datasource::{Datasource, DatasourceProvider, QueryResult, Vector};
use crate::error::QueryError;
use crate::store::{EventStore, MemoryEventStore};

// -- fixtures ------------------------------------------------------------

#[derive(Default)]
struct ScriptedDatasource {
    next: Mutex<Option<Result<QueryResult, String>>>,
}

impl ScriptedDatasource {
    fn returns(&self, vectors: Vec<Vector>) {
        *self.next.lock().unwrap() = Some(Ok(QueryResult {
            vectors,
            warnings: vec![],
        }));
    }

    fn fails(&self, reason: &str) {
        *self.next.lock().unwrap() = Some(Err(reason.to_string()));
    }
}

#[async_trait]
impl Datasource for ScriptedDatasource {
    async fn query(&self, _expr: &str, _ts: i64) -> Result<QueryResult, QueryError> {
        match self.next.lock().unwrap().clone() {
            Some(Ok(r)) => Ok(r),
            Some(Err(e)) => Err(QueryError::Transport(e)),
            None => Ok(QueryResult::default()),
        }
    }
}

struct OneCluster(Arc<ScriptedDatasource>);

impl DatasourceProvider for OneCluster {
    fn get(&self, cluster: &str) -> Option<Arc<dyn Datasource>> {
        (cluster == "prom").then(|| self.0.clone() as Arc<dyn Datasource>)
    }
}

struct Harness {
    ctx: Arc<RuleContext>,
    ds: Arc<ScriptedDatasource>,
    clock: Arc<ManualClock>,
    queue: Arc<EventQueue>,
    rules: Arc<MemorySource<AlertRule>>,
    caches: CacheSet,
    stats: Arc<Stats>,
}

impl Harness {
    async fn tick(&self, at: i64) -> Vec<AlertEvent> {
        self.clock.set(at);
        self.ctx.eval().await;
        self.queue.pop_batch(100)
    }
}

fn rule(id: i64) -> AlertRule {
    AlertRule {
        id,
        name: "host down".into(),
        prom_ql: "up==0".into(),
        eval_interval: 10,
        ..Default::default()
    }
}

fn host(ident: &str) -> Vector {
    let mut labels = BTreeMap::new();
    labels.insert("__name__".to_string(), "up".to_string());
    labels.insert("ident".to_string(), ident.to_string());
    Vector::new(labels, 0.0)
}

async fn harness_with(
    rule: AlertRule,
    targets: Vec<Target>,
    mutes: Vec<AlertMute>,
    store: Arc<dyn EventStore>,
    queue_cap: usize,
) -> Harness {
    let rules = Arc::new(MemorySource::new(vec![rule.clone()]));
    let mut sources = CacheSources::empty();
    sources.rules = rules.clone();
    sources.targets = Arc::new(MemorySource::new(targets));
    sources.mutes = Arc::new(MemorySource::new(mutes));
    sources.datasources = Arc::new(MemorySource::new(vec![DatasourceInfo {
        id: 3,
        name: "prom".into(),
        ..Default::default()
    }]));
    let caches = CacheSet::load(sources, Arc::new(NoSmtp)).await.unwrap();

    let ds = Arc::new(ScriptedDatasource::default());
    let clock = Arc::new(ManualClock::new(0));
    let queue = Arc::new(EventQueue::new(queue_cap));
    let stats = Arc::new(Stats::new());
    let deps = RuleDeps {
        caches: caches.clone(),
        datasources: Arc::new(OneCluster(ds.clone())),
        queue: queue.clone(),
        store,
        clock: clock.clone(),
        stats: stats.clone(),
    };
    let ctx = Arc::new(RuleContext::new(&rule, "prom", 3, deps));
    ctx.prepare().await.unwrap();
    Harness {
        ctx,
        ds,
        clock,
        queue,
        rules,
        caches,
        stats,
    }
}

async fn harness(rule: AlertRule) -> Harness {
    harness_with(rule, vec![], vec![], Arc::new(MemoryEventStore::new()), 1000).await
}

// -- seed scenarios ------------------------------------------------------

#[tokio::test]
async fn simple_fire_then_recover() {
    let h = harness(rule(1)).await;
    h.ds.returns(vec![host("h1")]);

    let pushed = h.tick(100).await;
    assert_eq!(pushed.len(), 1);
    let e = &pushed[0];
    assert!(!e.is_recovered);
    assert_eq!(e.notify_cur_number, 1);
    assert_eq!(e.first_trigger_time, 100);
    assert_eq!(e.cluster, "prom");
    assert_eq!(e.target_ident, "h1");
    assert_eq!(e.tags_map["rulename"], "host down");
    assert!(!e.tags_map.contains_key("__name__"));
    assert_eq!(e.trigger_value, "0");

    assert!(h.tick(110).await.is_empty());

    h.ds.returns(vec![]);
    let pushed = h.tick(120).await;
    assert_eq!(pushed.len(), 1);
    assert!(pushed[0].is_recovered);
    assert_eq!(pushed[0].last_eval_time, 120);
    assert!(h.ctx.firing().is_empty());
}

#[tokio::test]
async fn pending_window_delays_fire() {
    let mut r = rule(1);
    r.for_duration = 30;
    let h = harness(r).await;
    h.ds.returns(vec![host("h1")]);

    assert!(h.tick(0).await.is_empty());
    assert_eq!(h.ctx.pending_count(), 1);
    assert!(h.tick(10).await.is_empty());
    let pushed = h.tick(20).await;
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].notify_cur_number, 1);

    h.ds.returns(vec![]);
    let pushed = h.tick(30).await;
    assert_eq!(pushed.len(), 1);
    assert!(pushed[0].is_recovered);
    assert_eq!(h.ctx.pending_count(), 0);
}

#[tokio::test]
async fn recover_duration_holds_recovery() {
    let mut r = rule(1);
    r.recover_duration = 60;
    let h = harness(r).await;
    h.ds.returns(vec![host("h1")]);
    assert_eq!(h.tick(0).await.len(), 1);

    h.ds.returns(vec![]);
    assert!(h.tick(10).await.is_empty());
    assert_eq!(h.ctx.firing().len(), 1);

    let pushed = h.tick(70).await;
    assert_eq!(pushed.len(), 1);
    assert!(pushed[0].is_recovered);
}

// -- repeats -------------------------------------------------------------

#[tokio::test]
async fn repeat_step_and_max_number() {
    let mut r = rule(1);
    r.notify_repeat_step = 1;
    r.notify_max_number = 2;
    let h = harness(r).await;
    h.ds.returns(vec![host("h1")]);

    assert_eq!(h.tick(0).await[0].notify_cur_number, 1);
    assert!(h.tick(30).await.is_empty());
    // exactly one step later is not yet past it
    assert!(h.tick(60).await.is_empty());
    let pushed = h.tick(61).await;
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].notify_cur_number, 2);
    assert_eq!(pushed[0].first_trigger_time, 0);
    assert!(h.tick(500).await.is_empty());
}

#[tokio::test]
async fn unlimited_repeats_keep_spacing() {
    let mut r = rule(1);
    r.notify_repeat_step = 1;
    let h = harness(r).await;
    h.ds.returns(vec![host("h1")]);

    let mut sent = Vec::new();
    for t in (0..=400).step_by(10) {
        for e in h.tick(t).await {
            sent.push((t, e.notify_cur_number));
        }
    }
    assert!(sent.len() >= 5);
    for pair in sent.windows(2) {
        assert_eq!(pair[1].1, pair[0].1 + 1);
        assert!(pair[1].0 - pair[0].0 >= 60);
    }
}

#[tokio::test]
async fn refire_after_recovery_restarts_count() {
    let mut r = rule(1);
    r.notify_repeat_step = 1;
    r.notify_max_number = 1;
    let h = harness(r).await;
    h.ds.returns(vec![host("h1")]);
    h.tick(0).await;
    h.ds.returns(vec![]);
    h.tick(10).await;
    h.ds.returns(vec![host("h1")]);
    let pushed = h.tick(20).await;
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].notify_cur_number, 1);
    assert_eq!(pushed[0].first_trigger_time, 20);
}

// -- failure and edge handling ------------------------------------------

#[tokio::test]
async fn query_error_does_not_advance_state() {
    let h = harness(rule(1)).await;
    h.ds.returns(vec![host("h1")]);
    h.tick(0).await;

    h.ds.fails("connection refused");
    assert!(h.tick(10).await.is_empty());
    assert_eq!(h.ctx.firing().len(), 1);
    assert_eq!(h.stats.snapshot().query_errors[&1], 1);
}

#[tokio::test]
async fn nan_samples_are_dropped() {
    let h = harness(rule(1)).await;
    let mut v = host("h1");
    v.value = f64::NAN;
    h.ds.returns(vec![v]);
    assert!(h.tick(0).await.is_empty());
}

#[tokio::test]
async fn muted_event_neither_fires_nor_recovers() {
    let mute = AlertMute {
        id: 9,
        btime: 0,
        etime: 50,
        ..Default::default()
    };
    let h = harness_with(rule(1), vec![], vec![mute], Arc::new(MemoryEventStore::new()), 100).await;
    h.ds.returns(vec![host("h1")]);
    assert!(h.tick(0).await.is_empty());
    assert!(h.ctx.firing().is_empty());

    // mute window over
    assert_eq!(h.tick(60).await.len(), 1);
}

#[tokio::test]
async fn mute_keeps_firing_event_from_recovering() {
    let mute = AlertMute {
        id: 9,
        btime: 20,
        etime: 100,
        ..Default::default()
    };
    let h = harness_with(rule(1), vec![], vec![mute], Arc::new(MemoryEventStore::new()), 100).await;
    h.ds.returns(vec![host("h1")]);
    assert_eq!(h.tick(0).await.len(), 1);
    assert!(h.tick(30).await.is_empty());
    assert_eq!(h.ctx.firing().len(), 1);
}

#[tokio::test]
async fn bg_scope_skips_foreign_targets() {
    let mut r = rule(1);
    r.group_id = 1;
    r.enable_in_bg = true;
    let targets = vec![
        Target {
            ident: "mine".into(),
            group_id: 1,
            ..Default::default()
        },
        Target {
            ident: "theirs".into(),
            group_id: 2,
            ..Default::default()
        },
    ];
    let h = harness_with(r, targets, vec![], Arc::new(MemoryEventStore::new()), 100).await;
    h.ds.returns(vec![host("mine"), host("theirs"), host("unknown")]);
    let pushed = h.tick(0).await;
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].target_ident, "mine");
}

#[tokio::test]
async fn target_up_rules_alert_on_missing_targets() {
    let mut r = rule(1);
    r.group_id = 1;
    r.enable_in_bg = true;
    r.prom_ql = "target_up == 0".into();
    let h = harness(r).await;
    h.ds.returns(vec![host("vanished")]);
    assert_eq!(h.tick(0).await.len(), 1);
}

#[tokio::test]
async fn deleted_rule_stops_without_recovery() {
    let h = harness(rule(1)).await;
    h.ds.returns(vec![host("h1")]);
    h.tick(0).await;

    h.rules.set(vec![]);
    h.caches.rules.refresh().await.unwrap();
    h.ds.returns(vec![]);
    assert!(h.tick(10).await.is_empty());
    assert_eq!(h.ctx.firing().len(), 1);
}

#[tokio::test]
async fn rule_changes_apply_on_next_tick() {
    let h = harness(rule(1)).await;
    h.ds.returns(vec![host("h1")]);
    h.tick(0).await;

    let mut updated = rule(1);
    updated.severity = 1;
    updated.notify_channels = vec!["email".into()];
    h.rules.set(vec![updated]);
    h.caches.rules.refresh().await.unwrap();

    h.ds.returns(vec![]);
    let pushed = h.tick(10).await;
    assert_eq!(pushed[0].severity, 1);
    assert_eq!(pushed[0].notify_channels, vec!["email".to_string()]);
}

#[tokio::test]
async fn prepare_restores_active_events() {
    let r = rule(1);
    let first = harness(r.clone()).await;
    first.ds.returns(vec![host("h1")]);
    let fired = first.tick(0).await.remove(0);

    let store = Arc::new(MemoryEventStore::with_active(vec![fired.clone()]));
    let h = harness_with(r, vec![], vec![], store, 100).await;
    assert_eq!(h.ctx.firing().len(), 1);

    // still firing: no duplicate first notification
    h.ds.returns(vec![host("h1")]);
    assert!(h.tick(10).await.is_empty());

    h.ds.returns(vec![]);
    let pushed = h.tick(20).await;
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].hash, fired.hash);
    assert!(pushed[0].is_recovered);
}

#[tokio::test]
async fn full_queue_counts_drops() {
    let h = harness_with(rule(1), vec![], vec![], Arc::new(MemoryEventStore::new()), 1).await;
    h.ds.returns(vec![host("h1"), host("h2")]);
    h.clock.set(0);
    h.ctx.eval().await;
    assert_eq!(h.queue.len(), 1);
    assert_eq!(h.stats.snapshot().queue_dropped, 1);
}

#[tokio::test]
async fn first_pushes_match_fire_transitions() {
    let mut r = rule(1);
    r.notify_repeat_step = 1;
    let h = harness(r).await;
    let mut firsts = 0;
    let scripts: Vec<Vec<Vector>> = vec![
        vec![host("a"), host("b")],
        vec![host("a")],
        vec![host("a"), host("b"), host("c")],
        vec![],
        vec![host("c")],
    ];
    for (i, s) in scripts.into_iter().enumerate() {
        h.ds.returns(s);
        firsts += h
            .tick(i as i64 * 100)
            .await
            .iter()
            .filter(|e| !e.is_recovered && e.notify_cur_number == 1)
            .count();
    }
    // a, b, b again, c, c again
    assert_eq!(firsts, 5);
}

#[tokio::test]
async fn external_vectors_use_the_same_state() {
    let h = harness(rule(1)).await;
    h.clock.set(5);
    h.ctx.handle_vectors(vec![host("h1")]);
    assert_eq!(h.queue.pop_batch(10).len(), 1);
    h.ctx.handle_vectors(vec![]);
    assert!(h.queue.pop_batch(10)[0].is_recovered);
}
