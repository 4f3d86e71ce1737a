//! Tests for rule context reconciliation.

use std::sync::Arc;

use async_trait::async_trait;
use vigil_cache::{CacheSet, CacheSources, MemorySource, NoSmtp};
use vigil_core::{AlertRule, DatasourceInfo, ManualClock, Stats};
use vigil_queue::EventQueue;

use super::Scheduler;
use crate::context::RuleDeps;
use crate::datasource::{Datasource, DatasourceProvider, QueryResult};
use crate::error::QueryError;
use crate::ring::RingRegistry;
use crate::store::MemoryEventStore;

// -- fixtures ------------------------------------------------------------

struct Silent;

#[async_trait]
impl Datasource for Silent {
    async fn query(&self, _expr: &str, _ts: i64) -> Result<QueryResult, QueryError> {
        Ok(QueryResult::default())
    }
}

struct AnyCluster;

impl DatasourceProvider for AnyCluster {
    fn get(&self, _cluster: &str) -> Option<Arc<dyn Datasource>> {
        Some(Arc::new(Silent))
    }
}

struct Fixture {
    scheduler: Scheduler,
    rules: Arc<MemorySource<AlertRule>>,
    caches: CacheSet,
    ring: Arc<RingRegistry>,
    stats: Arc<Stats>,
}

fn rule(id: i64) -> AlertRule {
    AlertRule {
        id,
        name: format!("rule {id}"),
        prom_ql: "up==0".into(),
        eval_interval: 3600,
        ..Default::default()
    }
}

async fn fixture(rules: Vec<AlertRule>) -> Fixture {
    let source = Arc::new(MemorySource::new(rules));
    let mut sources = CacheSources::empty();
    sources.rules = source.clone();
    sources.datasources = Arc::new(MemorySource::new(vec![
        DatasourceInfo { id: 1, name: "prom-a".into(), ..Default::default() },
        DatasourceInfo { id: 2, name: "prom-b".into(), ..Default::default() },
    ]));
    let caches = CacheSet::load(sources, Arc::new(NoSmtp)).await.unwrap();

    let ring = Arc::new(RingRegistry::new(50));
    ring.set_nodes("prom-a", vec!["node-1".into()]);
    ring.set_nodes("prom-b", vec!["node-1".into()]);

    let stats = Arc::new(Stats::new());
    let deps = RuleDeps {
        caches: caches.clone(),
        datasources: Arc::new(AnyCluster),
        queue: Arc::new(EventQueue::new(100)),
        store: Arc::new(MemoryEventStore::new()),
        clock: Arc::new(ManualClock::new(1_000)),
        stats: stats.clone(),
    };
    Fixture {
        scheduler: Scheduler::new(deps, ring.clone(), "node-1"),
        rules: source,
        caches,
        ring,
        stats,
    }
}

// -- sync_rules ----------------------------------------------------------

#[tokio::test]
async fn empty_rule_set_idles() {
    let f = fixture(vec![]).await;
    let report = f.scheduler.sync_rules().await;
    assert!(report.started.is_empty());
    assert_eq!(report.running, 0);
    assert_eq!(f.stats.snapshot().rule_workers, 0);
}

#[tokio::test]
async fn one_context_per_selected_cluster() {
    let only_b = AlertRule { datasource_ids: vec![2], ..rule(2) };
    let f = fixture(vec![rule(1), only_b]).await;

    let report = f.scheduler.sync_rules().await;
    assert_eq!(report.running, 3);
    assert_eq!(
        f.scheduler.running_keys(),
        vec!["prom-a:1".to_string(), "prom-b:1".into(), "prom-b:2".into()]
    );
    assert_eq!(f.stats.snapshot().rule_workers, 3);
    f.scheduler.stop_all().await;
}

#[tokio::test]
async fn unchanged_rules_are_not_restarted() {
    let f = fixture(vec![rule(1)]).await;
    f.scheduler.sync_rules().await;

    let again = f.scheduler.sync_rules().await;
    assert!(again.started.is_empty());
    assert!(again.stopped.is_empty());
    assert_eq!(again.running, 2);
    f.scheduler.stop_all().await;
}

#[tokio::test]
async fn interval_change_restarts_context() {
    let f = fixture(vec![AlertRule { datasource_ids: vec![1], ..rule(1) }]).await;
    f.scheduler.sync_rules().await;

    f.rules.set(vec![AlertRule {
        datasource_ids: vec![1],
        eval_interval: 60,
        ..rule(1)
    }]);
    f.caches.rules.refresh().await.unwrap();

    let report = f.scheduler.sync_rules().await;
    assert_eq!(report.stopped, vec!["prom-a:1".to_string()]);
    assert_eq!(report.started, vec!["prom-a:1".to_string()]);
    assert_eq!(report.running, 1);
    f.scheduler.stop_all().await;
}

#[tokio::test]
async fn notification_change_keeps_context() {
    let f = fixture(vec![AlertRule { datasource_ids: vec![1], ..rule(1) }]).await;
    f.scheduler.sync_rules().await;

    f.rules.set(vec![AlertRule {
        datasource_ids: vec![1],
        notify_channels: vec!["email".into()],
        update_at: 5,
        ..rule(1)
    }]);
    f.caches.rules.refresh().await.unwrap();

    let report = f.scheduler.sync_rules().await;
    assert!(report.started.is_empty());
    assert!(report.stopped.is_empty());
    f.scheduler.stop_all().await;
}

#[tokio::test]
async fn removed_rule_stops_context() {
    let f = fixture(vec![rule(1), rule(2)]).await;
    f.scheduler.sync_rules().await;
    assert_eq!(f.scheduler.running(), 4);

    f.rules.set(vec![rule(2)]);
    f.caches.rules.refresh().await.unwrap();

    let report = f.scheduler.sync_rules().await;
    let mut stopped = report.stopped.clone();
    stopped.sort();
    assert_eq!(stopped, vec!["prom-a:1".to_string(), "prom-b:1".into()]);
    assert_eq!(report.running, 2);
    f.scheduler.stop_all().await;
    assert_eq!(f.scheduler.running(), 0);
}

#[tokio::test]
async fn foreign_owner_is_skipped() {
    let f = fixture(vec![rule(1)]).await;
    f.ring.set_nodes("prom-a", vec!["node-2".into()]);

    let report = f.scheduler.sync_rules().await;
    assert_eq!(f.scheduler.running_keys(), vec!["prom-b:1".to_string()]);
    assert_eq!(report.running, 1);
    f.scheduler.stop_all().await;
}

#[tokio::test]
async fn unknown_cluster_has_no_owner() {
    let f = fixture(vec![rule(1)]).await;
    f.ring.rebuild(&[]);

    let report = f.scheduler.sync_rules().await;
    assert_eq!(report.running, 0);
}

#[tokio::test]
async fn external_rules_are_registered_not_ticked() {
    let external = AlertRule {
        algorithm: vigil_core::models::rule::ALGO_EXTERNAL.into(),
        datasource_ids: vec![1],
        ..rule(7)
    };
    let f = fixture(vec![external]).await;

    let report = f.scheduler.sync_rules().await;
    assert_eq!(report.running, 0);
    assert_eq!(report.external, 1);

    let ext = f.scheduler.external();
    assert!(ext.push(7, "prom-a", vec![]));
    assert!(!ext.push(7, "prom-b", vec![]));

    f.rules.set(vec![]);
    f.caches.rules.refresh().await.unwrap();
    let report = f.scheduler.sync_rules().await;
    assert_eq!(report.external, 0);
    assert!(ext.is_empty());
}
