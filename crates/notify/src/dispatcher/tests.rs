//! Dispatcher tests against a local HTTP capture server.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::Path;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::watch;
use vigil_cache::{AlertStatusCache, CacheSet, CacheSources, IdentCount, MemorySource, NoSmtp};
use vigil_core::config::{IbexConfig, MaintainerConfig};
use vigil_core::hash::hash_to_u64;
use vigil_core::{
    AlertEvent, AlertRule, AlertSubscribe, EventPipeline, HttpRequestConfig, ManualClock,
    NotifyChannel, PipelineRef, RequestType, Stats, User, UserGroup, WorkflowNode,
};
use vigil_pipeline::{Engine, PipelineRunner, ProcessorRegistry};
use vigil_queue::EventQueue;
use vigil_rules::{EventStore, MemoryEventStore, RuleError};

use super::{Dispatcher, DispatcherDeps, DispatcherOptions};

// -- capture server --------------------------------------------------------

type Captured = Arc<Mutex<Vec<(String, serde_json::Value)>>>;

async fn capture_server() -> (String, Captured) {
    let seen: Captured = Arc::default();
    let log = seen.clone();
    let app = Router::new().route(
        "/{name}",
        post(move |Path(name): Path<String>, Json(body): Json<serde_json::Value>| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push((name, body));
                "ok"
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), seen)
}

fn names(seen: &Captured) -> Vec<String> {
    let mut out: Vec<String> = seen.lock().unwrap().iter().map(|(n, _)| n.clone()).collect();
    out.sort();
    out
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..100 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}

/// Webhook endpoint that holds each request for `hold` and records the
/// highest number open at once.
async fn slow_webhook(hold: Duration) -> (String, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let current = Arc::new(AtomicUsize::new(0));
    let max = Arc::new(AtomicUsize::new(0));
    let (cur, hi) = (current.clone(), max.clone());
    let app = Router::new().route(
        "/slow",
        post(move || {
            let (cur, hi) = (cur.clone(), hi.clone());
            async move {
                let now = cur.fetch_add(1, Ordering::SeqCst) + 1;
                hi.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(hold).await;
                cur.fetch_sub(1, Ordering::SeqCst);
                "ok"
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/slow"), current, max)
}

// -- fixtures --------------------------------------------------------------

struct FailingStore {
    calls: AtomicUsize,
}

#[async_trait]
impl EventStore for FailingStore {
    async fn load_active(&self, _rule_id: i64, _cluster: &str) -> Result<Vec<AlertEvent>, RuleError> {
        Ok(Vec::new())
    }

    async fn persist(&self, _event: &AlertEvent) -> Result<i64, RuleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(RuleError::Store("connection reset".into()))
    }
}

#[derive(Default)]
struct Setup {
    rules: Vec<AlertRule>,
    pipelines: Vec<EventPipeline>,
    subscribes: Vec<AlertSubscribe>,
    store: Option<Arc<dyn EventStore>>,
    maintainer: MaintainerConfig,
    global_webhooks: Option<Vec<String>>,
    concurrency: Option<usize>,
}

struct Fixture {
    dispatcher: Arc<Dispatcher>,
    queue: Arc<EventQueue>,
    store: Arc<MemoryEventStore>,
    alert_status: Arc<AlertStatusCache>,
    ident_count: Arc<IdentCount>,
    stats: Arc<Stats>,
    seen: Captured,
}

fn rule() -> AlertRule {
    AlertRule {
        id: 1,
        name: "cpu high".into(),
        notify_channels: vec!["hook".into()],
        notify_groups: vec![10],
        ..Default::default()
    }
}

fn event(hash: &str) -> AlertEvent {
    let mut e = AlertEvent {
        hash: hash.into(),
        rule_id: 1,
        rule_name: "cpu high".into(),
        cluster: "prom-a".into(),
        target_ident: "web-01".into(),
        notify_channels: vec!["hook".into()],
        notify_groups: vec![10],
        notify_cur_number: 1,
        trigger_time: 100,
        first_trigger_time: 100,
        last_sent_time: 100,
        ..Default::default()
    };
    e.set_tag("env", "prod");
    e
}

fn single_node(id: i64, kind: &str, config: serde_json::Value) -> EventPipeline {
    EventPipeline {
        id,
        nodes: vec![WorkflowNode {
            id: "n".into(),
            name: "n".into(),
            node_type: kind.into(),
            config,
            disabled: false,
            continue_on_fail: false,
            retry_on_fail: false,
            max_retries: 1,
            retry_interval: 1,
        }],
        ..Default::default()
    }
}

async fn fixture(setup: Setup) -> Fixture {
    let (base, seen) = capture_server().await;

    let mut sources = CacheSources::empty();
    sources.rules = Arc::new(MemorySource::new(setup.rules));
    sources.pipelines = Arc::new(MemorySource::new(setup.pipelines));
    // Subscription webhooks are written against `{base}`.
    let subscribes: Vec<AlertSubscribe> = setup
        .subscribes
        .into_iter()
        .map(|mut s| {
            s.webhooks = s.webhooks.iter().map(|w| w.replace("{base}", &base)).collect();
            s
        })
        .collect();
    sources.subscribes = Arc::new(MemorySource::new(subscribes));
    sources.channels = Arc::new(MemorySource::new(vec![NotifyChannel {
        id: 1,
        name: "Hook".into(),
        ident: "hook".into(),
        enable: true,
        request_type: RequestType::Http,
        http: Some(HttpRequestConfig {
            url: format!("{base}/channel"),
            ..Default::default()
        }),
        ..Default::default()
    }]));
    sources.users = Arc::new(MemorySource::new(vec![User {
        id: 1,
        username: "alice".into(),
        email: "alice@example.com".into(),
        ..Default::default()
    }]));
    sources.user_groups = Arc::new(MemorySource::new(vec![UserGroup {
        id: 10,
        name: "sre".into(),
        user_ids: vec![1],
        ..Default::default()
    }]));
    let caches = CacheSet::load(sources, Arc::new(NoSmtp)).await.unwrap();

    let clock = Arc::new(ManualClock::new(1_000));
    let memory = Arc::new(MemoryEventStore::new());
    let store: Arc<dyn EventStore> = setup
        .store
        .unwrap_or_else(|| memory.clone() as Arc<dyn EventStore>);
    let queue = Arc::new(EventQueue::new(100));
    let alert_status = Arc::new(AlertStatusCache::new(NonZeroUsize::new(16).unwrap(), clock.clone()));
    let ident_count = Arc::new(IdentCount::new(clock));
    let stats = Arc::new(Stats::new());
    let engine = Engine::new(ProcessorRegistry::with_builtins());

    let deps = DispatcherDeps {
        caches,
        queue: queue.clone(),
        store,
        pipelines: Arc::new(PipelineRunner::new(Arc::new(engine))),
        alert_status: alert_status.clone(),
        ident_count: ident_count.clone(),
        stats: stats.clone(),
    };
    let opts = DispatcherOptions {
        concurrency: setup.concurrency.unwrap_or(4),
        global_webhooks: setup
            .global_webhooks
            .unwrap_or_else(|| vec![format!("{base}/global")]),
        ibex: IbexConfig::default(),
        maintainer: setup.maintainer,
    };

    Fixture {
        dispatcher: Arc::new(Dispatcher::new(deps, opts)),
        queue,
        store: memory,
        alert_status,
        ident_count,
        stats,
        seen,
    }
}

// -- handle ----------------------------------------------------------------

#[tokio::test]
async fn fired_event_is_stored_and_notified() {
    let f = fixture(Setup { rules: vec![rule()], ..Default::default() }).await;

    let task = f.dispatcher.handle(event("abc123")).await.expect("notification task");
    let report = task.await.unwrap();

    assert_eq!(report.sent, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(names(&f.seen), vec!["channel".to_string(), "global".into()]);

    let seen = f.seen.lock().unwrap();
    let channel_body = &seen.iter().find(|(n, _)| n == "channel").unwrap().1;
    assert_eq!(channel_body["title"], json!("[Triggered] cpu high"));
    assert_eq!(channel_body["event"]["hash"], json!("abc123"));
    drop(seen);

    assert_eq!(f.store.history().len(), 1);
    let status = f.alert_status.get(hash_to_u64("abc123")).unwrap();
    assert_eq!(status.rule_id, 1);
    assert_eq!(status.notify_cur_number, 1);
    assert!(!status.is_recovered);
    assert_eq!(f.ident_count.get("web-01"), 1);
    assert_eq!(f.stats.snapshot().notify_total["hook"], 1);
}

#[tokio::test]
async fn recovery_without_notify_recovered_is_only_stored() {
    let f = fixture(Setup { rules: vec![rule()], ..Default::default() }).await;

    let recovered = AlertEvent { is_recovered: true, ..event("abc123") };
    assert!(f.dispatcher.handle(recovered).await.is_none());

    assert_eq!(f.store.history().len(), 1);
    assert!(f.alert_status.get(hash_to_u64("abc123")).unwrap().is_recovered);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(names(&f.seen).is_empty());
}

#[tokio::test]
async fn recovery_is_notified_when_enabled() {
    let f = fixture(Setup {
        rules: vec![AlertRule { notify_recovered: true, ..rule() }],
        ..Default::default()
    })
    .await;

    let recovered = AlertEvent { is_recovered: true, ..event("abc123") };
    let report = f.dispatcher.handle(recovered).await.unwrap().await.unwrap();
    assert_eq!(report.sent, 2);

    let seen = f.seen.lock().unwrap();
    let channel_body = &seen.iter().find(|(n, _)| n == "channel").unwrap().1;
    assert_eq!(channel_body["title"], json!("[Recovered] cpu high"));
}

#[tokio::test]
async fn missing_rule_skips_event() {
    let f = fixture(Setup::default()).await;
    assert!(f.dispatcher.handle(event("abc123")).await.is_none());
    assert!(f.store.history().is_empty());
}

#[tokio::test]
async fn dropped_event_is_neither_stored_nor_notified() {
    let f = fixture(Setup {
        rules: vec![AlertRule {
            pipeline_configs: vec![PipelineRef { pipeline_id: 5, enable: true }],
            ..rule()
        }],
        pipelines: vec![single_node(
            5,
            "event_drop",
            json!({"label_filters": [{"key": "env", "func": "==", "value": "prod"}]}),
        )],
        ..Default::default()
    })
    .await;

    assert!(f.dispatcher.handle(event("abc123")).await.is_none());
    assert!(f.store.history().is_empty());
    assert!(f.alert_status.get(hash_to_u64("abc123")).is_none());
}

#[tokio::test]
async fn pipelines_rewrite_before_persist() {
    let f = fixture(Setup {
        rules: vec![AlertRule {
            pipeline_configs: vec![
                PipelineRef { pipeline_id: 5, enable: true },
                PipelineRef { pipeline_id: 6, enable: false },
            ],
            ..rule()
        }],
        pipelines: vec![
            single_node(5, "relabel", json!({"set": {"team": "sre"}})),
            single_node(6, "relabel", json!({"set": {"team": "dba"}})),
        ],
        ..Default::default()
    })
    .await;

    f.dispatcher.handle(event("abc123")).await.unwrap().await.unwrap();
    assert_eq!(f.store.history()[0].tags_map["team"], "sre");
}

#[tokio::test]
async fn subscription_clone_uses_its_own_webhooks() {
    let f = fixture(Setup {
        rules: vec![rule()],
        subscribes: vec![AlertSubscribe {
            id: 3,
            rule_id: 1,
            redefine_channels: true,
            new_channels: vec![],
            redefine_webhooks: true,
            webhooks: vec!["{base}/sub".into()],
            ..Default::default()
        }],
        ..Default::default()
    })
    .await;

    let report = f.dispatcher.handle(event("abc123")).await.unwrap().await.unwrap();

    assert_eq!(report.sent, 3);
    assert_eq!(
        names(&f.seen),
        vec!["channel".to_string(), "global".into(), "sub".into()]
    );
}

#[tokio::test]
async fn failed_webhook_is_counted() {
    let f = fixture(Setup {
        rules: vec![rule()],
        global_webhooks: Some(vec!["http://127.0.0.1:1/unreachable".into()]),
        ..Default::default()
    })
    .await;

    let report = f.dispatcher.handle(event("abc123")).await.unwrap().await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(report.failed, 1);
    let stats = f.stats.snapshot();
    assert_eq!(stats.notify_total["webhook"], 1);
    assert_eq!(stats.notify_errors["webhook"], 1);
}

#[tokio::test]
async fn persist_failure_is_reported_to_maintainers() {
    let failing = Arc::new(FailingStore { calls: AtomicUsize::new(0) });
    let f = fixture(Setup {
        rules: vec![rule()],
        store: Some(failing.clone()),
        maintainer: MaintainerConfig { group_id: Some(10), channels: vec!["hook".into()] },
        ..Default::default()
    })
    .await;

    let report = f.dispatcher.handle(event("abc123")).await.unwrap().await.unwrap();
    assert_eq!(report.sent, 2, "the alert itself still goes out");
    assert_eq!(failing.calls.load(Ordering::SeqCst), 1);

    let seen = f.seen.clone();
    wait_until(|| {
        seen.lock()
            .unwrap()
            .iter()
            .any(|(n, b)| n == "channel" && b["title"].as_str().is_some_and(|t| t.starts_with("[vigil] failed to persist")))
    })
    .await;
}

#[tokio::test]
async fn notifications_in_flight_are_bounded() {
    let (url, current, max) = slow_webhook(Duration::from_millis(100)).await;
    let f = fixture(Setup {
        rules: vec![rule()],
        global_webhooks: Some(vec![url]),
        concurrency: Some(2),
        ..Default::default()
    })
    .await;

    let mut tasks = Vec::new();
    for i in 0..8 {
        tasks.push(f.dispatcher.handle(event(&format!("h{i}"))).await.unwrap());
    }
    for task in tasks {
        let report = task.await.unwrap();
        assert_eq!(report.failed, 0);
    }

    assert_eq!(current.load(Ordering::SeqCst), 0);
    assert_eq!(max.load(Ordering::SeqCst), 2);
    assert_eq!(f.stats.snapshot().notify_total["webhook"], 8);
}

// -- consumer loop ---------------------------------------------------------

#[tokio::test]
async fn consumer_drains_queue_until_shutdown() {
    let f = fixture(Setup { rules: vec![rule()], ..Default::default() }).await;
    let (tx, rx) = watch::channel(false);
    let handle = f.dispatcher.spawn(rx);

    for hash in ["a1", "b2", "c3"] {
        assert!(f.queue.push(event(hash)));
    }
    let store = f.store.clone();
    wait_until(|| store.history().len() == 3).await;
    let seen = f.seen.clone();
    wait_until(|| seen.lock().unwrap().len() == 6).await;

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("dispatcher stops")
        .unwrap();
    assert_eq!(f.stats.snapshot().notify_total["hook"], 3);
}
