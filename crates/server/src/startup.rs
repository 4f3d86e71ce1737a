//! Engine wiring: stores, caches, background tasks and the HTTP server.

use std::num::NonZeroUsize;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use vigil_cache::{AlertStatusCache, CacheSet, CacheSources, IdentCount};
use vigil_core::{Clock, Config, Stats, SystemClock};
use vigil_notify::{Dispatcher, DispatcherDeps, DispatcherOptions, LettreLauncher};
use vigil_pipeline::{Engine, ExecutionStore, MemoryExecutionStore, PipelineRunner, ProcessorRegistry, Recorder};
use vigil_queue::EventQueue;
use vigil_rules::{
    EventStore, HeartbeatStore, HeartbeatTask, MemoryEventStore, MemoryHeartbeatStore,
    PrometheusProvider, RingRegistry, RuleDeps, Scheduler,
};

use crate::state::AppState;
use crate::{db, pg, router};

const ALERT_STATUS_CAPACITY: usize = 100_000;

/// Backends the engine reads from and writes to.
struct Stores {
    sources: CacheSources,
    events: Arc<dyn EventStore>,
    executions: Arc<dyn ExecutionStore>,
    heartbeats: Arc<dyn HeartbeatStore>,
}

impl Stores {
    async fn build(config: &Config) -> anyhow::Result<Self> {
        if !config.postgres.is_configured() {
            warn!("PG_USERNAME not set, running on in-memory stores; nothing is persisted");
            return Ok(Self {
                sources: CacheSources::empty(),
                events: Arc::new(MemoryEventStore::new()),
                executions: Arc::new(MemoryExecutionStore::new()),
                heartbeats: Arc::new(MemoryHeartbeatStore::default()),
            });
        }

        let pool = db::connect(&config.postgres).await?;
        db::migrate(&pool).await?;
        Ok(Self {
            sources: pg::pg_sources(&pool),
            events: Arc::new(pg::PgEventStore::new(pool.clone())),
            executions: Arc::new(pg::PgExecutionStore::new(pool.clone())),
            heartbeats: Arc::new(pg::PgHeartbeatStore::new(pool)),
        })
    }
}

/// Start every component, serve HTTP on `bind` until Ctrl-C, then shut
/// down in order: producers first, then the dispatcher, then SMTP senders.
pub async fn run(config: Config, bind: String) -> anyhow::Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let stores = Stores::build(&config).await?;
    let endpoint = config.cluster.endpoint.clone();

    let caches = CacheSet::load(stores.sources, Arc::new(LettreLauncher::new(config.smtp.clone())))
        .await
        .context("initial cache load")?;
    info!(rules = caches.rules.len(), "caches loaded");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: Vec<JoinHandle<()>> = caches.start(config.alerting.cache_sync_interval(), shutdown_rx.clone());

    let stats = Arc::new(Stats::new());
    let queue = Arc::new(EventQueue::new(config.alerting.event_queue_max_size));
    let capacity = NonZeroUsize::new(ALERT_STATUS_CAPACITY).unwrap_or(NonZeroUsize::MIN);
    let alert_status = Arc::new(AlertStatusCache::new(capacity, clock.clone()));
    let ident_count = Arc::new(IdentCount::new(clock.clone()));
    tasks.push(ident_count.start(shutdown_rx.clone()));

    let ring = Arc::new(RingRegistry::new(config.cluster.virtual_nodes));
    tasks.push(
        HeartbeatTask {
            store: stores.heartbeats,
            ring: ring.clone(),
            caches: caches.clone(),
            endpoint: endpoint.clone(),
            clock: clock.clone(),
            interval: config.cluster.heartbeat_interval(),
            active_secs: config.cluster.heartbeat_active_secs,
        }
        .spawn(shutdown_rx.clone()),
    );

    let recorder = Recorder::new(stores.executions.clone(), clock.clone());
    tasks.push(recorder.spawn_retention(config.pipeline.clone(), shutdown_rx.clone()));
    let engine = Arc::new(Engine::new(ProcessorRegistry::with_builtins()).with_recorder(recorder));
    let pipelines = Arc::new(PipelineRunner::new(engine));

    let scheduler = Arc::new(Scheduler::new(
        RuleDeps {
            caches: caches.clone(),
            datasources: Arc::new(PrometheusProvider::new(caches.datasources.clone())),
            queue: queue.clone(),
            store: stores.events.clone(),
            clock: clock.clone(),
            stats: stats.clone(),
        },
        ring.clone(),
        endpoint.clone(),
    ));
    let scheduler_task = scheduler.spawn(
        config.alerting.engine_delay(),
        config.alerting.rule_sync_interval(),
        shutdown_rx.clone(),
    );

    let dispatcher = Arc::new(Dispatcher::new(
        DispatcherDeps {
            caches: caches.clone(),
            queue: queue.clone(),
            store: stores.events,
            pipelines,
            alert_status: alert_status.clone(),
            ident_count,
            stats: stats.clone(),
        },
        DispatcherOptions::from_config(&config),
    ));
    let dispatcher_task = dispatcher.spawn(shutdown_rx.clone());

    let state = Arc::new(AppState {
        endpoint: endpoint.clone(),
        stats,
        queue: queue.clone(),
        alert_status,
        caches: caches.clone(),
        ring,
        executions: stores.executions,
    });
    let app = router::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(%bind, %endpoint, "vigil listening");
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("shutting down");
    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler_task.await {
        error!(error = %e, "scheduler task failed");
    }
    queue.close();
    if let Err(e) = dispatcher_task.await {
        error!(error = %e, "dispatcher task failed");
    }
    for result in futures::future::join_all(tasks).await {
        if let Err(e) = result {
            error!(error = %e, "background task failed");
        }
    }
    caches.channels.shutdown();
    info!("shutdown complete");

    served.context("http server")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
