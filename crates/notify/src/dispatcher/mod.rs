//! The dispatcher consumes the event queue and owns everything between a
//! fired event and its notifications.
//!
//! Per event: run the rule's pipelines, persist, record the alert status,
//! then (unless it is an unwanted recovery) notify on a pooled task. A
//! notification renders every template once, routes, and sends to
//! channels, webhooks and callbacks concurrently. Failures are logged and
//! counted; nothing is retried at this level.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vigil_cache::{AlertStatus, AlertStatusCache, CacheSet, IdentCount};
use vigil_core::config::{Config, IbexConfig, MaintainerConfig};
use vigil_core::hash::hash_to_u64;
use vigil_core::{AlertEvent, EventPipeline, Stats, User};
use vigil_pipeline::PipelineRunner;
use vigil_queue::{EventQueue, DEFAULT_POP_BATCH};
use vigil_rules::EventStore;

use crate::callback::CallbackSender;
use crate::http::HttpSender;
use crate::maintainer::MaintainerNotifier;
use crate::router::RoutePlan;
use crate::sender::{ChannelSender, Delivery};
use crate::subscribe::subscribed_events;
use crate::templating::TemplateRenderer;

#[cfg(test)]
mod tests;

const WEBHOOK_ATTEMPTS: u32 = 3;
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared components the dispatcher reads and writes.
#[derive(Clone)]
pub struct DispatcherDeps {
    pub caches: CacheSet,
    pub queue: Arc<EventQueue>,
    pub store: Arc<dyn EventStore>,
    pub pipelines: Arc<PipelineRunner>,
    pub alert_status: Arc<AlertStatusCache>,
    pub ident_count: Arc<IdentCount>,
    pub stats: Arc<Stats>,
}

#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    /// Notifications in flight at once.
    pub concurrency: usize,
    pub global_webhooks: Vec<String>,
    pub ibex: IbexConfig,
    pub maintainer: MaintainerConfig,
}

impl DispatcherOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            concurrency: cfg.alerting.notify_concurrency,
            global_webhooks: cfg.alerting.global_webhooks.clone(),
            ibex: cfg.ibex.clone(),
            maintainer: cfg.maintainer.clone(),
        }
    }
}

/// Outcome of notifying one event (subscription clones included).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyReport {
    pub sent: usize,
    pub failed: usize,
}

impl NotifyReport {
    fn add(&mut self, ok: bool) {
        if ok {
            self.sent += 1;
        } else {
            self.failed += 1;
        }
    }

    fn merge(&mut self, other: NotifyReport) {
        self.sent += other.sent;
        self.failed += other.failed;
    }
}

pub struct Dispatcher {
    deps: DispatcherDeps,
    plan: RoutePlan,
    renderer: TemplateRenderer,
    sender: ChannelSender,
    callbacks: CallbackSender,
    maintainer: MaintainerNotifier,
    permits: Arc<Semaphore>,
    concurrency: usize,
}

impl Dispatcher {
    pub fn new(deps: DispatcherDeps, opts: DispatcherOptions) -> Self {
        let http = HttpSender::new();
        let sender = ChannelSender::new(http.clone());
        let concurrency = opts.concurrency.max(1);
        Self {
            plan: RoutePlan::standard(opts.global_webhooks),
            renderer: TemplateRenderer::new(),
            callbacks: CallbackSender::new(http, opts.ibex),
            maintainer: MaintainerNotifier::new(opts.maintainer, sender.clone()),
            sender,
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            deps,
        }
    }

    /// Replace the routing plan, e.g. to add interceptors.
    pub fn with_plan(mut self, plan: RoutePlan) -> Self {
        self.plan = plan;
        self
    }

    fn rule_pipelines(&self, rule: &vigil_core::AlertRule) -> Vec<Arc<EventPipeline>> {
        rule.enabled_pipelines()
            .filter_map(|id| {
                let p = self.deps.caches.pipelines.get(&id);
                if p.is_none() {
                    debug!(rule_id = rule.id, pipeline_id = id, "pipeline not found");
                }
                p
            })
            .collect()
    }

    /// Process one event from the queue. Returns the notification task
    /// when one was started.
    pub async fn handle(self: &Arc<Self>, event: AlertEvent) -> Option<JoinHandle<NotifyReport>> {
        let Some(rule) = self.deps.caches.rules.get(&event.rule_id) else {
            debug!(rule_id = event.rule_id, hash = %event.hash, "rule gone, event skipped");
            return None;
        };

        let pipelines = self.rule_pipelines(&rule);
        let mut event = if pipelines.is_empty() {
            event
        } else {
            self.deps.pipelines.run(&pipelines, event).await?
        };

        match self.deps.store.persist(&event).await {
            Ok(id) => event.id = id,
            Err(e) => {
                warn!(rule_id = event.rule_id, hash = %event.hash, error = %e, "failed to persist event");
                self.report_persist_failure(&event, &e.to_string());
            }
        }

        let status = AlertStatus {
            rule_id: event.rule_id,
            is_recovered: event.is_recovered,
            notify_cur_number: event.notify_cur_number,
            last_sent_time: event.last_sent_time,
        };
        if !self.deps.alert_status.put(hash_to_u64(&event.hash), status) {
            warn!(hash = %event.hash, "alert status cache full, status not recorded");
        }

        if event.is_recovered && !rule.notify_recovered {
            debug!(rule_id = rule.id, hash = %event.hash, "recovery notifications off");
            return None;
        }

        let permit = match self.permits.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => {
                warn!(hash = %event.hash, "dispatcher closed, notification dropped");
                return None;
            }
        };
        let this = self.clone();
        Some(tokio::spawn(async move {
            let report = this.notify(&event).await;
            drop(permit);
            report
        }))
    }

    fn report_persist_failure(self: &Arc<Self>, event: &AlertEvent, error: &str) {
        if !self.maintainer.is_configured() {
            return;
        }
        let title = format!("[vigil] failed to persist alert event of rule {}", event.rule_id);
        let content = format!(
            "rule: {} ({})\nhash: {}\ncluster: {}\nerror: {error}",
            event.rule_name, event.rule_id, event.hash, event.cluster
        );
        let this = self.clone();
        tokio::spawn(async move {
            this.maintainer.notify(&this.deps.caches, &title, &content).await;
        });
    }

    /// Notify `event` and then the clones its subscriptions produce.
    pub async fn notify(&self, event: &AlertEvent) -> NotifyReport {
        let mut report = self.notify_one(event).await;
        for clone in subscribed_events(&self.deps.caches, event) {
            report.merge(self.notify_one(&clone).await);
        }
        report
    }

    async fn notify_one(&self, event: &AlertEvent) -> NotifyReport {
        let started = Instant::now();
        let caches = &self.deps.caches;
        let rendered = self.renderer.render_all(&caches.templates.get_all(), event);
        let target = self.plan.route(event, caches);

        let rendered = &rendered;
        let channel_sends = target.channels().into_iter().filter_map(|ident| {
            let Some(channel) = caches.channels.get_by_ident(&ident) else {
                warn!(channel = %ident, rule_id = event.rule_id, "notify channel not found or disabled");
                return None;
            };
            let users: Vec<Arc<User>> = target
                .channel_users(&ident)
                .iter()
                .filter_map(|id| caches.users.get(id))
                .collect();
            Some(async move {
                let fields = rendered.for_channel(&ident);
                let res = self.sender.send(caches, &channel, Some(event), fields, &users).await;
                (ident, res)
            })
        });
        let webhook_sends = target.webhooks().iter().map(|url| async move {
            let res = self
                .sender
                .http()
                .post_json(url, event, WEBHOOK_ATTEMPTS, WEBHOOK_TIMEOUT)
                .await;
            (url, res)
        });
        let callback_sends = target.callbacks().iter().map(|url| async move {
            (url, self.callbacks.send(url, event, caches).await)
        });

        let (channels, webhooks, callbacks) = tokio::join!(
            join_all(channel_sends),
            join_all(webhook_sends),
            join_all(callback_sends)
        );

        let mut report = NotifyReport::default();
        for (ident, res) in channels {
            match res {
                Ok(Delivery::Sent) => {
                    self.deps.stats.record_notify(&ident, true);
                    report.add(true);
                }
                Ok(Delivery::NoRecipients) => {}
                Err(e) => {
                    warn!(channel = %ident, hash = %event.hash, error = %e, "channel send failed");
                    self.deps.stats.record_notify(&ident, false);
                    report.add(false);
                }
            }
        }
        for (url, res) in webhooks {
            if let Err(e) = &res {
                warn!(url = %url, hash = %event.hash, error = %e, "webhook send failed");
            }
            self.deps.stats.record_notify("webhook", res.is_ok());
            report.add(res.is_ok());
        }
        for (url, res) in callbacks {
            if let Err(e) = &res {
                warn!(callback = %url, hash = %event.hash, error = %e, "callback failed");
            }
            self.deps.stats.record_notify("callback", res.is_ok());
            report.add(res.is_ok());
        }

        if report.sent > 0 && !event.target_ident.is_empty() {
            self.deps.ident_count.increment(&event.target_ident);
        }
        debug!(
            rule_id = event.rule_id,
            hash = %event.hash,
            subscribe = event.is_subscribe,
            sent = report.sent,
            failed = report.failed,
            duration_ms = started.elapsed().as_millis() as u64,
            "event notified"
        );
        report
    }

    /// Consumer loop. On shutdown the current batch is finished and
    /// in-flight notifications are awaited.
    pub fn spawn(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            info!(concurrency = this.concurrency, "dispatcher started");
            loop {
                let batch = this.deps.queue.recv_batch(DEFAULT_POP_BATCH, &mut shutdown).await;
                this.deps.stats.set_queue_size(this.deps.queue.len());
                if batch.is_empty() {
                    break;
                }
                for event in batch {
                    this.handle(event).await;
                }
                if *shutdown.borrow() {
                    break;
                }
            }
            let in_flight = u32::try_from(this.concurrency).unwrap_or(u32::MAX);
            if let Ok(all) = this.permits.acquire_many(in_flight).await {
                drop(all);
            }
            info!(pending = this.deps.queue.len(), "dispatcher stopped");
        })
    }
}
