//! Notify-channel snapshot plus the per-channel send resources it owns.
//!
//! Every swap tears down the resources of the previous snapshot (HTTP
//! semaphores are closed, SMTP senders are told to quit) and builds fresh
//! ones for the new channel set. Sends already holding a permit or already
//! queued on an SMTP sender finish normally.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vigil_core::{NotifyChannel, RequestType};

use crate::error::Result;
use crate::snapshot::{spawn_refresher, Refreshable, SnapshotCache};
use crate::source::CacheSource;

/// One email handed to an SMTP sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
}

/// Handle to a running SMTP sender loop.
#[derive(Debug, Clone)]
pub struct SmtpHandle {
    tx: mpsc::Sender<MailMessage>,
    quit: Arc<watch::Sender<bool>>,
}

impl SmtpHandle {
    pub fn new(tx: mpsc::Sender<MailMessage>, quit: watch::Sender<bool>) -> Self {
        Self {
            tx,
            quit: Arc::new(quit),
        }
    }

    /// Queue a message; `false` when the sender has already stopped.
    pub async fn send(&self, msg: MailMessage) -> bool {
        self.tx.send(msg).await.is_ok()
    }

    /// Signal the sender loop to exit.
    pub fn close(&self) {
        self.quit.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.quit.borrow() || self.tx.is_closed()
    }
}

/// Starts the dedicated sender for an SMTP channel.
///
/// Implemented by the notify crate so the cache does not depend on any mail
/// transport.
pub trait SmtpLauncher: Send + Sync {
    fn launch(&self, channel: &NotifyChannel) -> Option<SmtpHandle>;
}

/// Launcher for deployments without email.
pub struct NoSmtp;

impl SmtpLauncher for NoSmtp {
    fn launch(&self, _channel: &NotifyChannel) -> Option<SmtpHandle> {
        None
    }
}

#[derive(Default)]
struct Resources {
    http: HashMap<i64, Arc<Semaphore>>,
    smtp: HashMap<i64, SmtpHandle>,
}

impl Resources {
    fn close(&self) {
        for sem in self.http.values() {
            sem.close();
        }
        for handle in self.smtp.values() {
            handle.close();
        }
    }
}

pub struct NotifyChannelCache {
    channels: SnapshotCache<NotifyChannel>,
    launcher: Arc<dyn SmtpLauncher>,
    resources: RwLock<Resources>,
}

impl NotifyChannelCache {
    /// Load the channels and start their send resources.
    pub async fn new(
        source: Arc<dyn CacheSource<NotifyChannel>>,
        launcher: Arc<dyn SmtpLauncher>,
    ) -> Result<Self> {
        let channels = SnapshotCache::new("notify_channels", source).await?;
        let cache = Self {
            channels,
            launcher,
            resources: RwLock::new(Resources::default()),
        };
        cache.rebuild();
        Ok(cache)
    }

    pub fn get(&self, id: i64) -> Option<Arc<NotifyChannel>> {
        self.channels.get(&id)
    }

    pub fn get_all(&self) -> Vec<Arc<NotifyChannel>> {
        self.channels.get_all()
    }

    /// Enabled channel by its ident, as referenced from rules.
    pub fn get_by_ident(&self, ident: &str) -> Option<Arc<NotifyChannel>> {
        self.channels
            .snapshot()
            .values()
            .find(|c| c.enable && c.ident == ident)
            .cloned()
    }

    /// Concurrency permits for an HTTP channel.
    pub fn http_semaphore(&self, id: i64) -> Option<Arc<Semaphore>> {
        self.resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .http
            .get(&id)
            .cloned()
    }

    pub fn smtp_sender(&self, id: i64) -> Option<SmtpHandle> {
        self.resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .smtp
            .get(&id)
            .cloned()
    }

    fn rebuild(&self) {
        let mut next = Resources::default();
        for channel in self.channels.get_all() {
            if !channel.enable {
                continue;
            }
            match channel.request_type {
                RequestType::Http => {
                    next.http
                        .insert(channel.id, Arc::new(Semaphore::new(channel.http_concurrency())));
                }
                RequestType::Smtp => match self.launcher.launch(&channel) {
                    Some(handle) => {
                        next.smtp.insert(channel.id, handle);
                    }
                    None => debug!(channel = %channel.ident, "no smtp sender started"),
                },
            }
        }

        info!(
            http = next.http.len(),
            smtp = next.smtp.len(),
            "notify channel resources rebuilt"
        );

        let old = {
            let mut guard = self.resources.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *guard, next)
        };
        old.close();
    }

    /// Close every semaphore and stop every SMTP sender.
    pub fn shutdown(&self) {
        let old = {
            let mut guard = self.resources.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        old.close();
    }

    pub fn start(self: &Arc<Self>, interval: Duration, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        spawn_refresher(self.clone(), interval, shutdown)
    }
}

#[async_trait]
impl Refreshable for NotifyChannelCache {
    fn name(&self) -> &str {
        "notify_channels"
    }

    async fn refresh(&self) -> Result<bool> {
        let swapped = self.channels.refresh().await?;
        if swapped {
            self.rebuild();
        }
        Ok(swapped)
    }
}

impl Drop for NotifyChannelCache {
    fn drop(&mut self) {
        let res = self.resources.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !res.smtp.is_empty() {
            warn!(count = res.smtp.len(), "stopping smtp senders on cache drop");
        }
        res.close();
    }
}
