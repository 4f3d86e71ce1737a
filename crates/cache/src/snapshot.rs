//! Read-mostly snapshot of a backing table, refreshed by polling.
//!
//! Refresh protocol: read [`CacheSource::statistics`]; when the
//! `(total, last_updated)` pair differs from the last successful load, call
//! [`CacheSource::load_all`], rebuild the keyed map, and swap it in under a
//! short write lock. Readers clone an `Arc` to the current map and never hold
//! the lock across a lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vigil_core::CacheItem;

use crate::error::{CacheError, Result};
use crate::source::{CacheSource, Statistics};

type Map<T> = HashMap<<T as CacheItem>::Key, Arc<T>>;

/// Anything with a periodic refresh step.
#[async_trait]
pub trait Refreshable: Send + Sync {
    fn name(&self) -> &str;

    /// Returns `true` when a new snapshot was swapped in.
    async fn refresh(&self) -> Result<bool>;
}

pub struct SnapshotCache<T: CacheItem> {
    name: String,
    source: Arc<dyn CacheSource<T>>,
    data: RwLock<Arc<Map<T>>>,
    last_stats: Mutex<Option<Statistics>>,
}

impl<T: CacheItem> SnapshotCache<T> {
    /// Build the cache and perform the initial load.
    ///
    /// # Errors
    ///
    /// Returns the statistics or load error; callers treat this as fatal.
    pub async fn new(name: impl Into<String>, source: Arc<dyn CacheSource<T>>) -> Result<Self> {
        let cache = Self {
            name: name.into(),
            source,
            data: RwLock::new(Arc::new(HashMap::new())),
            last_stats: Mutex::new(None),
        };
        cache.refresh().await?;
        Ok(cache)
    }

    pub fn get(&self, key: &T::Key) -> Option<Arc<T>> {
        self.snapshot().get(key).cloned()
    }

    pub fn get_all(&self) -> Vec<Arc<T>> {
        self.snapshot().values().cloned().collect()
    }

    /// The current map; stays valid (but stale) across later swaps.
    pub fn snapshot(&self) -> Arc<Map<T>> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Spawn this cache's background refresher.
    pub fn start(self: &Arc<Self>, interval: Duration, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        spawn_refresher(self.clone(), interval, shutdown)
    }

    /// Last statistics pair a load succeeded for.
    pub fn last_statistics(&self) -> Option<Statistics> {
        *self.last_stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Probe the source and swap in a new snapshot if it changed.
    ///
    /// Returns `true` when a swap happened. On error the previous snapshot
    /// stays in place.
    pub async fn refresh(&self) -> Result<bool> {
        let stats = self.source.statistics().await.map_err(|e| CacheError::Statistics {
            cache: self.name.clone(),
            reason: e.to_string(),
        })?;

        if self.last_statistics() == Some(stats) {
            debug!(cache = %self.name, "statistics unchanged, skipping reload");
            return Ok(false);
        }

        let start = Instant::now();
        let items = self.source.load_all().await.map_err(|e| CacheError::Load {
            cache: self.name.clone(),
            reason: e.to_string(),
        })?;

        let map = self.build_map(items);
        let count = map.len();
        *self.data.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(map);
        *self.last_stats.lock().unwrap_or_else(PoisonError::into_inner) = Some(stats);

        info!(
            cache = %self.name,
            count,
            total = stats.total,
            last_updated = stats.last_updated,
            duration_ms = start.elapsed().as_millis() as u64,
            "cache snapshot reloaded"
        );
        Ok(true)
    }

    fn build_map(&self, items: Vec<T>) -> Map<T> {
        let mut map = HashMap::with_capacity(items.len());
        for mut item in items {
            if let Err(e) = item.prepare() {
                warn!(cache = %self.name, key = ?item.cache_key(), error = %e, "skipping invalid item");
                continue;
            }
            map.insert(item.cache_key(), Arc::new(item));
        }
        map
    }
}

#[async_trait]
impl<T: CacheItem> Refreshable for SnapshotCache<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn refresh(&self) -> Result<bool> {
        SnapshotCache::refresh(self).await
    }
}

/// Spawn the background refresher for a cache.
///
/// Refresh errors are logged and the previous snapshot stays in place.
pub fn spawn_refresher(
    cache: Arc<dyn Refreshable>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick fires immediately and the initial load already ran
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = cache.refresh().await {
                        warn!(cache = cache.name(), error = %e, "cache refresh failed, keeping previous snapshot");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!(cache = cache.name(), "cache refresher stopped");
                        break;
                    }
                }
            }
        }
    })
}
