//! Consistent hash ring over live replicas, rebuilt from heartbeats.
//!
//! Every replica upserts `{endpoint, cluster, clock}` rows on a fixed
//! interval. An endpoint is active while its newest beat is younger than the
//! active window. One ring is kept per datasource cluster; a rule is owned by
//! the endpoint the cluster's ring maps `rule.id` to.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vigil_cache::CacheSet;
use vigil_core::hash::{hash_to_u64, md5_hex};
use vigil_core::Clock;

use crate::error::Result;

pub const DEFAULT_VIRTUAL_NODES: usize = 500;

/// A single heartbeat row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    pub endpoint: String,
    pub cluster: String,
    pub clock: i64,
}

/// Shared heartbeat table.
#[async_trait]
pub trait HeartbeatStore: Send + Sync {
    /// Record that `endpoint` serves each of `clusters` as of `clock`.
    async fn beat(&self, endpoint: &str, clusters: &[String], clock: i64) -> Result<()>;

    /// Rows with `clock >= since`.
    async fn active(&self, since: i64) -> Result<Vec<Heartbeat>>;
}

/// Immutable consistent hash ring.
#[derive(Debug, Clone, Default)]
pub struct HashRing {
    points: BTreeMap<u64, String>,
    nodes: BTreeSet<String>,
}

impl HashRing {
    pub fn new<I, S>(nodes: I, virtual_nodes: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let nodes: BTreeSet<String> = nodes.into_iter().map(Into::into).collect();
        let replicas = virtual_nodes.max(1);
        let mut points = BTreeMap::new();
        for node in &nodes {
            for i in 0..replicas {
                points.insert(point(&format!("{node}#{i}")), node.clone());
            }
        }
        Self { points, nodes }
    }

    /// Node owning `key`: first point clockwise from the key's hash.
    pub fn get(&self, key: &str) -> Option<&str> {
        let h = point(key);
        self.points
            .range(h..)
            .next()
            .or_else(|| self.points.iter().next())
            .map(|(_, node)| node.as_str())
    }

    pub fn nodes(&self) -> &BTreeSet<String> {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn point(key: &str) -> u64 {
    hash_to_u64(&md5_hex(key))
}

/// Per-cluster rings plus the global leader.
pub struct RingRegistry {
    virtual_nodes: usize,
    rings: RwLock<HashMap<String, Arc<HashRing>>>,
    leader: RwLock<Option<String>>,
}

impl RingRegistry {
    pub fn new(virtual_nodes: usize) -> Self {
        Self {
            virtual_nodes,
            rings: RwLock::new(HashMap::new()),
            leader: RwLock::new(None),
        }
    }

    /// Replace the ring of one cluster, rebuilding only when membership changed.
    pub fn set_nodes(&self, cluster: &str, nodes: Vec<String>) {
        let wanted: BTreeSet<String> = nodes.into_iter().collect();
        let mut rings = self.rings.write().unwrap_or_else(PoisonError::into_inner);
        if rings.get(cluster).is_some_and(|r| *r.nodes() == wanted) {
            return;
        }
        info!(cluster, nodes = ?wanted, "hash ring membership changed");
        rings.insert(
            cluster.to_string(),
            Arc::new(HashRing::new(wanted, self.virtual_nodes)),
        );
    }

    /// Rebuild every ring from heartbeat rows.
    pub fn rebuild(&self, beats: &[Heartbeat]) {
        let mut by_cluster: HashMap<&str, Vec<String>> = HashMap::new();
        for b in beats {
            by_cluster
                .entry(b.cluster.as_str())
                .or_default()
                .push(b.endpoint.clone());
        }

        let stale: Vec<String> = {
            let rings = self.rings.read().unwrap_or_else(PoisonError::into_inner);
            rings
                .keys()
                .filter(|c| !by_cluster.contains_key(c.as_str()))
                .cloned()
                .collect()
        };
        if !stale.is_empty() {
            let mut rings = self.rings.write().unwrap_or_else(PoisonError::into_inner);
            for c in &stale {
                rings.remove(c);
            }
        }
        for (cluster, nodes) in by_cluster {
            self.set_nodes(cluster, nodes);
        }

        let leader = beats.iter().map(|b| b.endpoint.clone()).min();
        *self.leader.write().unwrap_or_else(PoisonError::into_inner) = leader;
    }

    /// Endpoint owning `key` within `cluster`.
    pub fn owner(&self, cluster: &str, key: &str) -> Option<String> {
        let ring = self
            .rings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(cluster)
            .cloned()?;
        ring.get(key).map(str::to_string)
    }

    pub fn is_hit(&self, cluster: &str, key: &str, endpoint: &str) -> bool {
        self.owner(cluster, key).as_deref() == Some(endpoint)
    }

    /// Lexicographically smallest active endpoint.
    pub fn leader(&self) -> Option<String> {
        self.leader
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_leader(&self, endpoint: &str) -> bool {
        self.leader().as_deref() == Some(endpoint)
    }
}

/// Beat for every enabled datasource cluster, then rebuild the rings.
pub async fn heartbeat_once(
    store: &dyn HeartbeatStore,
    ring: &RingRegistry,
    caches: &CacheSet,
    endpoint: &str,
    clock: &dyn Clock,
    active_secs: i64,
) -> Result<()> {
    let now = clock.now();
    let clusters: Vec<String> = caches
        .datasources
        .get_all()
        .into_iter()
        .filter(|d| !d.disabled)
        .map(|d| d.name.clone())
        .collect();
    store.beat(endpoint, &clusters, now).await?;
    let beats = store.active(now - active_secs).await?;
    ring.rebuild(&beats);
    debug!(endpoint, clusters = clusters.len(), active = beats.len(), "heartbeat");
    Ok(())
}

pub struct HeartbeatTask {
    pub store: Arc<dyn HeartbeatStore>,
    pub ring: Arc<RingRegistry>,
    pub caches: CacheSet,
    pub endpoint: String,
    pub clock: Arc<dyn Clock>,
    pub interval: Duration,
    pub active_secs: i64,
}

impl HeartbeatTask {
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = heartbeat_once(
                            self.store.as_ref(),
                            &self.ring,
                            &self.caches,
                            &self.endpoint,
                            self.clock.as_ref(),
                            self.active_secs,
                        ).await {
                            warn!(endpoint = %self.endpoint, error = %e, "heartbeat failed");
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

/// In-process heartbeat table.
#[derive(Default)]
pub struct MemoryHeartbeatStore {
    rows: std::sync::Mutex<HashMap<(String, String), i64>>,
}

#[async_trait]
impl HeartbeatStore for MemoryHeartbeatStore {
    async fn beat(&self, endpoint: &str, clusters: &[String], clock: i64) -> Result<()> {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        for c in clusters {
            rows.insert((endpoint.to_string(), c.clone()), clock);
        }
        Ok(())
    }

    async fn active(&self, since: i64) -> Result<Vec<Heartbeat>> {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<Heartbeat> = rows
            .iter()
            .filter(|(_, clock)| **clock >= since)
            .map(|((endpoint, cluster), clock)| Heartbeat {
                endpoint: endpoint.clone(),
                cluster: cluster.clone(),
                clock: *clock,
            })
            .collect();
        out.sort_by(|a, b| (&a.cluster, &a.endpoint).cmp(&(&b.cluster, &b.endpoint)));
        Ok(out)
    }
}
