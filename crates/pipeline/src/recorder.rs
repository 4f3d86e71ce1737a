//! Execution history: one record per recorded pipeline run, plus retention.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vigil_core::config::PipelineConfig;
use vigil_core::Clock;

use crate::error::Result;
use crate::result::ExecutionStatus;

const SECS_PER_DAY: i64 = 86_400;
const BATCH_PAUSE: Duration = Duration::from_millis(10);

/// A stored pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineExecution {
    pub id: String,
    pub pipeline_id: i64,
    pub pipeline_name: String,
    pub mode: String,
    pub status: ExecutionStatus,
    pub error_message: String,
    pub error_node: String,
    pub event_id: i64,
    pub created_at: i64,
    pub finished_at: i64,
    pub duration_ms: u64,
    pub trigger_by: String,
    /// JSON array of node results.
    pub node_results_json: String,
    /// JSON object of the inputs, secrets redacted.
    pub inputs_snapshot_json: String,
}

/// Aggregates over the stored executions of one pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionStats {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    /// Mean duration of successful runs.
    pub avg_duration_ms: u64,
    pub last_run_at: i64,
}

impl ExecutionStats {
    pub fn from_executions<'a>(execs: impl IntoIterator<Item = &'a PipelineExecution>) -> Self {
        let mut stats = Self::default();
        let mut success_ms = 0u64;
        for e in execs {
            stats.total += 1;
            match e.status {
                ExecutionStatus::Success => {
                    stats.success += 1;
                    success_ms += e.duration_ms;
                }
                ExecutionStatus::Failed => stats.failed += 1,
                ExecutionStatus::Streaming => {}
            }
            stats.last_run_at = stats.last_run_at.max(e.created_at);
        }
        if stats.success > 0 {
            stats.avg_duration_ms = success_ms / stats.success;
        }
        stats
    }
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn insert(&self, exec: &PipelineExecution) -> Result<()>;

    /// Delete up to `limit` records created before `cutoff`, oldest first.
    /// Returns how many were deleted.
    async fn delete_before(&self, cutoff: i64, limit: usize) -> Result<usize>;

    /// Most recent executions of a pipeline, newest first.
    async fn list(&self, pipeline_id: i64, limit: usize) -> Result<Vec<PipelineExecution>>;

    async fn stats(&self, pipeline_id: i64) -> Result<ExecutionStats>;
}

/// In-process store used by tests and store-less deployments.
#[derive(Default)]
pub struct MemoryExecutionStore {
    rows: Mutex<Vec<PipelineExecution>>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all(&self) -> Vec<PipelineExecution> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn insert(&self, exec: &PipelineExecution) -> Result<()> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(exec.clone());
        Ok(())
    }

    async fn delete_before(&self, cutoff: i64, limit: usize) -> Result<usize> {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        let mut old: Vec<(i64, String)> = rows
            .iter()
            .filter(|r| r.created_at < cutoff)
            .map(|r| (r.created_at, r.id.clone()))
            .collect();
        old.sort();
        old.truncate(limit);
        rows.retain(|r| !old.iter().any(|(_, id)| *id == r.id));
        Ok(old.len())
    }

    async fn list(&self, pipeline_id: i64, limit: usize) -> Result<Vec<PipelineExecution>> {
        let mut out: Vec<PipelineExecution> = self
            .rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit);
        Ok(out)
    }

    async fn stats(&self, pipeline_id: i64) -> Result<ExecutionStats> {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(ExecutionStats::from_executions(
            rows.iter().filter(|r| r.pipeline_id == pipeline_id),
        ))
    }
}

/// Writes execution records and prunes old ones. Store failures are logged
/// and never reach the pipeline caller.
#[derive(Clone)]
pub struct Recorder {
    store: Arc<dyn ExecutionStore>,
    clock: Arc<dyn Clock>,
}

impl Recorder {
    pub fn new(store: Arc<dyn ExecutionStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    pub async fn record(&self, exec: PipelineExecution) {
        if let Err(e) = self.store.insert(&exec).await {
            warn!(
                pipeline_id = exec.pipeline_id,
                execution_id = %exec.id,
                error = %e,
                "failed to record pipeline execution"
            );
        }
    }

    /// Delete records older than `retention_days`, `batch` at a time.
    /// Stops at the first short batch or store error.
    pub async fn cleanup(&self, retention_days: u32, batch: usize) -> usize {
        let cutoff = self.clock.now() - i64::from(retention_days) * SECS_PER_DAY;
        let batch = batch.max(1);
        let mut total = 0;
        loop {
            match self.store.delete_before(cutoff, batch).await {
                Ok(n) => {
                    total += n;
                    if n < batch {
                        break;
                    }
                    tokio::time::sleep(BATCH_PAUSE).await;
                }
                Err(e) => {
                    warn!(error = %e, deleted = total, "pipeline execution cleanup failed");
                    break;
                }
            }
        }
        if total > 0 {
            info!(deleted = total, retention_days, "pruned pipeline executions");
        } else {
            debug!(retention_days, "no pipeline executions to prune");
        }
        total
    }

    /// Run [`cleanup`](Self::cleanup) every `cleanup_interval_secs` until shutdown.
    pub fn spawn_retention(
        &self,
        config: PipelineConfig,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(config.cleanup_interval_secs.max(1)));
            while !*shutdown.borrow() {
                tokio::select! {
                    _ = ticker.tick() => {
                        this.cleanup(config.retention_days, config.cleanup_batch_size as usize).await;
                    }
                    _ = shutdown.changed() => {}
                }
            }
        })
    }
}
