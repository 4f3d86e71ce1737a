use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;

use vigil_pipeline::{ExecutionStats, ExecutionStore, PipelineError, PipelineExecution};

fn store_err(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Store(e.to_string())
}

/// `event_pipeline_execution`: queryable columns plus the full record as JSONB.
pub struct PgExecutionStore {
    pool: PgPool,
}

impl PgExecutionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionStore for PgExecutionStore {
    async fn insert(&self, exec: &PipelineExecution) -> vigil_pipeline::Result<()> {
        let data = serde_json::to_value(exec).map_err(store_err)?;
        sqlx::query(
            r#"INSERT INTO event_pipeline_execution
                   (id, pipeline_id, status, created_at, duration_ms, data)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(&exec.id)
        .bind(exec.pipeline_id)
        .bind(exec.status.as_str())
        .bind(exec.created_at)
        .bind(exec.duration_ms as i64)
        .bind(&data)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn delete_before(&self, cutoff: i64, limit: usize) -> vigil_pipeline::Result<usize> {
        let result = sqlx::query(
            r#"DELETE FROM event_pipeline_execution
               WHERE id IN (
                   SELECT id FROM event_pipeline_execution
                   WHERE created_at < $1
                   ORDER BY created_at
                   LIMIT $2
               )"#,
        )
        .bind(cutoff)
        .bind(limit as i64)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected() as usize)
    }

    async fn list(&self, pipeline_id: i64, limit: usize) -> vigil_pipeline::Result<Vec<PipelineExecution>> {
        let rows: Vec<(Value,)> = sqlx::query_as(
            r#"SELECT data FROM event_pipeline_execution
               WHERE pipeline_id = $1
               ORDER BY created_at DESC
               LIMIT $2"#,
        )
        .bind(pipeline_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        rows.into_iter()
            .map(|(data,)| serde_json::from_value(data).map_err(store_err))
            .collect()
    }

    async fn stats(&self, pipeline_id: i64) -> vigil_pipeline::Result<ExecutionStats> {
        let (total, success, failed, avg, last): (i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"SELECT COUNT(*)::BIGINT,
                      COUNT(*) FILTER (WHERE status = 'success')::BIGINT,
                      COUNT(*) FILTER (WHERE status = 'failed')::BIGINT,
                      COALESCE(AVG(duration_ms) FILTER (WHERE status = 'success'), 0)::BIGINT,
                      COALESCE(MAX(created_at), 0)::BIGINT
               FROM event_pipeline_execution
               WHERE pipeline_id = $1"#,
        )
        .bind(pipeline_id)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(ExecutionStats {
            total: total as u64,
            success: success as u64,
            failed: failed as u64,
            avg_duration_ms: avg as u64,
            last_run_at: last,
        })
    }
}
