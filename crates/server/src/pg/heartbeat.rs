use async_trait::async_trait;
use sqlx::PgPool;

use vigil_rules::{Heartbeat, HeartbeatStore, RuleError};

/// `alerting_engines`: one row per (endpoint, cluster) with the last beat.
pub struct PgHeartbeatStore {
    pool: PgPool,
}

impl PgHeartbeatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn hb_err(e: sqlx::Error) -> RuleError {
    RuleError::Heartbeat(e.to_string())
}

#[async_trait]
impl HeartbeatStore for PgHeartbeatStore {
    async fn beat(&self, endpoint: &str, clusters: &[String], clock: i64) -> vigil_rules::Result<()> {
        let mut tx = self.pool.begin().await.map_err(hb_err)?;
        for cluster in clusters {
            sqlx::query(
                r#"INSERT INTO alerting_engines (endpoint, cluster, clock)
                   VALUES ($1, $2, $3)
                   ON CONFLICT (endpoint, cluster) DO UPDATE SET clock = EXCLUDED.clock"#,
            )
            .bind(endpoint)
            .bind(cluster)
            .bind(clock)
            .execute(&mut *tx)
            .await
            .map_err(hb_err)?;
        }
        tx.commit().await.map_err(hb_err)
    }

    async fn active(&self, since: i64) -> vigil_rules::Result<Vec<Heartbeat>> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            "SELECT endpoint, cluster, clock FROM alerting_engines WHERE clock >= $1 ORDER BY cluster, endpoint",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(hb_err)?;
        Ok(rows
            .into_iter()
            .map(|(endpoint, cluster, clock)| Heartbeat { endpoint, cluster, clock })
            .collect())
    }
}
