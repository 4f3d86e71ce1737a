use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;

use vigil_core::AlertEvent;
use vigil_rules::{EventStore, RuleError};

use super::source::decode_rows;

fn store_err(e: impl std::fmt::Display) -> RuleError {
    RuleError::Store(e.to_string())
}

/// `alert_cur_event` holds one row per firing hash; `alert_his_event` gets
/// a row for every persisted transition.
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn load_active(&self, rule_id: i64, cluster: &str) -> vigil_rules::Result<Vec<AlertEvent>> {
        let rows: Vec<(i64, Value)> = sqlx::query_as(
            "SELECT id, data FROM alert_cur_event WHERE rule_id = $1 AND cluster = $2 ORDER BY id",
        )
        .bind(rule_id)
        .bind(cluster)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        let ids: Vec<i64> = rows.iter().map(|(id, _)| *id).collect();
        let mut events: Vec<AlertEvent> = decode_rows("alert_cur_event", rows);
        // the stored json predates the row id
        for (event, id) in events.iter_mut().zip(ids) {
            event.id = id;
        }
        Ok(events)
    }

    async fn persist(&self, event: &AlertEvent) -> vigil_rules::Result<i64> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let id: i64 = sqlx::query_scalar(
            r#"INSERT INTO alert_his_event (hash, rule_id, cluster, is_recovered, trigger_time, data)
               VALUES ($1, $2, $3, $4, $5, '{}'::jsonb)
               RETURNING id"#,
        )
        .bind(&event.hash)
        .bind(event.rule_id)
        .bind(&event.cluster)
        .bind(event.is_recovered)
        .bind(event.trigger_time)
        .fetch_one(&mut *tx)
        .await
        .map_err(store_err)?;

        let mut stored = event.clone();
        stored.id = id;
        let data = serde_json::to_value(&stored).map_err(store_err)?;

        sqlx::query("UPDATE alert_his_event SET data = $2 WHERE id = $1")
            .bind(id)
            .bind(&data)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        if event.is_recovered {
            sqlx::query("DELETE FROM alert_cur_event WHERE hash = $1")
                .bind(&event.hash)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
        } else {
            sqlx::query(
                r#"INSERT INTO alert_cur_event (hash, id, rule_id, cluster, trigger_time, data)
                   VALUES ($1, $2, $3, $4, $5, $6)
                   ON CONFLICT (hash) DO UPDATE
                   SET id = EXCLUDED.id, trigger_time = EXCLUDED.trigger_time, data = EXCLUDED.data"#,
            )
            .bind(&event.hash)
            .bind(id)
            .bind(event.rule_id)
            .bind(&event.cluster)
            .bind(event.trigger_time)
            .bind(&data)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }

        tx.commit().await.map_err(store_err)?;
        Ok(id)
    }
}
