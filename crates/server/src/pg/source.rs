use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::PgPool;
use tracing::warn;

use vigil_cache::{CacheError, CacheSource, CacheSources, Statistics};

/// A cache table read as `(id, data)` rows.
pub struct PgSource<T> {
    pool: PgPool,
    table: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> PgSource<T> {
    pub fn new(pool: PgPool, table: &'static str) -> Self {
        Self {
            pool,
            table,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T> CacheSource<T> for PgSource<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    async fn statistics(&self) -> vigil_cache::Result<Statistics> {
        let sql = format!(
            "SELECT COUNT(*)::BIGINT, COALESCE(MAX(update_at), 0)::BIGINT FROM {}",
            self.table
        );
        let (total, last_updated): (i64, i64) = sqlx::query_as(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CacheError::Statistics {
                cache: self.table.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Statistics { total, last_updated })
    }

    async fn load_all(&self) -> vigil_cache::Result<Vec<T>> {
        let sql = format!("SELECT id, data FROM {} ORDER BY id", self.table);
        let rows: Vec<(i64, Value)> = sqlx::query_as(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CacheError::Load {
                cache: self.table.to_string(),
                reason: e.to_string(),
            })?;
        Ok(decode_rows(self.table, rows))
    }
}

/// Decode JSONB rows, filling a missing `id` from the row. Rows that do not
/// decode are logged and skipped so one bad record cannot stall the cache.
pub(crate) fn decode_rows<T: DeserializeOwned>(table: &str, rows: Vec<(i64, Value)>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|(id, mut data)| {
            if let Value::Object(map) = &mut data {
                map.entry("id").or_insert_with(|| Value::from(id));
            }
            match serde_json::from_value(data) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(table, id, error = %e, "skipping undecodable row");
                    None
                }
            }
        })
        .collect()
}

fn table<T>(pool: &PgPool, name: &'static str) -> Arc<dyn CacheSource<T>>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    Arc::new(PgSource::new(pool.clone(), name))
}

/// Every cache backed by its PostgreSQL table.
pub fn pg_sources(pool: &PgPool) -> CacheSources {
    CacheSources {
        rules: table(pool, "alert_rule"),
        mutes: table(pool, "alert_mute"),
        subscribes: table(pool, "alert_subscribe"),
        targets: table(pool, "target"),
        users: table(pool, "users"),
        user_groups: table(pool, "user_group"),
        channels: table(pool, "notify_channel"),
        pipelines: table(pool, "event_pipeline"),
        templates: table(pool, "message_template"),
        datasources: table(pool, "datasource"),
        task_templates: table(pool, "task_tpl"),
    }
}
