use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use vigil_core::config::PostgresConfig;

/// Open a connection pool sized by `max_connections`.
pub async fn connect(config: &PostgresConfig) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .connect(&config.connection_string())
        .await
        .with_context(|| format!("connecting to PostgreSQL at {}:{}", config.host, config.port))?;
    info!("PostgreSQL connected: {}:{}/{}", config.host, config.port, config.database);
    Ok(pool)
}

pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .context("running database migrations")?;
    info!("Database migrations applied successfully");
    Ok(())
}
