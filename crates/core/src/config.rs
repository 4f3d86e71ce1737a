use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_list(profile: &str, key: &str) -> Vec<String> {
    profiled_env_opt(profile, key)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub alerting: AlertingConfig,
    pub cluster: ClusterConfig,
    pub postgres: PostgresConfig,
    pub pipeline: PipelineConfig,
    pub ibex: IbexConfig,
    pub maintainer: MaintainerConfig,
    pub smtp: SmtpDefaults,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `VIGIL_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("VIGIL_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            alerting: AlertingConfig::from_env_profiled(p),
            cluster: ClusterConfig::from_env_profiled(p),
            postgres: PostgresConfig::from_env_profiled(p),
            pipeline: PipelineConfig::from_env_profiled(p),
            ibex: IbexConfig::from_env_profiled(p),
            maintainer: MaintainerConfig::from_env_profiled(p),
            smtp: SmtpDefaults::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:      {}:{}", self.server.host, self.server.port);
        tracing::info!(
            "  alerting:    notify_concurrency={}, queue_max={}, engine_delay={}s",
            self.alerting.notify_concurrency,
            self.alerting.event_queue_max_size,
            self.alerting.engine_delay_secs
        );
        tracing::info!(
            "  cluster:     endpoint={}, vnodes={}",
            self.cluster.endpoint,
            self.cluster.virtual_nodes
        );
        tracing::info!("  postgres:    host={}, db={}", self.postgres.host, self.postgres.database);
        tracing::info!("  pipeline:    retention_days={}", self.pipeline.retention_days);
        tracing::info!(
            "  ibex:        address={}",
            self.ibex.address.as_deref().unwrap_or("(none)")
        );
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "HOST", "0.0.0.0"),
            port: profiled_env_parse(p, "PORT", 17000),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ── Alerting engine ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertingConfig {
    /// Max in-flight notification dispatches.
    pub notify_concurrency: usize,
    pub event_queue_max_size: usize,
    /// Seconds to wait before the first scheduler sync, letting caches warm up.
    pub engine_delay_secs: u64,
    pub cache_sync_interval_secs: u64,
    pub rule_sync_interval_secs: u64,
    /// URLs every firing event is posted to, unless a subscription overrides them.
    pub global_webhooks: Vec<String>,
}

impl AlertingConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            notify_concurrency: profiled_env_parse(p, "NOTIFY_CONCURRENCY", 16),
            event_queue_max_size: profiled_env_parse(p, "EVENT_QUEUE_MAX_SIZE", 10_000_000),
            engine_delay_secs: profiled_env_parse(p, "ENGINE_DELAY", 30),
            cache_sync_interval_secs: profiled_env_parse(p, "CACHE_SYNC_INTERVAL", 9),
            rule_sync_interval_secs: profiled_env_parse(p, "RULE_SYNC_INTERVAL", 9),
            global_webhooks: profiled_env_list(p, "GLOBAL_WEBHOOKS"),
        }
    }

    pub fn engine_delay(&self) -> Duration {
        Duration::from_secs(self.engine_delay_secs)
    }

    pub fn cache_sync_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sync_interval_secs.max(1))
    }

    pub fn rule_sync_interval(&self) -> Duration {
        Duration::from_secs(self.rule_sync_interval_secs.max(1))
    }
}

// ── Cluster / hash ring ───────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// This replica's identity on the hash ring (usually `host:port`).
    pub endpoint: String,
    /// Engine cluster name; replicas only share a ring within the same cluster.
    pub engine_name: String,
    pub virtual_nodes: usize,
    pub heartbeat_interval_ms: u64,
    /// A replica is active when its last heartbeat is within this window.
    pub heartbeat_active_secs: i64,
}

impl ClusterConfig {
    fn from_env_profiled(p: &str) -> Self {
        let port: u16 = profiled_env_parse(p, "PORT", 17000);
        Self {
            endpoint: profiled_env_or(p, "ENDPOINT", &format!("127.0.0.1:{port}")),
            engine_name: profiled_env_or(p, "ENGINE_NAME", "default"),
            virtual_nodes: profiled_env_parse(p, "HASHRING_VIRTUAL_NODES", 500),
            heartbeat_interval_ms: profiled_env_parse(p, "HEARTBEAT_INTERVAL_MS", 1000),
            heartbeat_active_secs: profiled_env_parse(p, "HEARTBEAT_ACTIVE_SECS", 30),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(100))
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_parse(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "vigil"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_parse(p, "PG_MAX_CONNECTIONS", 10),
        }
    }

    pub fn connection_string(&self) -> String {
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    pub fn is_configured(&self) -> bool {
        self.username.is_some()
    }
}

// ── Event pipelines ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Execution records older than this are purged by the housekeeping job.
    pub retention_days: u32,
    pub cleanup_batch_size: u32,
    pub cleanup_interval_secs: u64,
}

impl PipelineConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            retention_days: profiled_env_parse(p, "PIPELINE_RETENTION_DAYS", 7),
            cleanup_batch_size: profiled_env_parse(p, "PIPELINE_CLEANUP_BATCH", 100),
            cleanup_interval_secs: profiled_env_parse(p, "PIPELINE_CLEANUP_INTERVAL", 86_400),
        }
    }
}

// ── Ibex (remote job execution) ───────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IbexConfig {
    pub address: Option<String>,
    pub basic_auth_user: Option<String>,
    #[serde(skip_serializing)]
    pub basic_auth_pass: Option<String>,
    pub timeout_ms: u64,
}

impl IbexConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            address: profiled_env_opt(p, "IBEX_ADDRESS"),
            basic_auth_user: profiled_env_opt(p, "IBEX_BASIC_AUTH_USER"),
            basic_auth_pass: profiled_env_opt(p, "IBEX_BASIC_AUTH_PASS"),
            timeout_ms: profiled_env_parse(p, "IBEX_TIMEOUT_MS", 3000),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.address.is_some()
    }
}

// ── Maintainer notifications ──────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaintainerConfig {
    /// User group whose members receive internal error reports.
    pub group_id: Option<i64>,
    /// Channel idents used for internal error reports.
    pub channels: Vec<String>,
}

impl MaintainerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            group_id: profiled_env_opt(p, "MAINTAINER_GROUP_ID").and_then(|v| v.parse().ok()),
            channels: profiled_env_list(p, "MAINTAINER_CHANNELS"),
        }
    }
}

// ── SMTP defaults ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpDefaults {
    /// Messages sent on one connection before it is recycled.
    pub batch: usize,
    pub idle_timeout_secs: u64,
}

impl SmtpDefaults {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            batch: profiled_env_parse(p, "SMTP_BATCH", 20),
            idle_timeout_secs: profiled_env_parse(p, "SMTP_IDLE_TIMEOUT", 30),
        }
    }
}
