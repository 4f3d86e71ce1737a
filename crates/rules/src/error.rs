//! Rule engine error types.

use thiserror::Error;

/// A datasource query that produced no usable result.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("datasource {0} not found")]
    NoDatasource(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("datasource returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("query returned warnings: {}", .0.join("; "))]
    Warnings(Vec<String>),
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("event store error: {0}")]
    Store(String),

    #[error("heartbeat error: {0}")]
    Heartbeat(String),

    #[error(transparent)]
    Cache(#[from] vigil_cache::CacheError),
}

pub type Result<T> = std::result::Result<T, RuleError>;
