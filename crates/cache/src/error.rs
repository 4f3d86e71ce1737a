//! Cache error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("{cache}: statistics query failed: {reason}")]
    Statistics { cache: String, reason: String },

    #[error("{cache}: load failed: {reason}")]
    Load { cache: String, reason: String },

    #[error("source error: {0}")]
    Source(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;
