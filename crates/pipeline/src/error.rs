//! Pipeline error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unknown processor type: {0}")]
    UnknownProcessor(String),

    #[error("invalid config for {kind}: {reason}")]
    Config { kind: String, reason: String },

    #[error("processor failed: {0}")]
    Processor(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("execution store error: {0}")]
    Store(String),

    #[error(transparent)]
    Core(#[from] vigil_core::VigilError),
}

impl PipelineError {
    pub fn config(kind: &str, reason: impl std::fmt::Display) -> Self {
        Self::Config {
            kind: kind.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<minijinja::Error> for PipelineError {
    fn from(e: minijinja::Error) -> Self {
        Self::Template(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
