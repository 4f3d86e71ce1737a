//! Notification error types.

/// Errors that can occur during notification delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned HTTP {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("SMTP delivery failed: {0}")]
    Smtp(String),

    #[error("Template rendering failed: {0}")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Callback rejected: {0}")]
    Callback(String),
}

impl From<minijinja::Error> for NotifyError {
    fn from(e: minijinja::Error) -> Self {
        Self::Template(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NotifyError>;
