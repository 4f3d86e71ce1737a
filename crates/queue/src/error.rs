//! Queue error types.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue full (capacity {0})")]
    Full(usize),

    #[error("queue closed")]
    Closed,
}
