//! Bounded FIFO between the rule evaluators and the notification dispatcher.

pub mod error;
pub mod event_queue;

pub use error::QueueError;
pub use event_queue::{BoundedQueue, EventQueue, QueueStatus, DEFAULT_POP_BATCH, EMPTY_POLL_INTERVAL};
