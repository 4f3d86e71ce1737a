//! Bounded FIFO with a non-blocking push and batched pop.
//!
//! Many producers (one per rule evaluator) push; one consumer (the
//! dispatcher) drains in batches. A full queue rejects the push instead of
//! blocking the evaluator, and the rejection is counted.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use vigil_core::AlertEvent;

use crate::error::QueueError;

/// Max items handed to the consumer per pop.
pub const DEFAULT_POP_BATCH: usize = 100;

/// Consumer back-off when the queue is empty.
pub const EMPTY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Point-in-time queue figures.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct QueueStatus {
    pub len: usize,
    pub capacity: usize,
    pub dropped: u64,
    pub closed: bool,
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QueueStatus {{ len: {}/{}, dropped: {}, closed: {} }}",
            self.len, self.capacity, self.dropped, self.closed
        )
    }
}

pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
}

/// The queue of events awaiting dispatch.
pub type EventQueue = BoundedQueue<AlertEvent>;

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Append without blocking.
    ///
    /// # Errors
    ///
    /// [`QueueError::Full`] at capacity, [`QueueError::Closed`] after
    /// [`close`](Self::close). Either way the item is dropped.
    pub fn try_push(&self, item: T) -> Result<(), QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        if items.len() >= self.capacity {
            drop(items);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(QueueError::Full(self.capacity));
        }
        items.push_back(item);
        Ok(())
    }

    /// `false` when the item was rejected.
    pub fn push(&self, item: T) -> bool {
        self.try_push(item).is_ok()
    }

    /// Remove up to `max` items from the front, in push order.
    pub fn pop_batch(&self, max: usize) -> Vec<T> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        let n = max.min(items.len());
        items.drain(..n).collect()
    }

    /// Wait for a non-empty batch, polling every [`EMPTY_POLL_INTERVAL`].
    ///
    /// Returns an empty vec once `shutdown` flips to `true` or the queue is
    /// closed and drained.
    pub async fn recv_batch(&self, max: usize, shutdown: &mut watch::Receiver<bool>) -> Vec<T> {
        loop {
            let batch = self.pop_batch(max);
            if !batch.is_empty() {
                return batch;
            }
            if *shutdown.borrow() || self.is_closed() {
                return batch;
            }
            tokio::select! {
                _ = tokio::time::sleep(EMPTY_POLL_INTERVAL) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    /// Reject all further pushes. Queued items can still be popped.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            len: self.len(),
            capacity: self.capacity,
            dropped: self.dropped.load(Ordering::Relaxed),
            closed: self.is_closed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn fifo_order_is_kept() {
        let q = BoundedQueue::new(10);
        for i in 0..5 {
            assert!(q.push(i));
        }
        assert_eq!(q.pop_batch(3), vec![0, 1, 2]);
        assert_eq!(q.pop_batch(100), vec![3, 4]);
        assert!(q.pop_batch(100).is_empty());
    }

    #[test]
    fn full_queue_rejects_without_blocking() {
        let q = BoundedQueue::new(2);
        assert!(q.push("a"));
        assert!(q.push("b"));
        assert_eq!(q.try_push("c"), Err(QueueError::Full(2)));
        assert!(!q.push("d"));
        let status = q.status();
        assert_eq!(status.len, 2);
        assert_eq!(status.dropped, 2);
        // room again after a pop
        q.pop_batch(1);
        assert!(q.push("e"));
    }

    #[test]
    fn closed_queue_still_drains() {
        let q = BoundedQueue::new(4);
        q.push(1);
        q.close();
        assert_eq!(q.try_push(2), Err(QueueError::Closed));
        assert_eq!(q.pop_batch(10), vec![1]);
    }

    #[test]
    fn concurrent_producers() {
        let q = Arc::new(BoundedQueue::new(1000));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let q = q.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        q.push(t * 1000 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(q.len(), 400);
    }

    #[tokio::test(start_paused = true)]
    async fn recv_batch_waits_for_items() {
        let q = Arc::new(BoundedQueue::new(10));
        let (_tx, mut rx) = watch::channel(false);
        let producer = {
            let q = q.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(250)).await;
                q.push(7);
            })
        };
        let batch = q.recv_batch(DEFAULT_POP_BATCH, &mut rx).await;
        assert_eq!(batch, vec![7]);
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn recv_batch_returns_on_shutdown() {
        let q: BoundedQueue<i32> = BoundedQueue::new(10);
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        assert!(q.recv_batch(10, &mut rx).await.is_empty());
    }
}
