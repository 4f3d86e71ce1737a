//! Backing stores that snapshot caches poll.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Cheap change-detection summary: the pair changes iff the set changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub total: i64,
    pub last_updated: i64,
}

/// A table (or any other store) a [`SnapshotCache`](crate::SnapshotCache)
/// can mirror.
#[async_trait]
pub trait CacheSource<T>: Send + Sync {
    async fn statistics(&self) -> Result<Statistics>;

    async fn load_all(&self) -> Result<Vec<T>>;
}

/// In-process source; `update_at` bumps emulate a table write.
#[derive(Debug, Default)]
pub struct MemorySource<T> {
    inner: Mutex<(Vec<T>, i64)>,
}

impl<T: Clone + Send + Sync> MemorySource<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            inner: Mutex::new((items, 1)),
        }
    }

    /// Replace the content and advance `last_updated`.
    pub fn set(&self, items: Vec<T>) {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.0 = items;
        guard.1 += 1;
    }

    pub fn push(&self, item: T) {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.0.push(item);
        guard.1 += 1;
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> CacheSource<T> for MemorySource<T> {
    async fn statistics(&self) -> Result<Statistics> {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(Statistics {
            total: guard.0.len() as i64,
            last_updated: guard.1,
        })
    }

    async fn load_all(&self) -> Result<Vec<T>> {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.0.clone())
    }
}
