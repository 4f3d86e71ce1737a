//! Bounded record of the last dispatched status per event hash.
//!
//! Admission, not displacement: when the cache is full a new key only gets
//! in if the least recently used entry has outlived the TTL.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};

use lru::LruCache;
use serde::Serialize;
use vigil_core::Clock;

pub const DEFAULT_TTL_SECS: i64 = 24 * 60 * 60;

/// What the dispatcher last did with an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertStatus {
    pub rule_id: i64,
    pub is_recovered: bool,
    pub notify_cur_number: i64,
    pub last_sent_time: i64,
}

#[derive(Debug, Clone)]
struct Entry {
    status: AlertStatus,
    timestamp: i64,
}

pub struct AlertStatusCache {
    inner: Mutex<LruCache<u64, Entry>>,
    ttl_secs: i64,
    clock: Arc<dyn Clock>,
}

impl AlertStatusCache {
    pub fn new(capacity: NonZeroUsize, clock: Arc<dyn Clock>) -> Self {
        Self::with_ttl(capacity, DEFAULT_TTL_SECS, clock)
    }

    pub fn with_ttl(capacity: NonZeroUsize, ttl_secs: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl_secs,
            clock,
        }
    }

    /// Store `status` under `key`.
    ///
    /// Returns `false` when the cache is full and the LRU entry has not
    /// expired yet; nothing is evicted in that case.
    pub fn put(&self, key: u64, status: AlertStatus) -> bool {
        let now = self.clock.now();
        let mut cache = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(entry) = cache.get_mut(&key) {
            entry.status = status;
            entry.timestamp = now;
            return true;
        }

        if cache.len() >= cache.cap().get() {
            let expired = cache
                .peek_lru()
                .is_some_and(|(_, e)| now - e.timestamp > self.ttl_secs);
            if !expired {
                return false;
            }
            cache.pop_lru();
        }

        cache.put(
            key,
            Entry {
                status,
                timestamp: now,
            },
        );
        true
    }

    /// Unexpired status for `key`; promotes the entry to MRU.
    pub fn get(&self, key: u64) -> Option<AlertStatus> {
        let now = self.clock.now();
        let mut cache = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match cache.get(&key) {
            Some(e) if now - e.timestamp <= self.ttl_secs => Some(e.status.clone()),
            Some(_) => {
                cache.pop(&key);
                None
            }
            None => None,
        }
    }

    pub fn remove(&self, key: u64) -> Option<AlertStatus> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop(&key)
            .map(|e| e.status)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
