//! ResponseCache - Bounded Prediction Cache with FIFO Eviction
//!
//! Repeated identical inputs are common (catalogue search boxes send the same
//! query over and over), so the service keeps the decoded entities of the
//! last `capacity` distinct inputs.
//!
//! ## Eviction Order
//!
//! Eviction is **FIFO by insertion**, not LRU: a cache hit does not refresh an
//! entry. The insertion order is kept in an explicit queue next to the map, so
//! finding the oldest entry is O(1):
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ RwLock<CacheInner>                           │
//! │   entries: HashMap<String, Vec<Entity>>      │
//! │   order:   VecDeque<String>                  │
//! │            front ──▶ "oldest" ... "newest"   │
//! └──────────────────────────────────────────────┘
//! put() on a full cache: pop_front() → remove from map → insert new key
//! ```
//!
//! Entries are only ever removed by eviction or `clear()`, so the queue and
//! the map always hold the same key set.
//!
//! ## Thread Safety
//!
//! Reads share the lock; `put()` and `clear()` take it exclusively, so the
//! capacity check and the insert happen in one critical section. The lock is
//! never held across inference.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use tokio::sync::RwLock;

use super::types::Entity;

/// Default number of cached inputs.
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Read-only view of cache occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, Vec<Entity>>,
    order: VecDeque<String>,
}

/// Bounded input-text → entities cache.
///
/// A capacity of zero disables caching: `put()` stores nothing.
#[derive(Debug)]
pub struct ResponseCache {
    inner: RwLock<CacheInner>,
    capacity: usize,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl ResponseCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up an exact input string. No trimming or normalization.
    pub async fn get(&self, key: &str) -> Option<Vec<Entity>> {
        self.inner.read().await.entries.get(key).cloned()
    }

    /// Store the entities for `key`, evicting the oldest entry first if full.
    ///
    /// Two requests that missed on the same key may both finish inference;
    /// the second `put()` is ignored. Stored entries are never mutated and
    /// keep their original queue position, so nothing extra is evicted.
    pub async fn put(&self, key: String, value: Vec<Entity>) {
        if self.capacity == 0 {
            return;
        }

        let mut inner = self.inner.write().await;

        if inner.entries.contains_key(&key) {
            return;
        }

        if inner.entries.len() >= self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
                tracing::debug!(
                    "ResponseCache: evicted oldest entry ({} chars)",
                    oldest.chars().count()
                );
            }
        }

        inner.order.push_back(key.clone());
        inner.entries.insert(key, value);
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        let dropped = inner.entries.len();
        inner.entries.clear();
        inner.order.clear();
        tracing::info!("ResponseCache: cleared {} entries", dropped);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.len().await,
            capacity: self.capacity,
        }
    }
}
