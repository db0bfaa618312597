//! Process-local cache backend.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;

use super::clock::{Clock, SystemClock};
use super::lru::LruIndex;
use super::{CacheBackend, CacheEntry, CacheStats};

#[derive(Debug, Default)]
struct Inner {
    entries: LruIndex<CacheEntry>,
    stats: CacheStats,
}

/// In-memory [`CacheBackend`] with lazy TTL and LRU eviction.
///
/// A single mutex guards entries and counters, so the expiry check in `get`
/// can never race an eviction or invalidation.
#[derive(Debug)]
pub struct MemoryCache {
    inner: Mutex<Inner>,
    max_size: usize,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    /// `max_size` is clamped to at least one entry.
    pub fn new(max_size: usize) -> Self {
        Self::with_clock(max_size, Arc::new(SystemClock))
    }

    pub fn with_clock(max_size: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_size: max_size.max(1),
            clock,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Copy of the live entry for `key`, without touching recency or stats.
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner
            .entries
            .peek_mut(key)
            .filter(|entry| !entry.is_expired(now))
            .cloned()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CacheBackend for MemoryCache {
    fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let Inner { entries, stats } = &mut *inner;

        let expired = match entries.peek_mut(key) {
            None => {
                stats.misses += 1;
                return None;
            }
            Some(entry) if entry.is_expired(now) => true,
            Some(entry) => {
                entry.hit_count += 1;
                false
            }
        };

        if expired {
            entries.remove(key);
            stats.expirations += 1;
            stats.misses += 1;
            tracing::trace!(key, "cache entry expired");
            return None;
        }

        entries.touch(key);
        stats.hits += 1;
        entries.peek_mut(key).map(|entry| entry.value.clone())
    }

    fn set(&self, key: &str, value: Value, ttl: Option<Duration>, tags: &[String]) {
        let entry = CacheEntry::new(value, self.clock.now(), ttl, tags);
        let mut inner = self.lock();
        let Inner { entries, stats } = &mut *inner;

        if !entries.contains_key(key) {
            while entries.len() >= self.max_size {
                let Some((evicted, _)) = entries.pop_lru() else {
                    break;
                };
                stats.evictions += 1;
                tracing::debug!(key = %evicted, "evicted least-recently-used cache entry");
            }
        }
        entries.insert(key.to_owned(), entry);
        stats.sets += 1;
    }

    fn delete(&self, key: &str) -> bool {
        let mut inner = self.lock();
        let removed = inner.entries.remove(key).is_some();
        if removed {
            inner.stats.deletes += 1;
        }
        removed
    }

    fn invalidate_by_tag(&self, tag: &str) -> usize {
        let mut inner = self.lock();
        let removed = inner.entries.drain_where(|entry| entry.tags.contains(tag)).len();
        inner.stats.deletes += removed as u64;
        removed
    }

    fn clear(&self) -> usize {
        let mut inner = self.lock();
        let removed = inner.entries.drain_all().len();
        inner.stats.deletes += removed as u64;
        removed
    }

    fn stats(&self) -> CacheStats {
        self.lock().stats
    }

    fn len(&self) -> usize {
        self.lock().entries.len()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
