//! Consistency cache fronting remote reads during a sync pass.
//!
//! Two backends implement [`CacheBackend`]:
//! - [`MemoryCache`] — process-local, lost on exit
//! - [`FileCache`] — one JSON record per key, survives restarts
//!
//! Both evaluate TTL lazily at read time (no sweeper task), evict the
//! least-recently-used entry when a new key would exceed `max_size`, and
//! support exact tag-based invalidation. [`CacheManager`] layers namespaces,
//! per-namespace TTLs, and single-flight `get_or_set` on top.

mod clock;
mod file;
mod lru;
mod manager;
mod memory;

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use clock::{Clock, ManualClock, SystemClock};
pub use file::FileCache;
pub use manager::{CacheManager, CacheNamespace};
pub use memory::MemoryCache;

/// One cached value plus its bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub value: Value,
    pub created_at: DateTime<Utc>,
    /// `None` = never expires.
    pub expires_at: Option<DateTime<Utc>>,
    pub tags: BTreeSet<String>,
    /// Incremented on every successful read.
    pub hit_count: u64,
}

impl CacheEntry {
    pub fn new(value: Value, now: DateTime<Utc>, ttl: Option<Duration>, tags: &[String]) -> Self {
        Self {
            value,
            created_at: now,
            expires_at: expiry(now, ttl),
            tags: tags.iter().cloned().collect(),
            hit_count: 0,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        is_expired(self.expires_at, now)
    }
}

pub(crate) fn expiry(now: DateTime<Utc>, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    let ttl = chrono::Duration::from_std(ttl?).ok()?;
    now.checked_add_signed(ttl)
}

pub(crate) fn is_expired(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    matches!(expires_at, Some(at) if now >= at)
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    pub fn requests(&self) -> u64 {
        self.hits + self.misses
    }

    /// `hits / (hits + misses)`, or 0 before any request.
    pub fn hit_rate(&self) -> f64 {
        match self.requests() {
            0 => 0.0,
            total => self.hits as f64 / total as f64,
        }
    }
}

/// Contract shared by every cache backend.
///
/// None of these operations fail: absence is a valid answer and backend
/// trouble (an unreadable record) degrades to a miss.
pub trait CacheBackend: Send + Sync {
    /// Live value for `key`; expired entries are removed and count as a miss.
    fn get(&self, key: &str) -> Option<Value>;

    /// Insert or overwrite. `ttl = None` never expires.
    fn set(&self, key: &str, value: Value, ttl: Option<Duration>, tags: &[String]);

    fn delete(&self, key: &str) -> bool;

    /// Remove every entry whose tag set contains `tag`.
    fn invalidate_by_tag(&self, tag: &str) -> usize;

    /// Remove everything; returns the number of entries dropped.
    fn clear(&self) -> usize;

    fn stats(&self) -> CacheStats;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release backend resources at the end of a session.
    fn close(&self) {}
}
