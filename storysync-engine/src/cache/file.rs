//! Durable cache backend: one JSON record per key.
//!
//! Layout: `<dir>/<sha256(key)>.json`, each holding a [`PersistedEntry`].
//! The in-memory index carries metadata and recency only; values are read
//! from disk on every hit. Writes use the atomic `.tmp` + rename pattern.
//!
//! An unreadable or undecodable record is never an error: it is logged,
//! deleted, and treated as a miss.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::clock::{Clock, SystemClock};
use super::lru::LruIndex;
use super::{expiry, is_expired, CacheBackend, CacheStats};
use crate::error::{io_err, SyncError};

/// On-disk form of one cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub key: String,
    pub value: Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

#[derive(Debug, Clone)]
struct Meta {
    expires_at: Option<DateTime<Utc>>,
    tags: BTreeSet<String>,
    hit_count: u64,
}

#[derive(Debug, Default)]
struct Inner {
    index: LruIndex<Meta>,
    stats: CacheStats,
}

/// File-backed [`CacheBackend`]; state survives process restarts.
#[derive(Debug)]
pub struct FileCache {
    dir: PathBuf,
    inner: Mutex<Inner>,
    max_size: usize,
    clock: Arc<dyn Clock>,
}

impl FileCache {
    /// Open (or create) the cache directory and index its records.
    ///
    /// Corrupt and already-expired records are removed. Fails only when the
    /// directory itself cannot be created or listed.
    pub fn open(dir: impl Into<PathBuf>, max_size: usize) -> Result<Self, SyncError> {
        Self::open_with_clock(dir, max_size, Arc::new(SystemClock))
    }

    pub fn open_with_clock(
        dir: impl Into<PathBuf>,
        max_size: usize,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SyncError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

        let now = clock.now();
        let mut loaded = Vec::new();
        let listing = std::fs::read_dir(&dir).map_err(|e| io_err(&dir, e))?;
        for dirent in listing {
            let path = dirent.map_err(|e| io_err(&dir, e))?.path();
            match path.extension().and_then(|ext| ext.to_str()) {
                Some("json") => {}
                Some("tmp") => {
                    remove_file(&path);
                    continue;
                }
                _ => continue,
            }
            match read_record(&path) {
                Ok(record) if record_path(&dir, &record.key) != path => {
                    tracing::warn!(path = %path.display(), "cache record stored under wrong name, removing");
                    remove_file(&path);
                }
                Ok(record) if is_expired(record.expires_at, now) => remove_file(&path),
                Ok(record) => loaded.push(record),
                Err(reason) => {
                    tracing::warn!(path = %path.display(), %reason, "corrupt cache record, removing");
                    remove_file(&path);
                }
            }
        }

        // Oldest first so the newest records end up most recently used.
        loaded.sort_by_key(|record| record.created_at);

        let cache = Self {
            dir,
            inner: Mutex::new(Inner::default()),
            max_size: max_size.max(1),
            clock,
        };
        {
            let mut inner = cache.lock();
            for record in loaded {
                let meta = Meta {
                    expires_at: record.expires_at,
                    tags: record.tags,
                    hit_count: 0,
                };
                inner.index.insert(record.key, meta);
            }
            while inner.index.len() > cache.max_size {
                let Some((key, _)) = inner.index.pop_lru() else {
                    break;
                };
                remove_file(&cache.path_for(&key));
            }
            tracing::debug!(dir = %cache.dir.display(), entries = inner.index.len(), "opened file cache");
        }
        Ok(cache)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record path for `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        record_path(&self.dir, key)
    }

    /// Reads served for `key` since it was last written in this process.
    pub fn hit_count(&self, key: &str) -> Option<u64> {
        self.lock().index.peek_mut(key).map(|meta| meta.hit_count)
    }

    /// Delete every expired record from disk and from the index.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.lock();
        let expired = inner
            .index
            .drain_where(|meta| is_expired(meta.expires_at, now));
        for (key, _) in &expired {
            remove_file(&self.path_for(key));
        }
        inner.stats.expirations += expired.len() as u64;
        expired.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_record(&self, record: &PersistedEntry) -> Result<(), SyncError> {
        let path = self.path_for(&record.key);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec(record).map_err(|e| io_err(&path, e.into()))?;
        std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
        Ok(())
    }
}

impl CacheBackend for FileCache {
    fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let Inner { index, stats } = &mut *inner;

        let expired = match index.peek_mut(key) {
            None => {
                stats.misses += 1;
                return None;
            }
            Some(meta) => is_expired(meta.expires_at, now),
        };
        let path = self.path_for(key);

        if expired {
            index.remove(key);
            remove_file(&path);
            stats.expirations += 1;
            stats.misses += 1;
            return None;
        }

        match read_record(&path) {
            Ok(record) if record.key == key => {
                if let Some(meta) = index.peek_mut(key) {
                    meta.hit_count += 1;
                }
                index.touch(key);
                stats.hits += 1;
                Some(record.value)
            }
            Ok(_) | Err(_) => {
                tracing::warn!(key, path = %path.display(), "unreadable cache record, treating as miss");
                index.remove(key);
                remove_file(&path);
                stats.misses += 1;
                None
            }
        }
    }

    fn set(&self, key: &str, value: Value, ttl: Option<Duration>, tags: &[String]) {
        let now = self.clock.now();
        let record = PersistedEntry {
            key: key.to_owned(),
            value,
            created_at: now,
            expires_at: expiry(now, ttl),
            tags: tags.iter().cloned().collect(),
        };

        let mut inner = self.lock();
        let Inner { index, stats } = &mut *inner;

        if !index.contains_key(key) {
            while index.len() >= self.max_size {
                let Some((evicted, _)) = index.pop_lru() else {
                    break;
                };
                remove_file(&self.path_for(&evicted));
                stats.evictions += 1;
                tracing::debug!(key = %evicted, "evicted least-recently-used cache record");
            }
        }

        if let Err(err) = self.write_record(&record) {
            // A stale record must not outlive a failed overwrite.
            tracing::warn!(key, error = %err, "failed to persist cache record");
            if index.remove(key).is_some() {
                remove_file(&self.path_for(key));
            }
            return;
        }

        let meta = Meta {
            expires_at: record.expires_at,
            tags: record.tags,
            hit_count: 0,
        };
        index.insert(record.key, meta);
        stats.sets += 1;
    }

    fn delete(&self, key: &str) -> bool {
        let mut inner = self.lock();
        if inner.index.remove(key).is_none() {
            return false;
        }
        remove_file(&self.path_for(key));
        inner.stats.deletes += 1;
        true
    }

    fn invalidate_by_tag(&self, tag: &str) -> usize {
        let mut inner = self.lock();
        let removed = inner.index.drain_where(|meta| meta.tags.contains(tag));
        for (key, _) in &removed {
            remove_file(&self.path_for(key));
        }
        inner.stats.deletes += removed.len() as u64;
        removed.len()
    }

    fn clear(&self) -> usize {
        let mut inner = self.lock();
        let removed = inner.index.drain_all();
        for (key, _) in &removed {
            remove_file(&self.path_for(key));
        }
        inner.stats.deletes += removed.len() as u64;
        removed.len()
    }

    fn stats(&self) -> CacheStats {
        self.lock().stats
    }

    fn len(&self) -> usize {
        self.lock().index.len()
    }

    fn close(&self) {
        let purged = self.purge_expired();
        tracing::debug!(dir = %self.dir.display(), purged, "closed file cache");
    }
}

fn record_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{}.json", hex::encode(Sha256::digest(key.as_bytes()))))
}

fn read_record(path: &Path) -> Result<PersistedEntry, String> {
    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
    serde_json::from_slice(&bytes).map_err(|e| e.to_string())
}

fn remove_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove cache record"),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use serde_json::json;
    use tempfile::TempDir;

    fn open(dir: &Path, max_size: usize, clock: &Arc<ManualClock>) -> FileCache {
        FileCache::open_with_clock(dir, max_size, clock.clone()).expect("open cache")
    }

    #[test]
    fn state_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::default());
        {
            let cache = open(tmp.path(), 10, &clock);
            cache.set(
                "issue:PROJ-1",
                json!({"summary": "Login"}),
                Some(Duration::from_secs(300)),
                &["epic:PROJ-1".to_string()],
            );
            cache.close();
        }

        let cache = open(tmp.path(), 10, &clock);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("issue:PROJ-1"), Some(json!({"summary": "Login"})));
        assert_eq!(cache.hit_count("issue:PROJ-1"), Some(1));
        assert_eq!(cache.invalidate_by_tag("epic:PROJ-1"), 1, "tags persisted");
    }

    #[test]
    fn corrupt_record_is_a_miss_not_an_error() {
        let tmp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::default());
        let cache = open(tmp.path(), 10, &clock);
        cache.set("k", json!(1), None, &[]);

        std::fs::write(cache.path_for("k"), b"{not json").unwrap();

        assert_eq!(cache.get("k"), None);
        assert!(!cache.path_for("k").exists(), "corrupt record removed");
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn open_skips_corrupt_and_expired_records() {
        let tmp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::default());
        {
            let cache = open(tmp.path(), 10, &clock);
            cache.set("short", json!(1), Some(Duration::from_secs(5)), &[]);
            cache.set("long", json!(2), None, &[]);
        }
        std::fs::write(tmp.path().join("garbage.json"), "[]").unwrap();
        std::fs::write(tmp.path().join("leftover.json.tmp"), "{}").unwrap();
        clock.advance(Duration::from_secs(10));

        let cache = open(tmp.path(), 10, &clock);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("long"), Some(json!(2)));
        assert!(!tmp.path().join("garbage.json").exists());
        assert!(!tmp.path().join("leftover.json.tmp").exists());
    }

    #[test]
    fn eviction_removes_record_file() {
        let tmp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::default());
        let cache = open(tmp.path(), 2, &clock);
        cache.set("a", json!(1), None, &[]);
        cache.set("b", json!(2), None, &[]);
        cache.get("a");
        cache.set("c", json!(3), None, &[]);

        assert!(!cache.path_for("b").exists());
        assert!(cache.path_for("a").exists());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn expired_record_is_lazily_removed() {
        let tmp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::default());
        let cache = open(tmp.path(), 10, &clock);
        cache.set("k", json!(1), Some(Duration::from_secs(1)), &[]);
        clock.advance(Duration::from_secs(2));

        assert_eq!(cache.get("k"), None);
        assert!(!cache.path_for("k").exists());
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn clear_empties_directory_records() {
        let tmp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::default());
        let cache = open(tmp.path(), 10, &clock);
        cache.set("a", json!(1), None, &[]);
        cache.set("b", json!(2), None, &[]);

        assert_eq!(cache.clear(), 2);
        let remaining = std::fs::read_dir(tmp.path()).unwrap().count();
        assert_eq!(remaining, 0);
    }
}
