//! Namespaced, single-flight front door to a [`CacheBackend`].
//!
//! Keys take the form `<namespace>:<id>` (`issue:PROJ-1`,
//! `children:PROJ-1`). Each namespace carries its own TTL; entries fetched
//! during an epic sync are tagged `epic:<KEY>` so a whole epic can be
//! dropped in one call.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use storysync_core::config::CacheConfig;
use storysync_core::{ConfigError, EntityKey};

use super::{CacheBackend, CacheStats, MemoryCache};

// ---------------------------------------------------------------------------
// Namespaces
// ---------------------------------------------------------------------------

/// Category of cached remote data; determines key prefix and default TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheNamespace {
    /// A single entity (`fetch_entity`).
    Issue,
    /// A parent's child listing (`fetch_children`).
    Children,
    Search,
    Transitions,
    Metadata,
}

impl CacheNamespace {
    pub const ALL: [CacheNamespace; 5] = [
        CacheNamespace::Issue,
        CacheNamespace::Children,
        CacheNamespace::Search,
        CacheNamespace::Transitions,
        CacheNamespace::Metadata,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CacheNamespace::Issue => "issue",
            CacheNamespace::Children => "children",
            CacheNamespace::Search => "search",
            CacheNamespace::Transitions => "transitions",
            CacheNamespace::Metadata => "metadata",
        }
    }

    /// Built-in TTL. Workflow data changes rarely; search results go stale
    /// fastest.
    pub fn default_ttl(self) -> Duration {
        match self {
            CacheNamespace::Issue | CacheNamespace::Children => Duration::from_secs(300),
            CacheNamespace::Search => Duration::from_secs(60),
            CacheNamespace::Transitions | CacheNamespace::Metadata => Duration::from_secs(3600),
        }
    }
}

impl fmt::Display for CacheNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheNamespace {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CacheNamespace::ALL
            .into_iter()
            .find(|ns| ns.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = CacheNamespace::ALL.iter().map(|ns| ns.as_str()).collect();
                ConfigError::UnknownCacheNamespace(s.to_string(), known.join(", "))
            })
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

type FlightLock = Arc<tokio::sync::Mutex<()>>;

/// Shared cache handle passed to the orchestrator.
pub struct CacheManager {
    backend: Arc<dyn CacheBackend>,
    ttls: BTreeMap<CacheNamespace, Duration>,
    enabled: bool,
    inflight: Mutex<HashMap<String, FlightLock>>,
}

impl fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheManager")
            .field("ttls", &self.ttls)
            .field("enabled", &self.enabled)
            .field("entries", &self.backend.len())
            .finish_non_exhaustive()
    }
}

impl CacheManager {
    /// Manager with built-in namespace TTLs.
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            ttls: CacheNamespace::ALL
                .into_iter()
                .map(|ns| (ns, ns.default_ttl()))
                .collect(),
            enabled: true,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// In-memory manager; convenient for tests and one-shot runs.
    pub fn in_memory(max_size: usize) -> Self {
        Self::new(Arc::new(MemoryCache::new(max_size)))
    }

    /// Apply TTL overrides and the `enabled` switch from config.
    pub fn from_config(
        config: &CacheConfig,
        backend: Arc<dyn CacheBackend>,
    ) -> Result<Self, ConfigError> {
        let mut manager = Self::new(backend);
        for (name, secs) in &config.namespace_ttl_secs {
            let ns: CacheNamespace = name.parse()?;
            manager.ttls.insert(ns, Duration::from_secs(*secs));
        }
        manager.enabled = config.enabled;
        Ok(manager)
    }

    pub fn with_ttl(mut self, ns: CacheNamespace, ttl: Duration) -> Self {
        self.ttls.insert(ns, ttl);
        self
    }

    /// A disabled manager passes every read straight to the factory.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn ttl(&self, ns: CacheNamespace) -> Duration {
        self.ttls.get(&ns).copied().unwrap_or_else(|| ns.default_ttl())
    }

    pub fn key(ns: CacheNamespace, id: &str) -> String {
        format!("{}:{id}", ns.as_str())
    }

    pub fn epic_tag(epic: &EntityKey) -> String {
        format!("epic:{epic}")
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Cached value for `key`, or the factory's result (stored on success).
    ///
    /// Concurrent callers missing the same key share one factory call: the
    /// first becomes the leader, the rest wait on a per-key lock and re-read
    /// the cache once it is released. Factory errors are not cached.
    pub async fn get_or_set<E, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        tags: &[String],
        factory: F,
    ) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        self.single_flight(key, ttl, tags, factory, Some, |v| Some(v.clone()))
            .await
    }

    /// Typed variant of [`get_or_set`](Self::get_or_set) using the
    /// namespace TTL. A cached value that no longer decodes as `T` is
    /// dropped and refetched.
    pub async fn get_or_fetch<T, E, F, Fut>(
        &self,
        ns: CacheNamespace,
        id: &str,
        tags: &[String],
        factory: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = Self::key(ns, id);
        self.single_flight(
            &key,
            Some(self.ttl(ns)),
            tags,
            factory,
            |value| serde_json::from_value(value).ok(),
            |item| serde_json::to_value(item).ok(),
        )
        .await
    }

    async fn single_flight<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        tags: &[String],
        factory: F,
        decode: impl Fn(Value) -> Option<T>,
        encode: impl Fn(&T) -> Option<Value>,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.enabled {
            return factory().await;
        }

        // Lookup and flight registration happen under one lock, so a caller
        // either hits or joins the current flight.
        let (flight, leader) = {
            let mut inflight = self.lock_inflight();
            if let Some(hit) = self.lookup(key, &decode) {
                return Ok(hit);
            }
            match inflight.get(key) {
                Some(flight) => (flight.clone(), false),
                None => {
                    let flight = FlightLock::default();
                    inflight.insert(key.to_owned(), flight.clone());
                    (flight, true)
                }
            }
        };

        let _turn = flight.lock().await;
        let _registration = leader.then(|| Registration {
            manager: self,
            key,
            flight: flight.clone(),
        });

        if !leader {
            if let Some(hit) = self.lookup(key, &decode) {
                return Ok(hit);
            }
            tracing::debug!(key, "leader fetch did not populate cache, fetching");
        }

        let item = factory().await?;
        match encode(&item) {
            Some(value) => self.backend.set(key, value, ttl, tags),
            None => tracing::warn!(key, "value could not be encoded for caching"),
        }
        Ok(item)
    }

    fn lookup<T>(&self, key: &str, decode: &impl Fn(Value) -> Option<T>) -> Option<T> {
        let value = self.backend.get(key)?;
        let decoded = decode(value);
        if decoded.is_none() {
            tracing::warn!(key, "cached value has unexpected shape, dropping");
            self.backend.delete(key);
        }
        decoded
    }

    fn lock_inflight(&self) -> MutexGuard<'_, HashMap<String, FlightLock>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Invalidation
    // -----------------------------------------------------------------------

    /// Drop the cached entity record for `key`.
    pub fn invalidate_entity(&self, key: &EntityKey) -> bool {
        self.backend
            .delete(&Self::key(CacheNamespace::Issue, key.as_str()))
    }

    /// Drop the cached child listing of `parent`.
    pub fn invalidate_children(&self, parent: &EntityKey) -> bool {
        self.backend
            .delete(&Self::key(CacheNamespace::Children, parent.as_str()))
    }

    /// Drop everything fetched while syncing `epic`.
    pub fn invalidate_epic(&self, epic: &EntityKey) -> usize {
        self.backend.invalidate_by_tag(&Self::epic_tag(epic))
    }

    pub fn clear(&self) -> usize {
        self.backend.clear()
    }

    pub fn stats(&self) -> CacheStats {
        self.backend.stats()
    }

    pub fn len(&self) -> usize {
        self.backend.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backend.is_empty()
    }

    pub fn close(&self) {
        self.backend.close();
    }
}

/// Removes the leader's flight entry once the leader is done, including
/// when its future is dropped mid-fetch.
struct Registration<'a> {
    manager: &'a CacheManager,
    key: &'a str,
    flight: FlightLock,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut inflight = self.manager.lock_inflight();
        if inflight
            .get(self.key)
            .is_some_and(|current| Arc::ptr_eq(current, &self.flight))
        {
            inflight.remove(self.key);
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn namespace_parse_and_defaults() {
        assert_eq!("issue".parse::<CacheNamespace>(), Ok(CacheNamespace::Issue));
        assert_eq!(CacheNamespace::Search.default_ttl(), Duration::from_secs(60));
        let err = "bogus".parse::<CacheNamespace>().unwrap_err();
        assert!(err.to_string().contains("children"));
    }

    #[test]
    fn config_overrides_namespace_ttl() {
        let mut config = CacheConfig::default();
        config.namespace_ttl_secs.insert("issue".into(), 30);
        let manager = CacheManager::from_config(&config, Arc::new(MemoryCache::new(10))).unwrap();
        assert_eq!(manager.ttl(CacheNamespace::Issue), Duration::from_secs(30));
        assert_eq!(manager.ttl(CacheNamespace::Children), Duration::from_secs(300));

        config.namespace_ttl_secs.insert("nope".into(), 1);
        assert!(CacheManager::from_config(&config, Arc::new(MemoryCache::new(10))).is_err());
    }

    #[tokio::test]
    async fn get_or_set_invokes_factory_once_then_hits() {
        let manager = CacheManager::in_memory(10);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: Result<Value, String> = manager
                .get_or_set("issue:PROJ-1", None, &[], || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!("fetched"))
                })
                .await;
            assert_eq!(value.unwrap(), json!("fetched"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.stats().hits, 2);
    }

    #[tokio::test]
    async fn factory_errors_are_not_cached() {
        let manager = CacheManager::in_memory(10);
        let first: Result<Value, &str> = manager
            .get_or_set("k", None, &[], || async { Err("boom") })
            .await;
        assert_eq!(first, Err("boom"));
        assert!(manager.is_empty());

        let second: Result<Value, &str> = manager
            .get_or_set("k", None, &[], || async { Ok(json!(1)) })
            .await;
        assert_eq!(second, Ok(json!(1)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_share_one_factory_call() {
        let manager = Arc::new(CacheManager::in_memory(10));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let manager = manager.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .get_or_set::<String, _, _>("children:PROJ-1", None, &[], || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(json!(["PROJ-100"]))
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), json!(["PROJ-100"]));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(manager.lock_inflight().is_empty(), "flight entry cleaned up");
    }

    #[tokio::test]
    async fn typed_fetch_and_epic_invalidation() {
        let manager = CacheManager::in_memory(10);
        let epic = EntityKey::parse("PROJ-1").unwrap();
        let tags = vec![CacheManager::epic_tag(&epic)];

        let summary: Result<String, String> = manager
            .get_or_fetch(CacheNamespace::Issue, "PROJ-100", &tags, || async {
                Ok("Login".to_string())
            })
            .await;
        assert_eq!(summary.unwrap(), "Login");
        assert_eq!(manager.len(), 1);

        assert_eq!(manager.invalidate_epic(&epic), 1);
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn undecodable_cached_value_is_refetched() {
        let manager = CacheManager::in_memory(10);
        manager
            .backend()
            .set("issue:PROJ-1", json!({"unexpected": true}), None, &[]);

        let value: Result<u32, String> = manager
            .get_or_fetch(CacheNamespace::Issue, "PROJ-1", &[], || async { Ok(7) })
            .await;
        assert_eq!(value.unwrap(), 7);
    }

    #[tokio::test]
    async fn disabled_manager_always_calls_factory() {
        let manager = CacheManager::in_memory(10).with_enabled(false);
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            let _: Result<Value, String> = manager
                .get_or_set("k", None, &[], || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!(1))
                })
                .await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(manager.is_empty());
    }
}
