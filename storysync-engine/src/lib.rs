//! # storysync-engine
//!
//! Reconciliation engine: cached remote reads, rate-limited parallel
//! writes, and diffing between local declarations and a tracker.
//!
//! [`SyncOrchestrator`] wires the pieces together; each is usable alone:
//! - [`cache`] — TTL + LRU cache with tag invalidation, memory or file backed
//! - [`rate_limiter`] — token bucket that backs off on 429
//! - [`executor`] — bounded-concurrency batch runner with fail-fast
//! - [`diff`] — field-level diff of entity snapshots
//! - [`tracker`] — the tracker seam and its built-in adapters

pub mod batch;
pub mod cache;
pub mod diff;
pub mod error;
pub mod executor;
pub mod matcher;
pub mod orchestrator;
pub mod rate_limiter;
pub mod tracker;

pub use batch::{BatchOperation, BatchResult, BatchSuccess};
pub use cache::{CacheBackend, CacheManager, CacheNamespace, CacheStats, FileCache, MemoryCache};
pub use diff::{DiffResult, EntityDiff, FieldDiff, FieldValue};
pub use error::{SyncError, TrackerError};
pub use executor::{ParallelExecutor, ParallelResult, RunOptions};
pub use matcher::{match_stories, MatchReport};
pub use orchestrator::{PlannedOperation, SyncOptions, SyncOrchestrator, SyncReport};
pub use rate_limiter::RateLimiter;
pub use tracker::{
    FileTracker, InMemoryTracker, Mutation, Tracker, TrackerRegistry, TrackerState,
};
