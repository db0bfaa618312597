//! Error types for storysync-engine.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use storysync_core::{ConfigError, CoreError, EntityKey};

/// HTTP status trackers use to signal rate-limit pressure.
pub const TOO_MANY_REQUESTS: u16 = 429;

/// Failures reported by a tracker adapter.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// The tracker asked us to slow down (HTTP 429 or equivalent).
    #[error("rate limited by tracker{}", retry_hint(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    /// Network failure or 5xx; the caller may retry the pass.
    #[error("transient tracker failure: {0}")]
    Transient(String),

    #[error("entity {0} not found")]
    NotFound(EntityKey),

    /// The tracker rejected the payload.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("tracker returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Local state file of a file-backed tracker could not be read or written.
    #[error("tracker state I/O at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("tracker state JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TrackerError {
    /// Status code equivalent, used to feed the rate limiter.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            TrackerError::RateLimited { .. } => Some(TOO_MANY_REQUESTS),
            TrackerError::NotFound(_) => Some(404),
            TrackerError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Network, 5xx, and rate-limit failures. Everything else is permanent
    /// for the item it happened on.
    pub fn is_transient(&self) -> bool {
        match self {
            TrackerError::RateLimited { .. } | TrackerError::Transient(_) => true,
            TrackerError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(wait) => format!(" (retry after {}s)", wait.as_secs()),
        None => String::new(),
    }
}

fn count_items(ids: &[String]) -> String {
    match ids.len() {
        1 => "1 local item".to_string(),
        n => format!("{n} local items"),
    }
}

fn join(items: &[String]) -> String {
    items.join(", ")
}

/// All errors that can arise from a sync pass.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("tracker error: {0}")]
    Tracker(#[from] TrackerError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Declared stories or subtasks have no remote counterpart and
    /// creation is disabled. Subtasks are listed as `<story id>/<n>`.
    #[error(
        "{} in {epic} without a remote match (create_missing is off): {}",
        count_items(.local_refs),
        join(.local_refs)
    )]
    NoIdentityMatch {
        epic: EntityKey,
        local_refs: Vec<String>,
    },

    /// Remote reads failed; no mutations were submitted.
    #[error("failed to fetch remote state: {}", join(.failures))]
    Fetch { failures: Vec<String> },

    #[error("sync pass was cancelled")]
    Cancelled,
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
