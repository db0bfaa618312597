//! Error types for storysync-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from loading and persisting local state (config, backups).
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying I/O failure, annotated with the path that was touched.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization error (backup store).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Parse error on load — includes file path and line context.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A backup file existed but could not be decoded.
    #[error("failed to decode backup at {path}: {source}")]
    BackupDecode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// No backup with the requested id exists for the epic.
    #[error("backup '{backup_id}' not found for epic {epic_key}")]
    BackupNotFound { epic_key: String, backup_id: String },

    /// `dirs::home_dir()` returned `None` — cannot locate `~/.storysync/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// An entity identifier was empty or whitespace.
    #[error("invalid entity key {0:?}: identifiers must be non-empty")]
    InvalidKey(String),

    /// A value that becomes a file name would escape its directory.
    #[error("{kind} {value:?} cannot be used as a file name")]
    UnsafePathComponent { kind: &'static str, value: String },
}

/// Configuration misuse, rejected at construction time.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("rate must be positive, got {0}")]
    NonPositiveRate(f64),

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("unknown cache backend '{0}'; expected: memory, file")]
    UnknownCacheBackend(String),

    #[error("unknown cache namespace '{0}'; expected one of: {1}")]
    UnknownCacheNamespace(String, String),

    #[error("unknown tracker '{name}'; registered: {known}")]
    UnknownTracker { name: String, known: String },
}

/// Convenience constructor for [`CoreError::Io`].
pub fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CoreError {
    CoreError::Io {
        path: path.into(),
        source,
    }
}
