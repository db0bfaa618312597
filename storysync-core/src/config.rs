//! YAML configuration at `~/.storysync/config.yaml`.
//!
//! # API pattern
//!
//! Every filesystem function has two forms:
//! - `fn_at(home: &Path, …)` — explicit home; used in tests with `TempDir`
//! - `fn(…)` — derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! A missing file yields [`StorysyncConfig::default`]. The loaded value is
//! immutable; components receive the section they need by reference.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError, CoreError};

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Which tracker adapter to construct, plus its options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Registry name of the adapter (`file`, `memory`).
    pub kind: String,
    /// State file for the `file` tracker. Relative paths resolve against
    /// `~/.storysync/`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            kind: "file".to_string(),
            path: None,
        }
    }
}

/// Cache tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// `memory` or `file`.
    pub backend: String,
    /// Ceiling on live entries; least-recently-used entries are evicted.
    pub max_size: usize,
    /// Per-namespace TTL overrides keyed by namespace name (`issue`,
    /// `children`, …). Namespaces not listed keep their built-in TTL.
    pub namespace_ttl_secs: BTreeMap<String, u64>,
    /// Directory for the `file` backend. Relative paths resolve against
    /// `~/.storysync/`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: "memory".to_string(),
            max_size: 1000,
            namespace_ttl_secs: BTreeMap::new(),
            dir: None,
        }
    }
}

/// Token-bucket limits shared by every outbound call in a sync pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_second: f64,
    /// Bucket capacity: how many calls may proceed back-to-back.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10.0,
            burst: 20,
        }
    }
}

/// Parallel batch execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum operations in flight at once.
    pub concurrency: usize,
    /// Stop dispatching after the first failed item.
    pub fail_fast: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            fail_fast: false,
        }
    }
}

/// Root configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorysyncConfig {
    pub tracker: TrackerConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub executor: ExecutorConfig,
}

impl StorysyncConfig {
    /// Reject values that would make a component unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rate = self.rate_limit.requests_per_second;
        if rate.is_nan() || rate <= 0.0 {
            return Err(ConfigError::NonPositiveRate(rate));
        }
        if self.rate_limit.burst == 0 {
            return Err(ConfigError::Zero {
                field: "rate_limit.burst",
            });
        }
        if self.executor.concurrency == 0 {
            return Err(ConfigError::Zero {
                field: "executor.concurrency",
            });
        }
        if self.cache.max_size == 0 {
            return Err(ConfigError::Zero {
                field: "cache.max_size",
            });
        }
        match self.cache.backend.as_str() {
            "memory" | "file" => Ok(()),
            other => Err(ConfigError::UnknownCacheBackend(other.to_string())),
        }
    }

    /// Cache directory, resolved against `~/.storysync/`.
    pub fn cache_dir_at(&self, home: &Path) -> PathBuf {
        resolve(home, self.cache.dir.as_deref(), "cache")
    }

    /// File-tracker state path, resolved against `~/.storysync/`.
    pub fn tracker_path_at(&self, home: &Path) -> PathBuf {
        resolve(home, self.tracker.path.as_deref(), "tracker.json")
    }
}

fn resolve(home: &Path, configured: Option<&Path>, default_name: &str) -> PathBuf {
    match configured {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => root_at(home).join(path),
        None => root_at(home).join(default_name),
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// `<home>/.storysync/`
pub fn root_at(home: &Path) -> PathBuf {
    home.join(".storysync")
}

/// `<home>/.storysync/config.yaml` — pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    root_at(home).join("config.yaml")
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load the config under `home`; callers run [`StorysyncConfig::validate`].
///
/// Returns defaults when the file does not exist,
/// `CoreError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(home: &Path) -> Result<StorysyncConfig, CoreError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(StorysyncConfig::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    let config: StorysyncConfig =
        serde_yaml::from_str(&contents).map_err(|source| CoreError::Parse {
            path: path.clone(),
            source,
        })?;
    Ok(config)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<StorysyncConfig, CoreError> {
    load_at(&home()?)
}

/// Atomically write `config` to `<home>/.storysync/config.yaml`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &StorysyncConfig) -> Result<(), CoreError> {
    let root = root_at(home);
    std::fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    let path = config_path_at(home);
    let tmp = path.with_extension("yaml.tmp");

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

pub fn home() -> Result<PathBuf, CoreError> {
    dirs::home_dir().ok_or(CoreError::HomeNotFound)
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), CoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_when_file_missing() {
        let home = TempDir::new().expect("tempdir");
        let config = load_at(home.path()).expect("load");
        assert_eq!(config, StorysyncConfig::default());
        assert_eq!(config.executor.concurrency, 5);
        assert_eq!(config.cache.max_size, 1000);
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn partial_file_fills_remaining_defaults() {
        let home = TempDir::new().expect("tempdir");
        std::fs::create_dir_all(root_at(home.path())).unwrap();
        std::fs::write(
            config_path_at(home.path()),
            "executor:\n  concurrency: 2\ncache:\n  namespace_ttl_secs:\n    issue: 30\n",
        )
        .unwrap();

        let config = load_at(home.path()).expect("load");
        assert_eq!(config.executor.concurrency, 2);
        assert!(!config.executor.fail_fast);
        assert_eq!(config.cache.namespace_ttl_secs.get("issue"), Some(&30));
        assert_eq!(config.rate_limit.burst, 20);
    }

    #[test]
    fn malformed_yaml_reports_path() {
        let home = TempDir::new().expect("tempdir");
        std::fs::create_dir_all(root_at(home.path())).unwrap();
        std::fs::write(config_path_at(home.path()), "executor: [unclosed").unwrap();

        let err = load_at(home.path()).unwrap_err();
        assert!(matches!(err, CoreError::Parse { .. }));
        assert!(err.to_string().contains("config.yaml"));
    }

    #[test]
    fn save_roundtrip_and_tmp_cleanup() {
        let home = TempDir::new().expect("tempdir");
        let mut config = StorysyncConfig::default();
        config.cache.backend = "file".to_string();
        save_at(home.path(), &config).expect("save");

        let tmp = config_path_at(home.path()).with_extension("yaml.tmp");
        assert!(!tmp.exists(), ".tmp must be gone after successful save");
        assert_eq!(load_at(home.path()).unwrap(), config);
    }

    #[test]
    fn validate_rejects_misuse() {
        let mut config = StorysyncConfig::default();
        config.rate_limit.requests_per_second = 0.0;
        assert_eq!(config.validate(), Err(ConfigError::NonPositiveRate(0.0)));

        let mut config = StorysyncConfig::default();
        config.executor.concurrency = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Zero { .. })));

        let mut config = StorysyncConfig::default();
        config.cache.backend = "redis".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownCacheBackend(_))
        ));
    }

    #[test]
    fn relative_paths_resolve_under_root() {
        let home = TempDir::new().expect("tempdir");
        let mut config = StorysyncConfig::default();
        assert_eq!(
            config.cache_dir_at(home.path()),
            home.path().join(".storysync").join("cache")
        );
        config.tracker.path = Some(PathBuf::from("state/tracker.json"));
        assert_eq!(
            config.tracker_path_at(home.path()),
            home.path().join(".storysync/state/tracker.json")
        );
    }
}
