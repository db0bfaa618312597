pub mod backup;
pub mod cache;
pub mod diff;
pub mod sync;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use storysync_core::{config, EntityKey, StorysyncConfig};
use storysync_engine::{SyncOrchestrator, TrackerRegistry};

pub(crate) fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

pub(crate) fn load_config(home: &Path) -> Result<StorysyncConfig> {
    let config = config::load_at(home).context("failed to load ~/.storysync/config.yaml")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

pub(crate) fn open_orchestrator(home: &Path) -> Result<SyncOrchestrator> {
    let config = load_config(home)?;
    SyncOrchestrator::open(&config, home, &TrackerRegistry::with_builtins())
        .context("failed to set up the sync engine")
}

pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

/// clap value parser for entity keys.
pub(crate) fn parse_key(raw: &str) -> Result<EntityKey, String> {
    EntityKey::parse(raw).map_err(|e| e.to_string())
}
