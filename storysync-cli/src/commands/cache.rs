//! `storysync cache stats|clear` — the persistent read cache.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Serialize;

use storysync_engine::{CacheBackend, FileCache};

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Show entry count and location.
    Stats {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Remove every cached entry.
    Clear,
}

#[derive(Serialize)]
struct CacheStatsJson<'a> {
    dir: &'a Path,
    entries: usize,
    max_size: usize,
}

pub fn run(command: CacheCommand) -> Result<()> {
    let home = super::home()?;
    let config = super::load_config(&home)?;
    if config.cache.backend != "file" {
        println!(
            "Cache backend is '{}'; nothing is kept between runs.",
            config.cache.backend
        );
        return Ok(());
    }

    let dir = config.cache_dir_at(&home);
    let cache = FileCache::open(&dir, config.cache.max_size)
        .with_context(|| format!("failed to open cache at {}", dir.display()))?;

    match command {
        CacheCommand::Stats { json } => {
            let stats = CacheStatsJson {
                dir: cache.dir(),
                entries: cache.len(),
                max_size: config.cache.max_size,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("cache:   {}", stats.dir.display());
                println!("entries: {} / {}", stats.entries, stats.max_size);
            }
        }
        CacheCommand::Clear => {
            let removed = cache.clear();
            println!("✓ removed {removed} cached entries");
        }
    }
    Ok(())
}
