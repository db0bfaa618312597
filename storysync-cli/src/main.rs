//! storysync — reconcile local story documents with an issue tracker.
//!
//! # Usage
//!
//! ```text
//! storysync sync <stories.yaml> [--epic KEY] [--dry-run] [--create-missing] [--json]
//! storysync diff <epic> [--backup ID] [--json]
//! storysync backup create|list <epic>
//! storysync cache stats|clear
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{backup::BackupCommand, cache::CacheCommand, diff::DiffArgs, sync::SyncArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "storysync",
    version,
    about = "Reconcile local story documents with an issue tracker",
    long_about = None,
)]
struct Cli {
    /// Log engine activity at debug level (`RUST_LOG` overrides).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Push a story document's stories and subtasks to an epic.
    Sync(SyncArgs),

    /// Show what changed remotely since a backup.
    Diff(DiffArgs),

    /// Capture or list point-in-time snapshots of an epic.
    Backup {
        #[command(subcommand)]
        command: BackupCommand,
    },

    /// Inspect or clear the persistent read cache.
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Sync(args) => args.run(),
        Commands::Diff(args) => args.run(),
        Commands::Backup { command } => commands::backup::run(command),
        Commands::Cache { command } => commands::cache::run(command),
    }
}

/// Logs go to stderr so `--json` output stays parseable.
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
