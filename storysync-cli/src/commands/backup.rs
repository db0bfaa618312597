//! `storysync backup create|list <epic>`

use anyhow::{Context, Result};
use clap::Subcommand;
use tabled::{settings::Style, Table, Tabled};

use storysync_core::{backup_store, EntityKey};

use super::parse_key;

#[derive(Subcommand, Debug)]
pub enum BackupCommand {
    /// Snapshot the epic's current remote state.
    Create {
        #[arg(value_parser = parse_key)]
        epic: EntityKey,
    },

    /// List saved backups, newest first.
    List {
        #[arg(value_parser = parse_key)]
        epic: EntityKey,
    },
}

pub fn run(command: BackupCommand) -> Result<()> {
    let home = super::home()?;
    match command {
        BackupCommand::Create { epic } => {
            let orchestrator = super::open_orchestrator(&home)?;
            let outcome = super::runtime()?.block_on(orchestrator.create_backup(&epic));
            orchestrator.close();
            let backup = outcome.with_context(|| format!("backup failed for {epic}"))?;
            let path = backup_store::save_at(&home, &backup)?;
            println!(
                "✓ backup {} of {epic}: {} stories → {}",
                backup.backup_id,
                backup.snapshots.len(),
                path.display()
            );
        }
        BackupCommand::List { epic } => {
            let backups = backup_store::list_at(&home, &epic)?;
            if backups.is_empty() {
                println!("No backups for {epic}.");
                return Ok(());
            }
            let rows: Vec<BackupRow> = backups
                .into_iter()
                .map(|b| BackupRow {
                    id: b.backup_id,
                    created: b.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    stories: b.snapshots.len(),
                })
                .collect();
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
        }
    }
    Ok(())
}

#[derive(Tabled)]
struct BackupRow {
    #[tabled(rename = "backup")]
    id: String,
    #[tabled(rename = "created (UTC)")]
    created: String,
    #[tabled(rename = "stories")]
    stories: usize,
}
