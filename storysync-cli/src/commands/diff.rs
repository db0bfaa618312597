//! `storysync diff <epic>` — remote changes since a backup.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use storysync_core::{backup_store, EntityKey};
use storysync_engine::{DiffResult, EntityDiff, FieldDiff, FieldValue};

use super::parse_key;

/// Arguments for `storysync diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Epic to diff.
    #[arg(value_parser = parse_key)]
    pub epic: EntityKey,

    /// Backup id to diff against (default: the newest).
    #[arg(long)]
    pub backup: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl DiffArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let epic = &self.epic;
        let backup = match &self.backup {
            Some(id) => backup_store::load_at(&home, epic, id)?,
            None => backup_store::latest_at(&home, epic)?.with_context(|| {
                format!("no backups for {epic}; run `storysync backup create {epic}` first")
            })?,
        };

        let orchestrator = super::open_orchestrator(&home)?;
        let outcome = super::runtime()?.block_on(orchestrator.diff_backup(&backup));
        orchestrator.close();
        let diff = outcome.with_context(|| format!("diff failed for {epic}"))?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&diff)?);
            return Ok(());
        }

        if !diff.has_changes() {
            println!("No differences for {epic} since backup {}.", backup.backup_id);
            return Ok(());
        }

        println!(
            "{} vs backup {} ({})",
            epic.to_string().bold(),
            backup.backup_id,
            backup.created_at.format("%Y-%m-%d %H:%M UTC")
        );
        for entity in &diff.diffs {
            print_entity(entity, 1);
        }
        print_summary(&diff);
        Ok(())
    }
}

fn print_entity(entity: &EntityDiff, depth: usize) {
    if !entity.has_changes() {
        return;
    }
    let indent = "  ".repeat(depth);
    let line = format!("{} {}", entity.entity_key, entity.summary);
    if entity.is_new {
        println!("{indent}{} {}", "+".green().bold(), line.green());
    } else if entity.is_deleted {
        println!("{indent}{} {}", "-".red().bold(), line.red());
    } else if entity.fields.is_empty() {
        println!("{indent}  {line}");
    } else {
        println!("{indent}{} {line}", "~".yellow().bold());
    }

    for field in &entity.fields {
        print_field(field, depth + 2);
    }
    for child in &entity.children {
        print_entity(child, depth + 1);
    }
}

fn print_field(field: &FieldDiff, depth: usize) {
    let indent = "  ".repeat(depth);
    if field.field_name == "description" {
        println!("{indent}{}:", field.field_name);
        for line in field.text_diff().lines() {
            println!("{indent}  {line}");
        }
        return;
    }
    let show = |value: &Option<FieldValue>| match value {
        Some(value) => format!("{value}"),
        None => "(none)".to_string(),
    };
    println!(
        "{indent}{}: {} → {}",
        field.field_name,
        show(&field.old_value).red(),
        show(&field.new_value).green()
    );
}

fn print_summary(diff: &DiffResult) {
    println!(
        "{} changed, {} new, {} deleted, {} unchanged ({} changes)",
        diff.changed_entities(),
        diff.new_entities(),
        diff.deleted_entities(),
        diff.unchanged_entities(),
        diff.total_changes()
    );
}
