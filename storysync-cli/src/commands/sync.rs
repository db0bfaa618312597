//! `storysync sync <stories.yaml>` — push declared stories to an epic.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use storysync_core::{EntityKey, StoryDocument};
use storysync_engine::{SyncOptions, SyncReport};

use super::parse_key;

/// Arguments for `storysync sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Story document (YAML) to push.
    pub document: PathBuf,

    /// Epic to sync into; defaults to the document's `epic` field.
    #[arg(long, value_parser = parse_key)]
    pub epic: Option<EntityKey>,

    /// Plan and report without writing to the tracker.
    #[arg(long)]
    pub dry_run: bool,

    /// Create stories and subtasks that have no remote match.
    #[arg(long)]
    pub create_missing: bool,

    /// Emit the full report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let contents = std::fs::read_to_string(&self.document)
            .with_context(|| format!("failed to read {}", self.document.display()))?;
        let document = StoryDocument::from_yaml(&self.document, &contents)?;
        let epic = self
            .epic
            .clone()
            .or_else(|| document.epic.clone())
            .context("no epic given: pass --epic or set `epic:` in the document")?;

        let orchestrator = super::open_orchestrator(&home)?;
        let options = SyncOptions {
            dry_run: self.dry_run,
            create_missing: self.create_missing,
            progress: None,
        };
        let cancel = orchestrator.cancel_token();
        let outcome = super::runtime()?.block_on(async {
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            });
            orchestrator.sync_epic(&epic, &document.stories, options).await
        });
        orchestrator.close();
        let report = outcome.with_context(|| format!("sync failed for {epic}"))?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&report);
        }

        if !report.batch.success() {
            bail!(
                "{} of {} operations failed",
                report.batch.failed(),
                report.batch.total()
            );
        }
        Ok(())
    }
}

fn print_report(report: &SyncReport) {
    let prefix = if report.dry_run { "[dry-run] " } else { "" };
    let epic = &report.epic_key;

    for (story_id, key) in &report.matches.duplicates {
        println!(
            "{} '{story_id}' links {key}, already claimed by an earlier story; skipped",
            "!".yellow().bold()
        );
    }

    if report.is_noop() {
        println!(
            "{prefix}✓ {epic} — nothing to do ({} stories matched)",
            report.matches.matched.len()
        );
        return;
    }

    let diff = &report.diff;
    println!(
        "{prefix}{} {epic}: {} of {} operations succeeded ({} changed, {} new, {} remote-only)",
        if report.batch.success() { "✓".green() } else { "✗".red() },
        report.batch.succeeded(),
        report.batch.total(),
        diff.changed_entities(),
        diff.new_entities(),
        diff.deleted_entities(),
    );

    for (planned, outcome) in report.plan.iter().zip(&report.batch.operations) {
        let marker = match (outcome.success, report.dry_run) {
            (true, true) => "~".normal(),
            (true, false) => "✎".green(),
            (false, _) => "✗".red(),
        };
        println!("  {marker}  {:<12} {}", planned.local_ref, planned.mutation);
        if !outcome.success {
            println!("       {}", outcome.error.red());
        }
    }
}
