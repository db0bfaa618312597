use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;

use storysync_core::{EntityKey, EntitySnapshot};
use storysync_engine::{FileTracker, TrackerState};
use tempfile::TempDir;

fn key(raw: &str) -> EntityKey {
    EntityKey::parse(raw).expect("key")
}

fn storysync_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("storysync"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG");
    cmd
}

fn tracker_path(home: &Path) -> PathBuf {
    home.join(".storysync").join("tracker.json")
}

/// Epic PROJ-1 holding story PROJ-100 (Open) with one subtask.
fn seed_tracker(home: &Path) {
    let state = TrackerState {
        project: "PROJ".into(),
        next_id: 200,
        entities: vec![EntitySnapshot::new(key("PROJ-1"), "Epic").with_subtasks(vec![
            EntitySnapshot::new(key("PROJ-100"), "Login")
                .with_status("Open")
                .with_subtasks(vec![EntitySnapshot::new(key("PROJ-101"), "Build form")]),
        ])],
    };
    FileTracker::new(tracker_path(home)).save(&state).expect("seed tracker");
}

fn load_tracker(home: &Path) -> TrackerState {
    FileTracker::new(tracker_path(home)).load().expect("load tracker")
}

fn write_document(dir: &Path) -> PathBuf {
    let path = dir.join("stories.yaml");
    fs::write(
        &path,
        r#"epic: PROJ-1
stories:
  - id: US-001
    title: Login
    status: Done
  - id: US-002
    title: Logout
    subtasks:
      - title: Add button
"#,
    )
    .expect("write document");
    path
}

// ---------------------------------------------------------------------------
// Backups and diff
// ---------------------------------------------------------------------------

#[test]
fn diff_against_backup_shows_remote_changes() {
    let home = TempDir::new().expect("home");
    seed_tracker(home.path());

    storysync_cmd(home.path())
        .args(["backup", "create", "PROJ-1"])
        .assert()
        .success()
        .stdout(contains("✓ backup"))
        .stdout(contains("1 stories"));

    let mut state = load_tracker(home.path());
    let stories = &mut state.entities[0].subtasks;
    stories[0].status = Some("Done".into());
    stories.push(EntitySnapshot::new(key("PROJ-200"), "Logout"));
    FileTracker::new(tracker_path(home.path())).save(&state).expect("save");

    storysync_cmd(home.path())
        .args(["diff", "PROJ-1"])
        .assert()
        .success()
        .stdout(contains("status: Open → Done"))
        .stdout(contains("+ PROJ-200 Logout"))
        .stdout(contains("1 changed, 1 new, 0 deleted"));
}

#[test]
fn diff_without_backup_explains_what_to_do() {
    let home = TempDir::new().expect("home");
    seed_tracker(home.path());

    storysync_cmd(home.path())
        .args(["diff", "PROJ-1"])
        .assert()
        .failure()
        .stderr(contains("storysync backup create PROJ-1"));
}

#[test]
fn backup_list_shows_saved_backups() {
    let home = TempDir::new().expect("home");
    seed_tracker(home.path());

    storysync_cmd(home.path())
        .args(["backup", "list", "PROJ-1"])
        .assert()
        .success()
        .stdout(contains("No backups for PROJ-1."));

    storysync_cmd(home.path())
        .args(["backup", "create", "PROJ-1"])
        .assert()
        .success();

    storysync_cmd(home.path())
        .args(["backup", "list", "PROJ-1"])
        .assert()
        .success()
        .stdout(contains("created (UTC)"));
}

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

#[test]
fn dry_run_sync_reports_plan_and_writes_nothing() {
    let home = TempDir::new().expect("home");
    let work = TempDir::new().expect("work");
    seed_tracker(home.path());
    let before = fs::read(tracker_path(home.path())).expect("read");
    let document = write_document(work.path());

    storysync_cmd(home.path())
        .arg("sync")
        .arg(&document)
        .args(["--dry-run", "--create-missing"])
        .assert()
        .success()
        .stdout(contains("[dry-run]"))
        .stdout(contains("transition PROJ-100 → Done"))
        .stdout(contains("create \"Logout\" under PROJ-1"))
        .stdout(contains("create \"Add button\" under new:US-002"));

    let after = fs::read(tracker_path(home.path())).expect("read");
    assert_eq!(before, after, "dry-run must not touch tracker state");
}

#[test]
fn sync_creates_missing_story_with_subtask() {
    let home = TempDir::new().expect("home");
    let work = TempDir::new().expect("work");
    seed_tracker(home.path());
    let document = write_document(work.path());

    storysync_cmd(home.path())
        .arg("sync")
        .arg(&document)
        .arg("--create-missing")
        .assert()
        .success()
        .stdout(contains("3 of 3 operations succeeded"));

    let state = load_tracker(home.path());
    assert_eq!(
        state.find(&key("PROJ-100")).and_then(|e| e.status.as_deref()),
        Some("Done")
    );
    let created = state.find(&key("PROJ-200")).expect("created story");
    assert_eq!(created.summary, "Logout");
    assert_eq!(created.subtasks.len(), 1);
    assert_eq!(created.subtasks[0].key, key("PROJ-201"));
}

#[test]
fn sync_without_create_missing_names_unmatched_stories() {
    let home = TempDir::new().expect("home");
    let work = TempDir::new().expect("work");
    seed_tracker(home.path());
    let document = write_document(work.path());

    storysync_cmd(home.path())
        .arg("sync")
        .arg(&document)
        .assert()
        .failure()
        .stderr(contains("without a remote match"))
        .stderr(contains("US-002"));

    assert!(load_tracker(home.path()).find(&key("PROJ-200")).is_none());
}

#[test]
fn sync_json_output_is_parseable() {
    let home = TempDir::new().expect("home");
    let work = TempDir::new().expect("work");
    seed_tracker(home.path());
    let document = write_document(work.path());

    let output = storysync_cmd(home.path())
        .arg("sync")
        .arg(&document)
        .args(["--dry-run", "--create-missing", "--json"])
        .output()
        .expect("run sync");
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(report["dry_run"], true);
    assert_eq!(report["plan"].as_array().map(Vec::len), Some(3));
    assert_eq!(report["plan"][0]["mutation"]["op"], "transition");
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[test]
fn memory_cache_backend_keeps_nothing() {
    let home = TempDir::new().expect("home");

    storysync_cmd(home.path())
        .args(["cache", "stats"])
        .assert()
        .success()
        .stdout(contains("nothing is kept between runs"));
}

#[test]
fn file_cache_persists_reads_until_cleared() {
    let home = TempDir::new().expect("home");
    let work = TempDir::new().expect("work");
    seed_tracker(home.path());
    fs::write(
        home.path().join(".storysync").join("config.yaml"),
        "cache:\n  backend: file\n",
    )
    .expect("write config");
    let document = work.path().join("login.yaml");
    fs::write(&document, "epic: PROJ-1\nstories:\n  - id: US-001\n    title: Login\n")
        .expect("write document");

    storysync_cmd(home.path())
        .arg("sync")
        .arg(&document)
        .assert()
        .success()
        .stdout(contains("nothing to do"));

    // Child listing of PROJ-1 plus PROJ-100 itself.
    storysync_cmd(home.path())
        .args(["cache", "stats"])
        .assert()
        .success()
        .stdout(contains("entries: 2 / 1000"));

    storysync_cmd(home.path())
        .args(["cache", "clear"])
        .assert()
        .success()
        .stdout(contains("removed 2 cached entries"));

    storysync_cmd(home.path())
        .args(["cache", "stats"])
        .assert()
        .success()
        .stdout(contains("entries: 0 / 1000"));
}
