//! Config error-message, backup persistence, and model decoding integration tests.

use assert_fs::prelude::*;
use predicates::prelude::predicate;
use rstest::rstest;
use storysync_core::{
    backup_store, config,
    types::{Backup, Description, EntityKey, EntitySnapshot},
    CoreError,
};

fn epic() -> EntityKey {
    EntityKey::parse("PROJ-1").expect("key")
}

// ---------------------------------------------------------------------------
// 1. Config load errors
// ---------------------------------------------------------------------------

#[test]
fn wrong_shape_config_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".storysync/config.yaml")
        .write_str("- this is a list, not a mapping\n")
        .expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, CoreError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"));
}

#[test]
fn saved_config_is_owner_only() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    config::save_at(home.path(), &config::StorysyncConfig::default()).expect("save");

    home.child(".storysync/config.yaml")
        .assert(predicate::path::exists());
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(config::config_path_at(home.path()))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600);
    }
}

// ---------------------------------------------------------------------------
// 2. Backups
// ---------------------------------------------------------------------------

#[test]
fn backup_file_lands_under_epic_directory() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let backup = Backup::new(
        epic(),
        vec![EntitySnapshot::new(EntityKey::parse("PROJ-100").unwrap(), "Login")],
    );
    backup_store::save_at(home.path(), &backup).expect("save");

    home.child(format!(".storysync/backups/PROJ-1/{}.json", backup.backup_id))
        .assert(predicate::str::contains("PROJ-100"));
}

#[test]
fn corrupt_backup_surfaces_decode_error() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".storysync/backups/PROJ-1/broken.json")
        .write_str("{\"backup_id\": ")
        .expect("write");

    let err = backup_store::load_at(home.path(), &epic(), "broken").unwrap_err();
    assert!(matches!(err, CoreError::BackupDecode { .. }), "got: {err}");
}

// ---------------------------------------------------------------------------
// 3. Snapshot decoding
// ---------------------------------------------------------------------------

#[rstest]
#[case(r#"{"key": "PROJ-1", "summary": "s"}"#, true)]
#[case(r#"{"key": "  ", "summary": "s"}"#, false)]
#[case(r#"{"summary": "s"}"#, false)]
#[case(r#"{"key": "PROJ-2", "summary": "s", "subtasks": [{"key": "", "summary": "c"}]}"#, false)]
fn snapshot_decoding_requires_identifiers(#[case] raw: &str, #[case] ok: bool) {
    assert_eq!(serde_json::from_str::<EntitySnapshot>(raw).is_ok(), ok);
}

#[rstest]
#[case(Description::Plain("Same text".into()))]
#[case(Description::Rich(serde_json::json!({
    "type": "doc",
    "content": [{"type": "paragraph", "content": [{"type": "text", "text": "Same text"}]}]
})))]
#[case(Description::Rich(serde_json::json!({
    "type": "doc",
    "content": [
        {"type": "paragraph", "content": [
            {"type": "text", "text": "Same "},
            {"type": "text", "text": "text"}
        ]}
    ]
})))]
fn description_layouts_reduce_to_same_text(#[case] description: Description) {
    assert_eq!(description.plain_text(), "Same text");
}
