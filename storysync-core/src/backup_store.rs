//! Backup store — point-in-time snapshots of an epic, one JSON file each.
//!
//! Layout: `<home>/.storysync/backups/<epic_key>/<backup_id>.json`.
//! Writes use the same atomic `.tmp` + rename pattern as the config file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::config::root_at;
use crate::error::{io_err, CoreError};
use crate::types::{Backup, EntityKey};

/// `<home>/.storysync/backups/<epic_key>/`
pub fn epic_dir_at(home: &Path, epic: &EntityKey) -> Result<PathBuf, CoreError> {
    let name = path_component("epic key", epic.as_str())?;
    Ok(root_at(home).join("backups").join(name))
}

/// Path to one backup file — pure, no I/O.
pub fn backup_path_at(home: &Path, epic: &EntityKey, backup_id: &str) -> Result<PathBuf, CoreError> {
    let id = path_component("backup id", backup_id)?;
    Ok(epic_dir_at(home, epic)?.join(format!("{id}.json")))
}

/// Rejects names that are not a single plain path segment.
fn path_component<'a>(kind: &'static str, value: &'a str) -> Result<&'a str, CoreError> {
    if value.is_empty() || value == "." || value.contains("..") || value.contains(['/', '\\']) {
        return Err(CoreError::UnsafePathComponent {
            kind,
            value: value.to_string(),
        });
    }
    Ok(value)
}

/// Save `backup` atomically.
///
/// Writes to `<path>.tmp` then renames to `<path>`.
pub fn save_at(home: &Path, backup: &Backup) -> Result<PathBuf, CoreError> {
    let dir = epic_dir_at(home, &backup.epic_key)?;
    std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

    let path = backup_path_at(home, &backup.epic_key, &backup.backup_id)?;
    let json = serde_json::to_string_pretty(backup)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, &path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(&path, e));
    }
    Ok(path)
}

/// Load a single backup by id.
pub fn load_at(home: &Path, epic: &EntityKey, backup_id: &str) -> Result<Backup, CoreError> {
    let path = backup_path_at(home, epic, backup_id)?;
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(CoreError::BackupNotFound {
                epic_key: epic.to_string(),
                backup_id: backup_id.to_string(),
            })
        }
        Err(err) => return Err(io_err(&path, err)),
    };
    serde_json::from_str(&contents).map_err(|source| CoreError::BackupDecode { path, source })
}

/// All backups for `epic`, newest first.
///
/// Files that fail to decode are skipped so one damaged backup does not hide
/// the others.
pub fn list_at(home: &Path, epic: &EntityKey) -> Result<Vec<Backup>, CoreError> {
    let dir = epic_dir_at(home, epic)?;
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(vec![]),
        Err(err) => return Err(io_err(&dir, err)),
    };

    let mut backups = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_err(&dir, e))?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        match serde_json::from_str::<Backup>(&contents) {
            Ok(backup) => backups.push(backup),
            Err(_) => continue,
        }
    }
    backups.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.backup_id.cmp(&a.backup_id))
    });
    Ok(backups)
}

/// Most recent backup for `epic`, if any.
pub fn latest_at(home: &Path, epic: &EntityKey) -> Result<Option<Backup>, CoreError> {
    Ok(list_at(home, epic)?.into_iter().next())
}
