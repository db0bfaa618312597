//! Tracker backed by a local JSON state file.
//!
//! Each call loads the file, applies the operation, and (for mutations)
//! writes it back with the atomic `.tmp` + rename pattern. A missing file
//! reads as an empty tracker.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use storysync_core::{EntityKey, EntitySnapshot};

use super::{Mutation, Tracker, TrackerState};
use crate::error::TrackerError;

#[derive(Debug)]
pub struct FileTracker {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<TrackerState, TrackerError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(TrackerState::default()),
            Err(source) => {
                return Err(TrackerError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save(&self, state: &TrackerState) -> Result<(), TrackerError> {
        let io = |path: &Path, source| TrackerError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| io(dir, e))?;
        }
        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| io(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| io(&self.path, e))?;
        Ok(())
    }
}

#[async_trait]
impl Tracker for FileTracker {
    fn name(&self) -> &str {
        "file"
    }

    async fn fetch_entity(&self, key: &EntityKey) -> Result<EntitySnapshot, TrackerError> {
        self.load()?
            .find(key)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(key.clone()))
    }

    async fn fetch_children(&self, parent: &EntityKey) -> Result<Vec<EntitySnapshot>, TrackerError> {
        self.load()?.children(parent)
    }

    async fn apply_mutation(&self, mutation: &Mutation) -> Result<EntityKey, TrackerError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut state = self.load()?;
        let key = state.apply(mutation)?;
        self.save(&state)?;
        tracing::debug!(path = %self.path.display(), %mutation, "tracker state written");
        Ok(key)
    }
}
