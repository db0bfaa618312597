//! The seam between the engine and a concrete issue tracker.
//!
//! Adapters implement [`Tracker`] and are constructed by name through a
//! [`TrackerRegistry`]. Two adapters ship with the engine:
//! - `memory` — [`InMemoryTracker`], state lost on exit; used in tests
//! - `file` — [`FileTracker`], state in a JSON file; used by the CLI

mod file;
mod memory;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use storysync_core::{ConfigError, EntityKey, EntitySnapshot, StorysyncConfig};

use crate::error::{SyncError, TrackerError};

pub use file::FileTracker;
pub use memory::{Fault, InMemoryTracker, TrackerState};

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

/// Field changes for an existing entity; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimate: Option<f64>,
}

impl FieldUpdate {
    pub fn is_empty(&self) -> bool {
        self.summary.is_none() && self.description.is_none() && self.estimate.is_none()
    }
}

/// Initial fields of an entity to create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEntity {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimate: Option<f64>,
}

/// One unit of remote write work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    Update { key: EntityKey, update: FieldUpdate },
    Transition { key: EntityKey, status: String },
    Create { parent: EntityKey, entity: NewEntity },
}

impl Mutation {
    /// The existing entity this mutation writes to; `None` for creates.
    pub fn target(&self) -> Option<&EntityKey> {
        match self {
            Mutation::Update { key, .. } | Mutation::Transition { key, .. } => Some(key),
            Mutation::Create { .. } => None,
        }
    }

    /// Entity whose state a failure of this mutation should be reported on.
    pub fn subject(&self) -> &EntityKey {
        match self {
            Mutation::Update { key, .. } | Mutation::Transition { key, .. } => key,
            Mutation::Create { parent, .. } => parent,
        }
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutation::Update { key, update } => {
                let mut fields = Vec::new();
                if update.summary.is_some() {
                    fields.push("summary");
                }
                if update.description.is_some() {
                    fields.push("description");
                }
                if update.estimate.is_some() {
                    fields.push("estimate");
                }
                write!(f, "update {key} ({})", fields.join(", "))
            }
            Mutation::Transition { key, status } => write!(f, "transition {key} → {status}"),
            Mutation::Create { parent, entity } => {
                write!(f, "create \"{}\" under {parent}", entity.summary)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Tracker: Send + Sync {
    /// Registry name of the adapter.
    fn name(&self) -> &str;

    /// One entity, with its subtasks.
    async fn fetch_entity(&self, key: &EntityKey) -> Result<EntitySnapshot, TrackerError>;

    /// Direct children of `parent`, each with its subtasks.
    async fn fetch_children(&self, parent: &EntityKey) -> Result<Vec<EntitySnapshot>, TrackerError>;

    /// Apply one mutation; returns the key of the affected or created entity.
    async fn apply_mutation(&self, mutation: &Mutation) -> Result<EntityKey, TrackerError>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Builds an adapter from config; `home` anchors relative paths.
pub type TrackerFactory =
    Box<dyn Fn(&StorysyncConfig, &Path) -> Result<Arc<dyn Tracker>, SyncError> + Send + Sync>;

/// Tracker adapters keyed by name.
pub struct TrackerRegistry {
    factories: BTreeMap<String, TrackerFactory>,
}

impl fmt::Debug for TrackerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl Default for TrackerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl TrackerRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with the `memory` and `file` adapters.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("memory", |_, _| Ok(Arc::new(InMemoryTracker::new("MEM"))));
        registry.register("file", |config, home| {
            let tracker = FileTracker::new(config.tracker_path_at(home));
            Ok(Arc::new(tracker))
        });
        registry
    }

    /// Add or replace the factory for `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&StorysyncConfig, &Path) -> Result<Arc<dyn Tracker>, SyncError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn create(
        &self,
        name: &str,
        config: &StorysyncConfig,
        home: &Path,
    ) -> Result<Arc<dyn Tracker>, SyncError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ConfigError::UnknownTracker {
                name: name.to_string(),
                known: self.names().join(", "),
            })?;
        let tracker = factory(config, home)?;
        tracing::debug!(tracker = name, "constructed tracker adapter");
        Ok(tracker)
    }
}
