//! Domain types shared by the reconciliation engine and the CLI.
//!
//! Remote state is captured as [`EntitySnapshot`]s; the local declaration is
//! a list of [`Story`] values. Both serialize with serde (JSON for backups,
//! YAML for declaration documents).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identifier of a remote tracker entity (`PROJ-123`).
///
/// Always non-empty; construction through [`EntityKey::parse`] or serde
/// rejects blank identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityKey(String);

impl EntityKey {
    pub fn parse(raw: impl Into<String>) -> Result<Self, CoreError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CoreError::InvalidKey(raw));
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<String> for EntityKey {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for EntityKey {
    type Error = CoreError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<EntityKey> for String {
    fn from(key: EntityKey) -> Self {
        key.0
    }
}

impl AsRef<str> for EntityKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Description
// ---------------------------------------------------------------------------

/// Description body as the tracker reports it.
///
/// Trackers that store rich text return a node document (`{"type": "doc",
/// "content": [...]}`); others return plain text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Description {
    Plain(String),
    Rich(Value),
}

impl Description {
    /// Comparable text: leaf `"text"` nodes concatenated in document order.
    pub fn plain_text(&self) -> String {
        match self {
            Description::Plain(text) => text.clone(),
            Description::Rich(doc) => {
                let mut out = String::new();
                collect_text(doc, &mut out);
                out
            }
        }
    }
}

impl From<&str> for Description {
    fn from(s: &str) -> Self {
        Description::Plain(s.to_owned())
    }
}

impl From<String> for Description {
    fn from(s: String) -> Self {
        Description::Plain(s)
    }
}

fn collect_text(node: &Value, out: &mut String) {
    match node {
        Value::String(s) => out.push_str(s),
        Value::Array(items) => {
            for item in items {
                collect_text(item, out);
            }
        }
        Value::Object(map) => {
            if let Some(Value::String(text)) = map.get("text") {
                out.push_str(text);
            }
            if let Some(content) = map.get("content") {
                collect_text(content, out);
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Remote snapshots
// ---------------------------------------------------------------------------

/// Observed fields of a remote entity at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub key: EntityKey,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Description>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimate: Option<f64>,
    #[serde(default)]
    pub subtasks: Vec<EntitySnapshot>,
}

impl EntitySnapshot {
    pub fn new(key: EntityKey, summary: impl Into<String>) -> Self {
        Self {
            key,
            summary: summary.into(),
            description: None,
            status: None,
            estimate: None,
            subtasks: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<Description>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_estimate(mut self, estimate: f64) -> Self {
        self.estimate = Some(estimate);
        self
    }

    pub fn with_subtasks(mut self, subtasks: Vec<EntitySnapshot>) -> Self {
        self.subtasks = subtasks;
        self
    }
}

/// A point-in-time capture of every entity under an epic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub backup_id: String,
    pub epic_key: EntityKey,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub snapshots: Vec<EntitySnapshot>,
}

impl Backup {
    /// New backup with a generated id (`<yyyymmddThhmmss>-<8 hex>`).
    pub fn new(epic_key: EntityKey, snapshots: Vec<EntitySnapshot>) -> Self {
        let created_at = Utc::now();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            backup_id: format!("{}-{}", created_at.format("%Y%m%dT%H%M%S"), &suffix[..8]),
            epic_key,
            created_at,
            snapshots,
        }
    }
}

// ---------------------------------------------------------------------------
// Local declaration
// ---------------------------------------------------------------------------

/// A subtask declared under a local story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_key: Option<EntityKey>,
}

/// A story as declared in the local document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    /// Local identifier (`US-001`), stable across edits of the title.
    pub id: String,
    pub title: String,
    /// Linked remote entity, once the story has been synced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_key: Option<EntityKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_points: Option<f64>,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
}

/// Root of a local declaration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StoryDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epic: Option<EntityKey>,
    #[serde(default)]
    pub stories: Vec<Story>,
}

impl StoryDocument {
    pub fn from_yaml(path: &std::path::Path, contents: &str) -> Result<Self, CoreError> {
        serde_yaml::from_str(contents).map_err(|source| CoreError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
