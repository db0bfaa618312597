//! Reconciliation calculator: snapshot vs. current state.
//!
//! Entities are matched by key, never by position. Tracked fields are
//! reduced to comparable values first: rich-text descriptions become their
//! plain text, so two documents with the same text but different node
//! layout compare equal. No I/O happens here.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Serialize;
use similar::TextDiff;

use storysync_core::{Backup, EntityKey, EntitySnapshot};

// ---------------------------------------------------------------------------
// Field level
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Number(f64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(text) => f.write_str(text),
            FieldValue::Number(n) if n.fract() == 0.0 => write!(f, "{n:.0}"),
            FieldValue::Number(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDiff {
    pub field_name: String,
    pub old_value: Option<FieldValue>,
    pub new_value: Option<FieldValue>,
    pub changed: bool,
}

impl FieldDiff {
    /// `changed` is derived from old/new equality.
    pub fn new(
        field_name: impl Into<String>,
        old_value: Option<FieldValue>,
        new_value: Option<FieldValue>,
    ) -> Self {
        let changed = old_value != new_value;
        Self {
            field_name: field_name.into(),
            old_value,
            new_value,
            changed,
        }
    }

    pub fn with_changed(mut self, changed: bool) -> Self {
        self.changed = changed;
        self
    }

    pub fn added(&self) -> bool {
        self.old_value.is_none() && self.new_value.is_some()
    }

    pub fn removed(&self) -> bool {
        self.old_value.is_some() && self.new_value.is_none()
    }

    pub fn modified(&self) -> bool {
        matches!((&self.old_value, &self.new_value), (Some(old), Some(new)) if old != new)
    }

    /// Unified line diff of old → new, for multi-line text fields.
    pub fn text_diff(&self) -> String {
        let old = self.old_value.as_ref().map(ToString::to_string).unwrap_or_default();
        let new = self.new_value.as_ref().map(ToString::to_string).unwrap_or_default();
        TextDiff::from_lines(&old, &new)
            .unified_diff()
            .header("old", "new")
            .context_radius(2)
            .to_string()
    }
}

// ---------------------------------------------------------------------------
// Entity level
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityDiff {
    pub entity_key: EntityKey,
    pub summary: String,
    /// Only fields whose value differs.
    pub fields: Vec<FieldDiff>,
    pub children: Vec<EntityDiff>,
    pub is_new: bool,
    pub is_deleted: bool,
}

impl EntityDiff {
    pub fn has_changes(&self) -> bool {
        self.is_new
            || self.is_deleted
            || self.fields.iter().any(|f| f.changed)
            || self.children.iter().any(EntityDiff::has_changes)
    }

    /// Own changed fields plus all descendant changes. A new or deleted
    /// entity counts at least once.
    pub fn change_count(&self) -> usize {
        let mut own = self.fields.iter().filter(|f| f.changed).count();
        if self.is_new || self.is_deleted {
            own = own.max(1);
        }
        own + self
            .children
            .iter()
            .map(EntityDiff::change_count)
            .sum::<usize>()
    }

    pub fn field(&self, name: &str) -> Option<&FieldDiff> {
        self.fields.iter().find(|f| f.field_name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffResult {
    pub backup_id: String,
    pub epic_key: EntityKey,
    pub diffs: Vec<EntityDiff>,
}

impl DiffResult {
    pub fn total_entities(&self) -> usize {
        self.diffs.len()
    }

    /// Entities present on both sides with at least one change.
    pub fn changed_entities(&self) -> usize {
        self.diffs
            .iter()
            .filter(|d| !d.is_new && !d.is_deleted && d.has_changes())
            .count()
    }

    pub fn new_entities(&self) -> usize {
        self.diffs.iter().filter(|d| d.is_new).count()
    }

    pub fn deleted_entities(&self) -> usize {
        self.diffs.iter().filter(|d| d.is_deleted).count()
    }

    pub fn unchanged_entities(&self) -> usize {
        self.diffs.iter().filter(|d| !d.has_changes()).count()
    }

    pub fn total_changes(&self) -> usize {
        self.diffs.iter().map(EntityDiff::change_count).sum()
    }

    pub fn has_changes(&self) -> bool {
        self.diffs.iter().any(EntityDiff::has_changes)
    }

    pub fn get(&self, key: &EntityKey) -> Option<&EntityDiff> {
        self.diffs.iter().find(|d| &d.entity_key == key)
    }
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

/// Diff `current` against a backup taken earlier.
pub fn diff_backup(backup: &Backup, current: &[EntitySnapshot]) -> DiffResult {
    compare(&backup.backup_id, &backup.epic_key, &backup.snapshots, current)
}

pub fn compare(
    backup_id: &str,
    epic_key: &EntityKey,
    snapshot: &[EntitySnapshot],
    current: &[EntitySnapshot],
) -> DiffResult {
    DiffResult {
        backup_id: backup_id.to_string(),
        epic_key: epic_key.clone(),
        diffs: diff_entities(snapshot, current),
    }
}

/// Snapshot entities first, in snapshot order; then entities only present
/// in `current`, in current order. A key repeated within one side is
/// compared once, using its first occurrence.
pub fn diff_entities(snapshot: &[EntitySnapshot], current: &[EntitySnapshot]) -> Vec<EntityDiff> {
    let mut by_key: HashMap<&EntityKey, &EntitySnapshot> = HashMap::new();
    for entity in current {
        by_key.entry(&entity.key).or_insert(entity);
    }

    let mut seen: HashSet<&EntityKey> = HashSet::new();
    let mut diffs = Vec::new();

    for old in snapshot {
        if !seen.insert(&old.key) {
            continue;
        }
        match by_key.get(&old.key) {
            Some(new) => diffs.push(diff_pair(old, new)),
            None => diffs.push(one_sided(old, false)),
        }
    }

    for new in current {
        if seen.insert(&new.key) {
            diffs.push(one_sided(new, true));
        }
    }

    diffs
}

fn diff_pair(old: &EntitySnapshot, new: &EntitySnapshot) -> EntityDiff {
    let before = tracked_fields(old);
    let after = tracked_fields(new);
    let fields = before
        .into_iter()
        .zip(after)
        .map(|((name, old_value), (_, new_value))| FieldDiff::new(name, old_value, new_value))
        .filter(|diff| diff.changed)
        .collect();

    EntityDiff {
        entity_key: new.key.clone(),
        summary: new.summary.clone(),
        fields,
        children: diff_entities(&old.subtasks, &new.subtasks),
        is_new: false,
        is_deleted: false,
    }
}

/// Entity present on one side only; its children are one-sided too.
fn one_sided(entity: &EntitySnapshot, is_new: bool) -> EntityDiff {
    EntityDiff {
        entity_key: entity.key.clone(),
        summary: entity.summary.clone(),
        fields: Vec::new(),
        children: entity
            .subtasks
            .iter()
            .map(|child| one_sided(child, is_new))
            .collect(),
        is_new,
        is_deleted: !is_new,
    }
}

fn tracked_fields(entity: &EntitySnapshot) -> [(&'static str, Option<FieldValue>); 4] {
    [
        ("summary", text(Some(entity.summary.clone()))),
        ("description", text(entity.description.as_ref().map(|d| d.plain_text()))),
        ("status", text(entity.status.clone())),
        ("estimate", entity.estimate.map(FieldValue::Number)),
    ]
}

fn text(value: Option<String>) -> Option<FieldValue> {
    value.map(FieldValue::Text)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
