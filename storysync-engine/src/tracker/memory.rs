//! In-process tracker with call counting and fault injection.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use storysync_core::{Description, EntityKey, EntitySnapshot};

use super::{Mutation, Tracker};
use crate::error::TrackerError;

// ---------------------------------------------------------------------------
// State tree
// ---------------------------------------------------------------------------

/// Entity tree plus the key allocator; also the on-disk form of
/// [`FileTracker`](super::FileTracker) state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerState {
    /// Key prefix for created entities (`PROJ` → `PROJ-201`).
    pub project: String,
    pub next_id: u64,
    /// Top-level entities (epics); stories and subtasks nest below.
    #[serde(default)]
    pub entities: Vec<EntitySnapshot>,
}

impl Default for TrackerState {
    fn default() -> Self {
        Self::new("LOCAL")
    }
}

impl TrackerState {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            next_id: 1,
            entities: Vec::new(),
        }
    }

    pub fn with_entity(mut self, entity: EntitySnapshot) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn find(&self, key: &EntityKey) -> Option<&EntitySnapshot> {
        find_in(&self.entities, key)
    }

    fn find_mut(&mut self, key: &EntityKey) -> Option<&mut EntitySnapshot> {
        find_in_mut(&mut self.entities, key)
    }

    pub fn children(&self, parent: &EntityKey) -> Result<Vec<EntitySnapshot>, TrackerError> {
        self.find(parent)
            .map(|entity| entity.subtasks.clone())
            .ok_or_else(|| TrackerError::NotFound(parent.clone()))
    }

    /// Apply `mutation`, returning the affected or created key.
    pub fn apply(&mut self, mutation: &Mutation) -> Result<EntityKey, TrackerError> {
        match mutation {
            Mutation::Update { key, update } => {
                if update.summary.as_deref().is_some_and(|s| s.trim().is_empty()) {
                    return Err(TrackerError::Validation(format!("{key}: summary must not be empty")));
                }
                let entity = self
                    .find_mut(key)
                    .ok_or_else(|| TrackerError::NotFound(key.clone()))?;
                if let Some(summary) = &update.summary {
                    entity.summary = summary.clone();
                }
                if let Some(description) = &update.description {
                    entity.description = Some(Description::Plain(description.clone()));
                }
                if let Some(estimate) = update.estimate {
                    entity.estimate = Some(estimate);
                }
                Ok(key.clone())
            }
            Mutation::Transition { key, status } => {
                let entity = self
                    .find_mut(key)
                    .ok_or_else(|| TrackerError::NotFound(key.clone()))?;
                entity.status = Some(status.clone());
                Ok(key.clone())
            }
            Mutation::Create { parent, entity } => {
                if entity.summary.trim().is_empty() {
                    return Err(TrackerError::Validation("summary must not be empty".into()));
                }
                let key = EntityKey::parse(format!("{}-{}", self.project, self.next_id))
                    .map_err(|e| TrackerError::Validation(e.to_string()))?;
                let parent_entity = self
                    .find_mut(parent)
                    .ok_or_else(|| TrackerError::NotFound(parent.clone()))?;
                let mut created = EntitySnapshot::new(key.clone(), entity.summary.clone());
                created.description = entity.description.clone().map(Description::Plain);
                created.status = entity.status.clone();
                created.estimate = entity.estimate;
                parent_entity.subtasks.push(created);
                self.next_id += 1;
                Ok(key)
            }
        }
    }
}

fn find_in<'a>(entities: &'a [EntitySnapshot], key: &EntityKey) -> Option<&'a EntitySnapshot> {
    entities.iter().find_map(|entity| {
        if &entity.key == key {
            Some(entity)
        } else {
            find_in(&entity.subtasks, key)
        }
    })
}

fn find_in_mut<'a>(
    entities: &'a mut [EntitySnapshot],
    key: &EntityKey,
) -> Option<&'a mut EntitySnapshot> {
    for entity in entities {
        if &entity.key == key {
            return Some(entity);
        }
        if let Some(found) = find_in_mut(&mut entity.subtasks, key) {
            return Some(found);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Faults
// ---------------------------------------------------------------------------

/// Failure an [`InMemoryTracker`] raises for a given key.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    RateLimited,
    Transient(String),
    Validation(String),
}

impl Fault {
    fn to_error(&self) -> TrackerError {
        match self {
            Fault::RateLimited => TrackerError::RateLimited { retry_after: None },
            Fault::Transient(msg) => TrackerError::Transient(msg.clone()),
            Fault::Validation(msg) => TrackerError::Validation(msg.clone()),
        }
    }
}

#[derive(Debug, Default)]
struct Calls {
    entity: HashMap<EntityKey, usize>,
    children: HashMap<EntityKey, usize>,
    mutations: Vec<Mutation>,
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryTracker {
    state: Mutex<TrackerState>,
    calls: Mutex<Calls>,
    faults: Mutex<HashMap<EntityKey, Fault>>,
    latency: Option<Duration>,
}

impl InMemoryTracker {
    pub fn new(project: impl Into<String>) -> Self {
        Self::from_state(TrackerState::new(project))
    }

    pub fn from_state(state: TrackerState) -> Self {
        Self {
            state: Mutex::new(state),
            ..Self::default()
        }
    }

    /// Every call sleeps this long first.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail every call that reads or writes `key` (creates: their parent).
    pub fn inject_fault(&self, key: &EntityKey, fault: Fault) {
        lock(&self.faults).insert(key.clone(), fault);
    }

    pub fn clear_faults(&self) {
        lock(&self.faults).clear();
    }

    pub fn snapshot(&self) -> TrackerState {
        lock(&self.state).clone()
    }

    /// Mutate state directly, bypassing call counters and faults.
    pub fn edit<R>(&self, f: impl FnOnce(&mut TrackerState) -> R) -> R {
        f(&mut *lock(&self.state))
    }

    pub fn entity_fetches(&self, key: &EntityKey) -> usize {
        lock(&self.calls).entity.get(key).copied().unwrap_or(0)
    }

    pub fn children_fetches(&self, parent: &EntityKey) -> usize {
        lock(&self.calls).children.get(parent).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        let calls = lock(&self.calls);
        calls.entity.values().sum::<usize>() + calls.children.values().sum::<usize>()
    }

    /// Mutations attempted, in arrival order (failed ones included).
    pub fn mutations(&self) -> Vec<Mutation> {
        lock(&self.calls).mutations.clone()
    }

    async fn enter(&self, key: &EntityKey) -> Result<(), TrackerError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match lock(&self.faults).get(key) {
            Some(fault) => Err(fault.to_error()),
            None => Ok(()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl Tracker for InMemoryTracker {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch_entity(&self, key: &EntityKey) -> Result<EntitySnapshot, TrackerError> {
        *lock(&self.calls).entity.entry(key.clone()).or_default() += 1;
        self.enter(key).await?;
        lock(&self.state)
            .find(key)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(key.clone()))
    }

    async fn fetch_children(&self, parent: &EntityKey) -> Result<Vec<EntitySnapshot>, TrackerError> {
        *lock(&self.calls).children.entry(parent.clone()).or_default() += 1;
        self.enter(parent).await?;
        lock(&self.state).children(parent)
    }

    async fn apply_mutation(&self, mutation: &Mutation) -> Result<EntityKey, TrackerError> {
        lock(&self.calls).mutations.push(mutation.clone());
        self.enter(mutation.subject()).await?;
        lock(&self.state).apply(mutation)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
