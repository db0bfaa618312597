//! Sync orchestrator: the composition root of a reconciliation pass.
//!
//! `sync_epic` runs, in order:
//! 1. fetch the epic's children through the cache
//! 2. match declared stories to remote entities
//! 3. fetch every matched entity through the cache (one remote call per
//!    missing key, however many declarations point at it)
//! 4. diff declared vs. remote and derive a mutation plan
//! 5. apply the plan through the executor with the shared rate limiter,
//!    invalidating affected cache entries after each successful write
//!
//! Stories are written in a first wave; subtasks of stories created in that
//! wave go in a second wave once their parent keys are known. Dry-run takes
//! the same path but answers every mutation with a synthetic success.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use storysync_core::{
    Backup, ConfigError, Description, EntityKey, EntitySnapshot, Story, StorysyncConfig,
};

use crate::batch::{BatchOperation, BatchResult, BatchSuccess, NOT_STARTED};
use crate::cache::{CacheBackend, CacheManager, CacheNamespace, FileCache, MemoryCache};
use crate::diff::{self, DiffResult};
use crate::error::{SyncError, TrackerError};
use crate::executor::{ParallelExecutor, ProgressCallback, RunOptions};
use crate::matcher::{match_stories, match_subtasks, MatchReport};
use crate::rate_limiter::RateLimiter;
use crate::tracker::{FieldUpdate, Mutation, NewEntity, Tracker, TrackerRegistry};

/// `backup_id` of diffs computed against the local declaration.
pub const DECLARED: &str = "declared";

// ---------------------------------------------------------------------------
// Options and report
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct SyncOptions {
    /// Plan and report without writing to the tracker.
    pub dry_run: bool,
    /// Create declared items that have no remote match instead of failing.
    pub create_missing: bool,
    /// `(completed, total)` over the whole plan; second-wave items blocked
    /// by their parent count as completed.
    pub progress: Option<ProgressCallback>,
}

impl fmt::Debug for SyncOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOptions")
            .field("dry_run", &self.dry_run)
            .field("create_missing", &self.create_missing)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// One planned write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedOperation {
    /// Story id, or `<story id>/<n>` for the n-th declared subtask.
    pub local_ref: String,
    pub mutation: Mutation,
    /// Parent whose child listing the write makes stale.
    pub parent: EntityKey,
    /// Story whose creation supplies `parent`; such operations run in the
    /// second wave.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub epic_key: EntityKey,
    pub dry_run: bool,
    pub matches: MatchReport,
    /// Remote state (old side) vs. declaration (new side).
    pub diff: DiffResult,
    /// Indexed like `batch.operations`.
    pub plan: Vec<PlannedOperation>,
    pub batch: BatchResult,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        self.plan.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Tracker, cache, and limiter handles shared by spawned batch items.
#[derive(Clone)]
struct Remote {
    tracker: Arc<dyn Tracker>,
    cache: Arc<CacheManager>,
    limiter: Arc<RateLimiter>,
}

impl Remote {
    /// Forward rate-limit pressure to the limiter.
    fn observe(&self, err: &TrackerError) {
        if let Some(code) = err.status_code() {
            self.limiter.update_from_response_code(code);
        }
    }

    async fn fetch_entity(
        &self,
        key: &EntityKey,
        tags: &[String],
    ) -> Result<EntitySnapshot, TrackerError> {
        self.cache
            .get_or_fetch(CacheNamespace::Issue, key.as_str(), tags, || async move {
                self.limiter.acquire().await;
                tracing::debug!(%key, "fetching entity");
                self.tracker.fetch_entity(key).await.map_err(|e| {
                    self.observe(&e);
                    e
                })
            })
            .await
    }

    async fn fetch_children(
        &self,
        parent: &EntityKey,
        tags: &[String],
    ) -> Result<Vec<EntitySnapshot>, TrackerError> {
        self.cache
            .get_or_fetch(CacheNamespace::Children, parent.as_str(), tags, || async move {
                self.limiter.acquire().await;
                tracing::debug!(%parent, "fetching children");
                self.tracker.fetch_children(parent).await.map_err(|e| {
                    self.observe(&e);
                    e
                })
            })
            .await
    }

    async fn apply(
        &self,
        planned: PlannedOperation,
        epic: &EntityKey,
        dry_run: bool,
    ) -> Result<BatchSuccess, SyncError> {
        if dry_run {
            let key = match planned.mutation.target() {
                Some(key) => key.clone(),
                None => placeholder(&planned.local_ref)?,
            };
            return Ok(BatchSuccess::new(key).with_data(json!({
                "dry_run": true,
                "operation": planned.mutation.to_string(),
            })));
        }

        let key = self
            .tracker
            .apply_mutation(&planned.mutation)
            .await
            .map_err(|e| {
                self.observe(&e);
                e
            })?;
        tracing::info!(local_ref = %planned.local_ref, %key, "applied {}", planned.mutation);

        self.cache.invalidate_entity(&key);
        self.cache.invalidate_entity(&planned.parent);
        self.cache.invalidate_children(&planned.parent);
        if &planned.parent != epic {
            self.cache.invalidate_children(epic);
        }
        Ok(BatchSuccess::new(key))
    }
}

pub struct SyncOrchestrator {
    remote: Remote,
    executor: ParallelExecutor,
    cancel: CancellationToken,
}

impl fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("tracker", &self.remote.tracker.name())
            .field("cache", &self.remote.cache)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl SyncOrchestrator {
    pub fn new(
        tracker: Arc<dyn Tracker>,
        cache: Arc<CacheManager>,
        limiter: Arc<RateLimiter>,
        executor: ParallelExecutor,
    ) -> Self {
        Self {
            remote: Remote {
                tracker,
                cache,
                limiter,
            },
            executor,
            cancel: CancellationToken::new(),
        }
    }

    /// Build every component from config. `home` anchors relative paths.
    pub fn open(
        config: &StorysyncConfig,
        home: &Path,
        registry: &TrackerRegistry,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let tracker = registry.create(&config.tracker.kind, config, home)?;
        let backend: Arc<dyn CacheBackend> = match config.cache.backend.as_str() {
            "memory" => Arc::new(MemoryCache::new(config.cache.max_size)),
            "file" => Arc::new(FileCache::open(
                config.cache_dir_at(home),
                config.cache.max_size,
            )?),
            other => return Err(ConfigError::UnknownCacheBackend(other.to_string()).into()),
        };
        let cache = CacheManager::from_config(&config.cache, backend)?;
        let limiter = RateLimiter::from_config(&config.rate_limit)?;
        let executor = ParallelExecutor::from_config(&config.executor)?;
        Ok(Self::new(tracker, Arc::new(cache), Arc::new(limiter), executor))
    }

    /// Flush the cache backend; call once at the end of a session.
    pub fn close(&self) {
        let stats = self.remote.cache.stats();
        tracing::debug!(
            hits = stats.hits,
            misses = stats.misses,
            hit_rate = stats.hit_rate(),
            "closing sync session"
        );
        self.remote.cache.close();
    }

    /// Cancelling stops dispatch of further writes; items already running
    /// finish and are reported. The token cannot be reset.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.remote.cache
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.remote.limiter
    }

    pub fn tracker(&self) -> &Arc<dyn Tracker> {
        &self.remote.tracker
    }

    // -----------------------------------------------------------------------
    // Backups
    // -----------------------------------------------------------------------

    /// Capture the epic's current children. Always reads fresh state.
    pub async fn create_backup(&self, epic: &EntityKey) -> Result<Backup, SyncError> {
        self.remote.cache.invalidate_children(epic);
        let snapshots = self
            .remote
            .fetch_children(epic, &[CacheManager::epic_tag(epic)])
            .await?;
        tracing::info!(%epic, entities = snapshots.len(), "captured backup");
        Ok(Backup::new(epic.clone(), snapshots))
    }

    /// Diff current remote state (through the cache) against `backup`.
    pub async fn diff_backup(&self, backup: &Backup) -> Result<DiffResult, SyncError> {
        let epic = &backup.epic_key;
        let current = self
            .remote
            .fetch_children(epic, &[CacheManager::epic_tag(epic)])
            .await?;
        Ok(diff::diff_backup(backup, &current))
    }

    // -----------------------------------------------------------------------
    // Sync
    // -----------------------------------------------------------------------

    pub async fn sync_epic(
        &self,
        epic: &EntityKey,
        stories: &[Story],
        options: SyncOptions,
    ) -> Result<SyncReport, SyncError> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let tags = vec![CacheManager::epic_tag(epic)];

        let listing = self.remote.fetch_children(epic, &tags).await?;
        let matches = match_stories(stories, &listing);
        for (story_id, key) in &matches.duplicates {
            tracing::warn!(story_id, %key, "entity already linked by an earlier story, skipping");
        }
        if !options.create_missing && !matches.unmatched_local.is_empty() {
            return Err(SyncError::NoIdentityMatch {
                epic: epic.clone(),
                local_refs: matches
                    .unmatched_local
                    .iter()
                    .map(|&i| stories[i].id.clone())
                    .collect(),
            });
        }

        let fetched = self.fetch_matched(&matches, &tags).await?;
        let pairs = pair_up(stories, &matches, &fetched)?;

        let unmatched_subtasks: Vec<String> = pairs
            .iter()
            .filter(|pair| pair.remote.is_some())
            .flat_map(|pair| &pair.subtasks)
            .filter(|sub| sub.remote.is_none())
            .map(|sub| sub.local_ref.clone())
            .collect();
        if !options.create_missing && !unmatched_subtasks.is_empty() {
            return Err(SyncError::NoIdentityMatch {
                epic: epic.clone(),
                local_refs: unmatched_subtasks,
            });
        }

        let diff = declared_diff(epic, &pairs, &listing, &matches);
        let plan = plan_operations(epic, &pairs)?;
        tracing::info!(
            %epic,
            matched = matches.matched.len(),
            operations = plan.len(),
            dry_run = options.dry_run,
            "sync plan ready"
        );

        let (plan, batch) = self.apply_plan(epic, plan, &options).await;
        Ok(SyncReport {
            epic_key: epic.clone(),
            dry_run: options.dry_run,
            matches,
            diff,
            plan,
            batch,
        })
    }

    /// Current state of every matched key, one cached fetch per key.
    async fn fetch_matched(
        &self,
        matches: &MatchReport,
        tags: &[String],
    ) -> Result<HashMap<EntityKey, EntitySnapshot>, SyncError> {
        let mut seen = HashSet::new();
        let keys: Vec<EntityKey> = matches
            .matched
            .iter()
            .map(|m| m.key.clone())
            .filter(|key| seen.insert(key.clone()))
            .collect();

        let remote = self.remote.clone();
        let tags: Arc<[String]> = tags.into();
        let run = self
            .executor
            .run_all(
                keys.clone(),
                move |key: EntityKey| {
                    let remote = remote.clone();
                    let tags = tags.clone();
                    async move { remote.fetch_entity(&key, &tags).await }
                },
                RunOptions {
                    cancel: Some(self.cancel.clone()),
                    ..RunOptions::default()
                },
            )
            .await;

        if !run.skipped.is_empty() {
            return Err(SyncError::Cancelled);
        }
        if !run.errors.is_empty() {
            return Err(SyncError::Fetch {
                failures: run
                    .errors
                    .iter()
                    .map(|(i, err)| format!("{}: {err}", keys[*i]))
                    .collect(),
            });
        }
        Ok(run
            .results
            .into_iter()
            .map(|(i, snapshot)| (keys[i].clone(), snapshot))
            .collect())
    }

    /// Run wave one, then wave two with parent keys resolved.
    async fn apply_plan(
        &self,
        epic: &EntityKey,
        plan: Vec<PlannedOperation>,
        options: &SyncOptions,
    ) -> (Vec<PlannedOperation>, BatchResult) {
        let (first, second): (Vec<_>, Vec<_>) =
            plan.into_iter().partition(|op| op.depends_on.is_none());
        let total = first.len() + second.len();

        let progress = offset_progress(options.progress.as_ref(), 0, total);
        let mut batch = self.run_wave(epic, first.clone(), options.dry_run, progress).await;
        let mut created: HashMap<&str, &EntityKey> = HashMap::new();
        for (op, outcome) in first.iter().zip(&batch.operations) {
            if let (Mutation::Create { .. }, Some(key)) = (&op.mutation, &outcome.key) {
                created.insert(op.local_ref.as_str(), key);
            }
        }

        let halted = self.cancel.is_cancelled()
            || batch.operations.iter().any(|op| op.error == NOT_STARTED)
            || (self.executor.fail_fast() && !batch.success());

        let mut runnable = Vec::new();
        let mut blocked: Vec<Option<String>> = Vec::with_capacity(second.len());
        let mut resolved_plan = Vec::with_capacity(second.len());
        for mut op in second {
            let parent = op.depends_on.as_deref().and_then(|r| created.get(r)).copied();
            let reason = match (halted, parent) {
                (true, _) => Some(NOT_STARTED.to_string()),
                (false, None) => Some(format!(
                    "parent story {} was not created",
                    op.depends_on.as_deref().unwrap_or_default()
                )),
                (false, Some(parent)) => {
                    if let Mutation::Create { parent: target, .. } = &mut op.mutation {
                        *target = parent.clone();
                    }
                    op.parent = parent.clone();
                    runnable.push(op.clone());
                    None
                }
            };
            blocked.push(reason);
            resolved_plan.push(op);
        }

        let completed = first.len() + blocked.iter().flatten().count();
        if let Some(progress) = &options.progress {
            for done in first.len() + 1..=completed {
                progress(done, total);
            }
        }

        // Ran operations come back in submission order; splice them between
        // the blocked ones.
        let progress = offset_progress(options.progress.as_ref(), completed, total);
        let mut ran = self
            .run_wave(epic, runnable, options.dry_run, progress)
            .await
            .operations
            .into_iter();
        let operations = blocked
            .into_iter()
            .enumerate()
            .map(|(index, reason)| {
                let outcome = match reason {
                    Some(reason) => BatchOperation::failed(index, reason),
                    None => ran
                        .next()
                        .unwrap_or_else(|| BatchOperation::failed(index, NOT_STARTED)),
                };
                BatchOperation { index, ..outcome }
            })
            .collect();
        batch.extend(BatchResult { operations });

        let mut plan = first;
        plan.extend(resolved_plan);
        if !options.dry_run {
            tracing::info!(
                %epic,
                succeeded = batch.succeeded(),
                failed = batch.failed(),
                "sync applied"
            );
        }
        (plan, batch)
    }

    async fn run_wave(
        &self,
        epic: &EntityKey,
        ops: Vec<PlannedOperation>,
        dry_run: bool,
        progress: Option<ProgressCallback>,
    ) -> BatchResult {
        if ops.is_empty() {
            return BatchResult::default();
        }
        let remote = self.remote.clone();
        let epic = epic.clone();
        let run = self
            .executor
            .run_all(
                ops,
                move |planned: PlannedOperation| {
                    let remote = remote.clone();
                    let epic = epic.clone();
                    async move { remote.apply(planned, &epic, dry_run).await }
                },
                RunOptions {
                    rate_limiter: (!dry_run).then(|| self.remote.limiter.clone()),
                    progress,
                    cancel: Some(self.cancel.clone()),
                },
            )
            .await;
        BatchResult::from_parallel(run)
    }
}

/// Shift a wave's `(done, _)` counts past the items already reported.
fn offset_progress(
    progress: Option<&ProgressCallback>,
    offset: usize,
    total: usize,
) -> Option<ProgressCallback> {
    progress.cloned().map(|inner| {
        let shifted: ProgressCallback = Arc::new(move |done: usize, _: usize| inner(offset + done, total));
        shifted
    })
}

// ---------------------------------------------------------------------------
// Declared vs. remote pairing
// ---------------------------------------------------------------------------

struct SubtaskPair {
    local_ref: String,
    declared: EntitySnapshot,
    remote: Option<EntitySnapshot>,
}

struct StoryPair {
    story_id: String,
    declared: EntitySnapshot,
    remote: Option<EntitySnapshot>,
    subtasks: Vec<SubtaskPair>,
}

/// Key standing in for an entity that does not exist yet.
fn placeholder(local_ref: &str) -> Result<EntityKey, SyncError> {
    Ok(EntityKey::parse(format!("new:{local_ref}"))?)
}

/// Declared fields over remote ones; fields the declaration leaves out keep
/// their remote value.
fn declare(
    key: EntityKey,
    title: &str,
    description: Option<&str>,
    status: Option<&str>,
    estimate: Option<f64>,
    remote: Option<&EntitySnapshot>,
) -> EntitySnapshot {
    EntitySnapshot {
        key,
        summary: title.to_string(),
        description: description
            .map(Description::from)
            .or_else(|| remote.and_then(|r| r.description.clone())),
        status: status
            .map(str::to_string)
            .or_else(|| remote.and_then(|r| r.status.clone())),
        estimate: estimate.or_else(|| remote.and_then(|r| r.estimate)),
        subtasks: Vec::new(),
    }
}

fn pair_up(
    stories: &[Story],
    matches: &MatchReport,
    fetched: &HashMap<EntityKey, EntitySnapshot>,
) -> Result<Vec<StoryPair>, SyncError> {
    let duplicates: HashSet<&str> = matches.duplicates.iter().map(|(id, _)| id.as_str()).collect();
    let mut pairs = Vec::new();

    for (index, story) in stories.iter().enumerate() {
        if duplicates.contains(story.id.as_str()) && matches.key_for(index).is_none() {
            continue;
        }
        let remote = matches.key_for(index).and_then(|key| fetched.get(key));
        let key = match remote {
            Some(remote) => remote.key.clone(),
            None => placeholder(&story.id)?,
        };
        let declared = declare(
            key,
            &story.title,
            story.description.as_deref(),
            story.status.as_deref(),
            story.story_points,
            remote,
        );

        let remote_subtasks: &[EntitySnapshot] = remote.map(|r| r.subtasks.as_slice()).unwrap_or(&[]);
        let sub_keys = match_subtasks(&story.subtasks, remote_subtasks);
        let mut subtasks = Vec::new();
        for (n, (subtask, sub_key)) in story.subtasks.iter().zip(sub_keys).enumerate() {
            let local_ref = format!("{}/{}", story.id, n + 1);
            let sub_remote = sub_key
                .as_ref()
                .and_then(|key| remote_subtasks.iter().find(|r| &r.key == key));
            if sub_key.is_some() && sub_remote.is_none() {
                tracing::warn!(%local_ref, "linked subtask is not under its story remotely, treating as unmatched");
            }
            let key = match sub_remote {
                Some(r) => r.key.clone(),
                None => placeholder(&local_ref)?,
            };
            subtasks.push(SubtaskPair {
                declared: declare(
                    key,
                    &subtask.title,
                    subtask.description.as_deref(),
                    subtask.status.as_deref(),
                    subtask.estimate,
                    sub_remote,
                ),
                remote: sub_remote.cloned(),
                local_ref,
            });
        }

        pairs.push(StoryPair {
            story_id: story.id.clone(),
            declared,
            remote: remote.cloned(),
            subtasks,
        });
    }
    Ok(pairs)
}

/// Remote (old) vs. declared (new). Remote stories no declaration claims
/// show up as deleted; nothing is ever deleted remotely.
fn declared_diff(
    epic: &EntityKey,
    pairs: &[StoryPair],
    listing: &[EntitySnapshot],
    matches: &MatchReport,
) -> DiffResult {
    let mut old: Vec<EntitySnapshot> = pairs.iter().filter_map(|p| p.remote.clone()).collect();
    old.extend(
        listing
            .iter()
            .filter(|r| matches.unmatched_remote.contains(&r.key))
            .cloned(),
    );

    let new: Vec<EntitySnapshot> = pairs
        .iter()
        .map(|pair| {
            let mut declared = pair.declared.clone();
            declared.subtasks = pair.subtasks.iter().map(|s| s.declared.clone()).collect();
            // Remote-only subtasks stay as they are.
            if let Some(remote) = &pair.remote {
                let declared_keys: HashSet<&EntityKey> =
                    pair.subtasks.iter().map(|s| &s.declared.key).collect();
                declared.subtasks.extend(
                    remote
                        .subtasks
                        .iter()
                        .filter(|r| !declared_keys.contains(&r.key))
                        .cloned(),
                );
            }
            declared
        })
        .collect();

    diff::compare(DECLARED, epic, &old, &new)
}

fn field_update(declared: &EntitySnapshot, remote: &EntitySnapshot) -> FieldUpdate {
    let text = |d: &Option<Description>| {
        d.as_ref()
            .map(|d| d.plain_text().trim().to_string())
            .unwrap_or_default()
    };
    let declared_description = text(&declared.description);
    FieldUpdate {
        summary: (declared.summary.trim() != remote.summary.trim()).then(|| declared.summary.clone()),
        description: (declared_description != text(&remote.description))
            .then_some(declared_description),
        estimate: declared.estimate.filter(|_| declared.estimate != remote.estimate),
    }
}

fn status_change(declared: &EntitySnapshot, remote: &EntitySnapshot) -> Option<String> {
    let wanted = declared.status.as_deref()?.trim();
    let current = remote.status.as_deref().map(str::trim);
    (Some(wanted) != current).then(|| wanted.to_string())
}

fn new_entity(declared: &EntitySnapshot) -> NewEntity {
    NewEntity {
        summary: declared.summary.clone(),
        description: declared.description.as_ref().map(Description::plain_text),
        status: declared.status.clone(),
        estimate: declared.estimate,
    }
}

/// Updates and transitions for a matched entity.
fn change_ops(
    local_ref: &str,
    parent: &EntityKey,
    declared: &EntitySnapshot,
    remote: &EntitySnapshot,
    plan: &mut Vec<PlannedOperation>,
) {
    let update = field_update(declared, remote);
    if !update.is_empty() {
        plan.push(PlannedOperation {
            local_ref: local_ref.to_string(),
            mutation: Mutation::Update {
                key: remote.key.clone(),
                update,
            },
            parent: parent.clone(),
            depends_on: None,
        });
    }
    if let Some(status) = status_change(declared, remote) {
        plan.push(PlannedOperation {
            local_ref: local_ref.to_string(),
            mutation: Mutation::Transition {
                key: remote.key.clone(),
                status,
            },
            parent: parent.clone(),
            depends_on: None,
        });
    }
}

fn plan_operations(epic: &EntityKey, pairs: &[StoryPair]) -> Result<Vec<PlannedOperation>, SyncError> {
    let mut plan = Vec::new();
    for pair in pairs {
        let (story_key, depends_on) = match &pair.remote {
            Some(remote) => {
                change_ops(&pair.story_id, epic, &pair.declared, remote, &mut plan);
                (remote.key.clone(), None)
            }
            None => {
                plan.push(PlannedOperation {
                    local_ref: pair.story_id.clone(),
                    mutation: Mutation::Create {
                        parent: epic.clone(),
                        entity: new_entity(&pair.declared),
                    },
                    parent: epic.clone(),
                    depends_on: None,
                });
                (placeholder(&pair.story_id)?, Some(pair.story_id.clone()))
            }
        };

        for sub in &pair.subtasks {
            match &sub.remote {
                Some(remote) => change_ops(&sub.local_ref, &story_key, &sub.declared, remote, &mut plan),
                None => plan.push(PlannedOperation {
                    local_ref: sub.local_ref.clone(),
                    mutation: Mutation::Create {
                        parent: story_key.clone(),
                        entity: new_entity(&sub.declared),
                    },
                    parent: story_key.clone(),
                    depends_on: depends_on.clone(),
                }),
            }
        }
    }
    Ok(plan)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
