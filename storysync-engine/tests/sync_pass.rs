//! Sync passes against an in-memory tracker: caching, invalidation,
//! dry-run, creation waves, and back-pressure.

use std::sync::{Arc, Mutex};

use storysync_core::{EntityKey, EntitySnapshot, Story, Subtask};
use storysync_engine::batch::NOT_STARTED;
use storysync_engine::tracker::Fault;
use storysync_engine::{
    CacheManager, InMemoryTracker, Mutation, ParallelExecutor, RateLimiter, SyncError,
    SyncOptions, SyncOrchestrator, Tracker, TrackerState,
};

fn key(raw: &str) -> EntityKey {
    EntityKey::parse(raw).expect("key")
}

fn epic() -> EntityKey {
    key("PROJ-1")
}

fn seed() -> TrackerState {
    TrackerState {
        project: "PROJ".into(),
        next_id: 200,
        entities: vec![EntitySnapshot::new(epic(), "Epic").with_subtasks(vec![
            EntitySnapshot::new(key("PROJ-100"), "Login")
                .with_status("Open")
                .with_estimate(3.0)
                .with_subtasks(vec![
                    EntitySnapshot::new(key("PROJ-101"), "Build form").with_status("Open"),
                ]),
        ])],
    }
}

fn tracker() -> Arc<InMemoryTracker> {
    Arc::new(InMemoryTracker::from_state(seed()))
}

fn orchestrator_with(tracker: &Arc<InMemoryTracker>, executor: ParallelExecutor) -> SyncOrchestrator {
    let remote: Arc<dyn Tracker> = tracker.clone();
    SyncOrchestrator::new(
        remote,
        Arc::new(CacheManager::in_memory(100)),
        Arc::new(RateLimiter::new(1000.0, 1000).expect("limiter")),
        executor,
    )
}

fn orchestrator(tracker: &Arc<InMemoryTracker>) -> SyncOrchestrator {
    orchestrator_with(tracker, ParallelExecutor::new(4, false).expect("executor"))
}

fn story(id: &str, title: &str) -> Story {
    Story {
        id: id.into(),
        title: title.into(),
        external_key: None,
        description: None,
        status: None,
        story_points: None,
        subtasks: Vec::new(),
    }
}

fn subtask(title: &str) -> Subtask {
    Subtask {
        title: title.into(),
        description: None,
        status: None,
        estimate: None,
        external_key: None,
    }
}

fn create_missing() -> SyncOptions {
    SyncOptions {
        create_missing: true,
        ..SyncOptions::default()
    }
}

// ---------------------------------------------------------------------------
// 1. Backups
// ---------------------------------------------------------------------------

#[tokio::test]
async fn backup_then_diff_reports_status_change_and_new_story() {
    let tracker = tracker();
    let orch = orchestrator(&tracker);

    let backup = orch.create_backup(&epic()).await.expect("backup");
    assert_eq!(backup.snapshots.len(), 1);

    tracker.edit(|state| {
        let stories = &mut state.entities[0].subtasks;
        stories[0].status = Some("Done".into());
        stories.push(EntitySnapshot::new(key("PROJ-200"), "Logout"));
    });
    // Edits above bypass the orchestrator, so its listing is stale.
    orch.cache().invalidate_children(&epic());

    let diff = orch.diff_backup(&backup).await.expect("diff");
    assert_eq!(diff.backup_id, backup.backup_id);
    assert_eq!(diff.changed_entities(), 1);
    assert_eq!(diff.new_entities(), 1);
    assert_eq!(diff.deleted_entities(), 0);
    assert_eq!(diff.total_changes(), 2);

    let login = diff.get(&key("PROJ-100")).expect("PROJ-100 diff");
    assert_eq!(login.fields.len(), 1);
    let status = login.field("status").expect("status diff");
    assert_eq!(status.old_value.as_ref().map(ToString::to_string).as_deref(), Some("Open"));
    assert_eq!(status.new_value.as_ref().map(ToString::to_string).as_deref(), Some("Done"));
    assert!(diff.get(&key("PROJ-200")).expect("PROJ-200 diff").is_new);
}

#[tokio::test]
async fn create_backup_always_reads_fresh_listing() {
    let tracker = tracker();
    let orch = orchestrator(&tracker);

    orch.create_backup(&epic()).await.expect("first");
    orch.create_backup(&epic()).await.expect("second");
    assert_eq!(tracker.children_fetches(&epic()), 2);
}

// ---------------------------------------------------------------------------
// 2. Caching and invalidation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unchanged_declaration_is_a_noop_served_from_cache_the_second_time() {
    let tracker = tracker();
    let orch = orchestrator(&tracker);
    let stories = vec![story("US-001", "Login")];

    let first = orch.sync_epic(&epic(), &stories, SyncOptions::default()).await.expect("sync");
    assert!(first.is_noop());
    assert!(!first.diff.has_changes());
    assert_eq!(first.matches.key_for(0), Some(&key("PROJ-100")));
    assert_eq!(tracker.total_fetches(), 2);

    orch.sync_epic(&epic(), &stories, SyncOptions::default()).await.expect("sync");
    assert_eq!(tracker.total_fetches(), 2);
    assert!(orch.cache().stats().hits >= 2);
}

#[tokio::test]
async fn writes_apply_and_invalidate_cached_reads() {
    let tracker = tracker();
    let orch = orchestrator(&tracker);
    let mut login = story("US-001", "Login");
    login.status = Some("Done".into());
    login.story_points = Some(5.0);
    let stories = vec![login];

    let report = orch.sync_epic(&epic(), &stories, SyncOptions::default()).await.expect("sync");
    assert_eq!(report.plan.len(), 2);
    assert!(matches!(report.plan[0].mutation, Mutation::Update { .. }));
    assert!(matches!(report.plan[1].mutation, Mutation::Transition { .. }));
    assert_eq!(report.batch.succeeded(), 2);

    let changed = report.diff.get(&key("PROJ-100")).expect("diff");
    assert!(changed.field("status").is_some());
    assert!(changed.field("estimate").is_some());

    let state = tracker.snapshot();
    let entity = state.find(&key("PROJ-100")).expect("entity");
    assert_eq!(entity.status.as_deref(), Some("Done"));
    assert_eq!(entity.estimate, Some(5.0));

    let again = orch.sync_epic(&epic(), &stories, SyncOptions::default()).await.expect("sync");
    assert!(again.is_noop());
    assert_eq!(tracker.children_fetches(&epic()), 2);
    assert_eq!(tracker.entity_fetches(&key("PROJ-100")), 2);
}

// ---------------------------------------------------------------------------
// 3. Dry-run and creation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dry_run_reports_plan_without_writing() {
    let tracker = tracker();
    let orch = orchestrator(&tracker);
    let mut login = story("US-001", "Login");
    login.status = Some("Done".into());
    let mut logout = story("US-002", "Logout");
    logout.subtasks = vec![subtask("Add button")];

    let calls = Arc::new(Mutex::new(Vec::new()));
    let log = calls.clone();
    let options = SyncOptions {
        dry_run: true,
        create_missing: true,
        progress: Some(Arc::new(move |done: usize, total: usize| {
            log.lock().expect("progress log").push((done, total));
        })),
    };

    let report = orch.sync_epic(&epic(), &[login, logout], options).await.expect("sync");
    assert!(report.dry_run);
    assert_eq!(report.batch.total(), 3);
    assert!(report.batch.success());
    // Counts keep rising into the second wave.
    assert_eq!(*calls.lock().expect("progress log"), vec![(1, 3), (2, 3), (3, 3)]);

    let ops = &report.batch.operations;
    assert_eq!(ops[0].key, Some(key("PROJ-100")));
    assert_eq!(ops[1].key, Some(key("new:US-002")));
    assert_eq!(ops[2].key, Some(key("new:US-002/1")));
    assert_eq!(ops[2].index, 2);
    assert_eq!(ops[0].data.as_ref().expect("data")["dry_run"], true);

    match &report.plan[2].mutation {
        Mutation::Create { parent, .. } => assert_eq!(parent, &key("new:US-002")),
        other => panic!("expected create, got {other:?}"),
    }
    assert_eq!(report.diff.new_entities(), 1);
    assert_eq!(report.diff.changed_entities(), 1);

    assert!(tracker.mutations().is_empty());
    assert_eq!(tracker.snapshot(), seed());
}

#[tokio::test]
async fn create_missing_creates_story_before_its_subtasks() {
    let tracker = tracker();
    let orch = orchestrator(&tracker);
    let mut logout = story("US-002", "Logout");
    logout.subtasks = vec![subtask("Add button"), subtask("Write tests")];

    let report = orch.sync_epic(&epic(), &[logout], create_missing()).await.expect("sync");
    assert!(report.batch.success(), "{:?}", report.batch);
    assert_eq!(report.batch.total(), 3);
    assert_eq!(report.batch.operations[0].key, Some(key("PROJ-200")));
    assert_eq!(report.plan[1].parent, key("PROJ-200"));
    assert_eq!(report.plan[1].depends_on.as_deref(), Some("US-002"));

    let mut subtasks: Vec<EntityKey> = tracker
        .snapshot()
        .children(&key("PROJ-200"))
        .expect("children")
        .into_iter()
        .map(|s| s.key)
        .collect();
    subtasks.sort();
    assert_eq!(subtasks, vec![key("PROJ-201"), key("PROJ-202")]);

    // The undeclared remote story is reported, never removed.
    assert_eq!(report.diff.deleted_entities(), 1);
    assert!(tracker.snapshot().find(&key("PROJ-100")).is_some());
}

#[tokio::test]
async fn missing_subtask_under_existing_story_is_created_in_first_wave() {
    let tracker = tracker();
    let orch = orchestrator(&tracker);
    let mut login = story("US-001", "Login");
    login.subtasks = vec![subtask("Build form"), subtask("Polish")];

    let report = orch.sync_epic(&epic(), &[login], create_missing()).await.expect("sync");
    assert_eq!(report.plan.len(), 1);
    assert_eq!(report.plan[0].local_ref, "US-001/2");
    assert_eq!(report.plan[0].parent, key("PROJ-100"));
    assert_eq!(report.plan[0].depends_on, None);
    assert_eq!(report.batch.created_keys(), vec![&key("PROJ-200")]);
}

// ---------------------------------------------------------------------------
// 4. Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unmatched_story_fails_before_fetching_or_writing() {
    let tracker = tracker();
    let orch = orchestrator(&tracker);
    let stories = vec![story("US-001", "Login"), story("US-002", "Logout")];

    let err = orch
        .sync_epic(&epic(), &stories, SyncOptions::default())
        .await
        .unwrap_err();
    match err {
        SyncError::NoIdentityMatch { local_refs, .. } => assert_eq!(local_refs, vec!["US-002"]),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(tracker.entity_fetches(&key("PROJ-100")), 0);
    assert!(tracker.mutations().is_empty());
}

#[tokio::test]
async fn unmatched_subtask_is_named_by_position() {
    let tracker = tracker();
    let orch = orchestrator(&tracker);
    let mut login = story("US-001", "Login");
    login.subtasks = vec![subtask("Build form"), subtask("Polish")];

    let err = orch
        .sync_epic(&epic(), &[login], SyncOptions::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("1 local item in PROJ-1"), "{err}");
    assert!(err.to_string().ends_with("US-001/2"), "{err}");
}

#[tokio::test]
async fn failed_fetch_aborts_before_any_write() {
    let tracker = tracker();
    tracker.inject_fault(&key("PROJ-100"), Fault::Transient("boom".into()));
    let orch = orchestrator(&tracker);
    let mut login = story("US-001", "Login");
    login.status = Some("Done".into());

    let err = orch
        .sync_epic(&epic(), &[login], SyncOptions::default())
        .await
        .unwrap_err();
    match err {
        SyncError::Fetch { failures } => {
            assert_eq!(failures.len(), 1);
            assert!(failures[0].starts_with("PROJ-100: "), "{failures:?}");
            assert!(failures[0].contains("boom"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(tracker.mutations().is_empty());
}

#[tokio::test]
async fn rate_limited_write_halves_request_rate() {
    let tracker = tracker();
    let orch = orchestrator(&tracker);
    orch.sync_epic(&epic(), &[story("US-001", "Login")], SyncOptions::default())
        .await
        .expect("warm cache");

    tracker.inject_fault(&key("PROJ-100"), Fault::RateLimited);
    let mut login = story("US-001", "Login");
    login.status = Some("Done".into());
    let report = orch
        .sync_epic(&epic(), &[login], SyncOptions::default())
        .await
        .expect("sync");

    assert_eq!(report.batch.failed(), 1);
    assert!(report.batch.operations[0].error.contains("rate limited"));
    assert_eq!(orch.limiter().rate(), 500.0);
    assert_eq!(orch.limiter().stats().rate_limit_hits, 1);
}

#[tokio::test]
async fn fail_fast_leaves_later_operations_unstarted() {
    let tracker = tracker();
    let orch = orchestrator_with(&tracker, ParallelExecutor::new(1, true).expect("executor"));
    orch.sync_epic(&epic(), &[story("US-001", "Login")], SyncOptions::default())
        .await
        .expect("warm cache");

    tracker.inject_fault(&key("PROJ-100"), Fault::Validation("locked".into()));
    let mut login = story("US-001", "Login");
    login.status = Some("Done".into());
    login.story_points = Some(8.0);
    let report = orch
        .sync_epic(&epic(), &[login], SyncOptions::default())
        .await
        .expect("sync");

    let ops = &report.batch.operations;
    assert_eq!(ops.len(), 2);
    assert!(ops[0].error.contains("locked"));
    assert_eq!(ops[1].error, NOT_STARTED);
    assert_eq!(tracker.mutations().len(), 1);
}

#[tokio::test]
async fn cancelled_orchestrator_refuses_new_passes() {
    let tracker = tracker();
    let orch = orchestrator(&tracker);
    orch.cancel_token().cancel();

    let err = orch
        .sync_epic(&epic(), &[story("US-001", "Login")], SyncOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Cancelled));
    assert_eq!(tracker.total_fetches(), 0);
}
