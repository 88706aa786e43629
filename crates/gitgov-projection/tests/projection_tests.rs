// SPDX-License-Identifier: MIT OR Apache-2.0
//! Projector and sink tests: enrichment, activity fold, sink parity, and
//! persist idempotence.

use chrono::{TimeZone, Utc};
use ed25519_dalek::SigningKey;
use gitgov_projection::{
    FsIndexSink, IndexSink, IntegrityStatus, Projector, SqliteIndexSink, persist_all,
};
use gitgov_record::{
    ActorRecord, ActorType, CycleRecord, CycleStatus, EntityType, ExecutionRecord, ExecutionType,
    FeedbackKind, FeedbackRecord, FeedbackStatus, Signer, TaskRecord, TaskStatus, seal,
};
use gitgov_store::{FsRecordStore, RecordStore};
use rand::rngs::OsRng;
use tempfile::TempDir;

const T0: i64 = 1_700_000_000;

struct Fixture {
    dir: TempDir,
    signer: Signer,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            signer: Signer::new("human:alice", SigningKey::generate(&mut OsRng)),
        }
    }

    fn gitgov(&self) -> std::path::PathBuf {
        self.dir.path().join(".gitgov")
    }

    async fn put<T: gitgov_record::EntityPayload>(&self, dir: &str, payload: &T, at: i64) {
        let now = Utc.timestamp_opt(at, 0).unwrap();
        let wrapper = seal(payload, &self.signer, now).unwrap();
        let store = FsRecordStore::new(self.gitgov().join(dir));
        store.put(payload.record_id(), &wrapper).await.unwrap();
    }

    async fn seed(&self) {
        let t_created = Utc.timestamp_opt(T0, 0).unwrap();

        let mut task_a = TaskRecord::new("Ship feature", "ship the feature", t_created);
        task_a.status = TaskStatus::Active;
        let mut task_b = TaskRecord::new("Write docs", "write the docs", t_created);
        task_b.status = TaskStatus::Draft;

        let mut cycle = CycleRecord::new("Q1", t_created);
        cycle.status = CycleStatus::Active;
        cycle.task_ids = vec![task_a.id.clone(), task_b.id.clone()];

        let actor = ActorRecord {
            id: "human:alice".into(),
            actor_type: ActorType::Human,
            display_name: "Alice".into(),
            public_key: self.signer.public_key_base64(),
            roles: vec!["author".into()],
            superseded_by: None,
        };

        let feedback = FeedbackRecord {
            id: format!("{T0}-feedback-assign"),
            entity_type: EntityType::Task,
            entity_id: task_a.id.clone(),
            feedback_type: FeedbackKind::Assignment,
            status: FeedbackStatus::Open,
            content: "please take this".into(),
            assignee: Some("human:alice".into()),
            resolves_feedback_id: None,
        };

        let execution = ExecutionRecord {
            id: format!("{T0}-exec-first-pass"),
            task_id: task_a.id.clone(),
            execution_type: ExecutionType::Progress,
            title: "First pass".into(),
            result: "implemented the first pass".into(),
            notes: None,
            references: None,
            metadata: None,
        };

        self.put("tasks", &task_a, T0).await;
        self.put("tasks", &task_b, T0).await;
        self.put("cycles", &cycle, T0).await;
        self.put("actors", &actor, T0).await;
        self.put("feedbacks", &feedback, T0).await;
        self.put("executions", &execution, T0).await;
    }
}

#[tokio::test]
async fn projection_counts_and_enrichment() {
    let fx = Fixture::new();
    fx.seed().await;

    let projector = Projector::for_gitgov_dir(&fx.gitgov());
    let now = Utc.timestamp_opt(T0 + 3_600, 0).unwrap();
    let index = projector.compute_projection(now).await.unwrap();

    assert_eq!(index.metadata.record_counts["task"], 2);
    assert_eq!(index.metadata.record_counts["cycle"], 1);
    assert_eq!(index.metadata.record_counts["actor"], 1);
    assert_eq!(index.metadata.record_counts["feedback"], 1);
    assert_eq!(index.metadata.record_counts["execution"], 1);
    assert_eq!(index.metadata.integrity_status, IntegrityStatus::Clean);

    let active = index
        .tasks
        .iter()
        .find(|t| t.task.status == TaskStatus::Active)
        .unwrap();
    assert_eq!(active.execution_count, 1);
    assert_eq!(active.health_score, 80.0);
    assert!(!active.is_stalled);
    assert!(!active.is_blocked_by_dependency);

    // Signatures and the execution produce activity, all positive.
    assert!(!index.activity_history.is_empty());
    assert!(index.activity_history.iter().all(|e| e.timestamp > 0));

    // Both tasks land in derived states under their statuses.
    assert_eq!(index.derived_states["active"].len(), 2); // task + cycle
    assert_eq!(index.derived_states["draft"].len(), 1);
}

#[tokio::test]
async fn invalid_record_is_skipped_not_fatal() {
    let fx = Fixture::new();
    fx.seed().await;
    let tasks_dir = fx.gitgov().join("tasks");
    std::fs::write(tasks_dir.join("1700000001-task-broken.json"), "{roken").unwrap();

    let projector = Projector::for_gitgov_dir(&fx.gitgov());
    let now = Utc.timestamp_opt(T0 + 60, 0).unwrap();
    let index = projector.compute_projection(now).await.unwrap();

    assert_eq!(index.metadata.record_counts["task"], 2);
    assert_eq!(index.metadata.skipped_records, 1);
    assert_eq!(index.metadata.integrity_status, IntegrityStatus::Degraded);
}

#[tokio::test]
async fn blocking_feedback_marks_task_at_risk() {
    let fx = Fixture::new();
    fx.seed().await;

    let task_id = format!("{T0}-task-ship-feature");
    let blocking = FeedbackRecord {
        id: format!("{T0}-feedback-blocked-on-infra"),
        entity_type: EntityType::Task,
        entity_id: task_id.clone(),
        feedback_type: FeedbackKind::Blocking,
        status: FeedbackStatus::Open,
        content: "waiting on infra".into(),
        assignee: None,
        resolves_feedback_id: None,
    };
    fx.put("feedbacks", &blocking, T0 + 10).await;

    let projector = Projector::for_gitgov_dir(&fx.gitgov());
    let now = Utc.timestamp_opt(T0 + 60, 0).unwrap();
    let index = projector.compute_projection(now).await.unwrap();

    let task = index.tasks.iter().find(|t| t.task.id == task_id).unwrap();
    assert!(task.is_at_risk);
    assert!(task.is_blocked_by_dependency);
    assert!(!task.needs_clarification);
}

#[tokio::test]
async fn fs_sink_round_trips_byte_equivalent() {
    let fx = Fixture::new();
    fx.seed().await;

    let projector = Projector::for_gitgov_dir(&fx.gitgov());
    let now = Utc.timestamp_opt(T0 + 60, 0).unwrap();
    let index = projector.compute_projection(now).await.unwrap();

    let sink = FsIndexSink::new(&fx.gitgov());
    sink.persist(&index).await.unwrap();
    let loaded = sink.read().await.unwrap().unwrap();
    assert_eq!(loaded, index);

    // index.json must be LOCAL_ONLY.
    assert!(!gitgov_store::should_sync_file(".gitgov/index.json"));
}

#[tokio::test]
async fn sinks_agree_on_counts_flags_and_activity() {
    let fx = Fixture::new();
    fx.seed().await;

    let projector = Projector::for_gitgov_dir(&fx.gitgov());
    let now = Utc.timestamp_opt(T0 + 60, 0).unwrap();
    let index = projector.compute_projection(now).await.unwrap();

    let fs_sink = FsIndexSink::new(&fx.gitgov());
    let db_sink = SqliteIndexSink::new(fx.dir.path().join("gitgov.db"), "repo-1", "full");
    persist_all(&index, &[&fs_sink, &db_sink]).await.unwrap();

    let from_fs = fs_sink.read().await.unwrap().unwrap();
    let from_db = db_sink.read().await.unwrap().unwrap();

    assert_eq!(from_fs.metadata.record_counts, from_db.metadata.record_counts);
    assert_eq!(from_fs.tasks.len(), from_db.tasks.len());
    assert_eq!(from_fs.cycles.len(), from_db.cycles.len());
    assert_eq!(from_fs.actors.len(), from_db.actors.len());
    assert_eq!(from_fs.feedback.len(), from_db.feedback.len());
    assert_eq!(
        from_fs.activity_history.len(),
        from_db.activity_history.len()
    );

    // Per-task enrichment flags match between sinks.
    for (a, b) in from_fs.tasks.iter().zip(from_db.tasks.iter()) {
        assert_eq!(a, b);
    }
}

#[tokio::test]
async fn sqlite_persist_is_idempotent() {
    let fx = Fixture::new();
    fx.seed().await;

    let projector = Projector::for_gitgov_dir(&fx.gitgov());
    let now = Utc.timestamp_opt(T0 + 60, 0).unwrap();
    let index = projector.compute_projection(now).await.unwrap();

    let db_path = fx.dir.path().join("gitgov.db");
    let sink = SqliteIndexSink::new(&db_path, "repo-1", "full");
    sink.persist(&index).await.unwrap();
    let first = sink.read().await.unwrap().unwrap();
    sink.persist(&index).await.unwrap();
    sink.persist(&index).await.unwrap();
    let third = sink.read().await.unwrap().unwrap();

    assert_eq!(first.tasks.len(), third.tasks.len());
    assert_eq!(
        first.activity_history.len(),
        third.activity_history.len()
    );
    assert_eq!(first, third);
}

#[tokio::test]
async fn sqlite_sweeps_rows_for_removed_records() {
    let fx = Fixture::new();
    fx.seed().await;

    let projector = Projector::for_gitgov_dir(&fx.gitgov());
    let now = Utc.timestamp_opt(T0 + 60, 0).unwrap();
    let index = projector.compute_projection(now).await.unwrap();

    let db_path = fx.dir.path().join("gitgov.db");
    let sink = SqliteIndexSink::new(&db_path, "repo-1", "full");
    sink.persist(&index).await.unwrap();
    assert_eq!(sink.read().await.unwrap().unwrap().tasks.len(), 2);

    // Remove one task and re-project: its row must disappear.
    let store = FsRecordStore::new(fx.gitgov().join("tasks"));
    store.delete(&format!("{T0}-task-write-docs")).await.unwrap();
    let index = projector.compute_projection(now).await.unwrap();
    sink.persist(&index).await.unwrap();
    assert_eq!(sink.read().await.unwrap().unwrap().tasks.len(), 1);
}

#[tokio::test]
async fn empty_tree_projects_empty_snapshot() {
    let dir = TempDir::new().unwrap();
    let projector = Projector::for_gitgov_dir(&dir.path().join(".gitgov"));
    let now = Utc.timestamp_opt(T0, 0).unwrap();
    let index = projector.compute_projection(now).await.unwrap();

    assert!(index.tasks.is_empty());
    assert!(index.activity_history.is_empty());
    assert!(index.derived_states.is_empty());
    assert_eq!(index.metadata.record_counts["task"], 0);
    assert_eq!(index.metadata.integrity_status, IntegrityStatus::Clean);
}
