// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! gitgov-projection
//!
//! The projector reads every record through its stores, computes the
//! derived metrics, and emits one [`IndexData`] snapshot. Snapshots go to
//! any number of [`IndexSink`]s — the on-disk `index.json` and the
//! relational sink ship here — and every sink persists an equivalent
//! projection: same record counts, same per-entity fields, same enrichment
//! flags, same activity events.

/// The `.gitgov/index.json` sink.
pub mod fs_sink;
/// The SQLite relational sink.
pub mod sqlite_sink;

pub use fs_sink::FsIndexSink;
pub use sqlite_sink::SqliteIndexSink;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gitgov_metrics as metrics;
use gitgov_metrics::{ExecutionSnapshot, TaskSnapshot};
use gitgov_record::{
    ActorRecord, AgentRecord, ChangelogRecord, CycleRecord, EntityPayload, EntityType,
    ExecutionRecord, FeedbackKind, FeedbackRecord, FeedbackStatus, RecordType, RecordWrapper,
    TaskRecord, TaskStatus, id_timestamp,
};
use gitgov_store::{FsRecordStore, RecordStore, StoreError, dir_for};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Days without activity after which a task counts as stalled.
pub const STALL_THRESHOLD_DAYS: f64 = 7.0;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from projection or sink persistence.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    /// A record store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A sink file operation failed.
    #[error("sink io error on {path}: {source}")]
    Io {
        /// Path of the offending file.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Snapshot (de)serialization failed.
    #[error("sink serialization: {0}")]
    Json(#[from] serde_json::Error),

    /// The relational sink failed.
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    /// No database location is configured for the relational sink.
    #[error("database url not configured (set GITGOV_DB_URL)")]
    MissingDbUrl,

    /// A blocking database task failed to join.
    #[error("database task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

// ---------------------------------------------------------------------------
// IndexData
// ---------------------------------------------------------------------------

/// Overall integrity of a projection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityStatus {
    /// Every record projected.
    Clean,
    /// Some records were skipped as invalid.
    Degraded,
}

/// Snapshot metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMetadata {
    /// Unix seconds at which the projection ran.
    pub generated_at: i64,
    /// Wall-clock cost of the projection in milliseconds.
    pub generation_time_ms: u64,
    /// Count of valid records per type.
    pub record_counts: BTreeMap<String, usize>,
    /// Whether any records were skipped.
    pub integrity_status: IntegrityStatus,
    /// Number of invalid records skipped.
    pub skipped_records: usize,
}

/// A task payload plus its computed flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedTask {
    /// The task payload as stored.
    #[serde(flatten)]
    pub task: TaskRecord,
    /// Status-weighted health points in `[0, 100]`.
    pub health_score: f64,
    /// No execution activity inside the stall window.
    pub is_stalled: bool,
    /// Open blocking feedback, or stalled while active.
    pub is_at_risk: bool,
    /// Open question feedback targets this task.
    pub needs_clarification: bool,
    /// Blocked status or open blocking feedback.
    pub is_blocked_by_dependency: bool,
    /// Days in the current stage.
    pub time_in_current_stage: f64,
    /// Number of executions reported against this task.
    pub execution_count: usize,
}

/// One event in the folded activity history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    /// Unix seconds. Always positive; events with non-temporal timestamps
    /// are dropped during the fold.
    pub timestamp: i64,
    /// Actor ID that produced the event.
    pub actor: String,
    /// Event kind (e.g. `task:author`, `execution:progress`).
    pub kind: String,
    /// The entity the event concerns.
    pub entity_id: String,
}

/// The denormalized, metrics-enriched snapshot of all records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexData {
    /// Snapshot metadata.
    pub metadata: IndexMetadata,
    /// Enriched tasks.
    pub tasks: Vec<EnrichedTask>,
    /// Cycles.
    pub cycles: Vec<CycleRecord>,
    /// Actors.
    pub actors: Vec<ActorRecord>,
    /// Feedback.
    pub feedback: Vec<FeedbackRecord>,
    /// Executions.
    pub executions: Vec<ExecutionRecord>,
    /// Changelog entries.
    pub changelogs: Vec<ChangelogRecord>,
    /// Agent definitions.
    pub agents: Vec<AgentRecord>,
    /// Status → IDs of tasks and cycles currently in it.
    pub derived_states: BTreeMap<String, Vec<String>>,
    /// Folded activity history, oldest first.
    pub activity_history: Vec<ActivityEvent>,
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// A destination a projection can be persisted to and read back from.
#[async_trait]
pub trait IndexSink: Send + Sync {
    /// Persist a snapshot. Re-persisting the same snapshot is idempotent.
    async fn persist(&self, index: &IndexData) -> Result<(), ProjectionError>;

    /// Read back the last persisted snapshot, or `None` when nothing has
    /// been persisted yet.
    async fn read(&self) -> Result<Option<IndexData>, ProjectionError>;
}

/// Persist `index` to every sink, failing on the first error.
///
/// # Errors
///
/// Propagates the first sink failure.
pub async fn persist_all(
    index: &IndexData,
    sinks: &[&dyn IndexSink],
) -> Result<(), ProjectionError> {
    for sink in sinks {
        sink.persist(index).await?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Projector
// ---------------------------------------------------------------------------

/// The record stores a projector reads from, one per record type.
#[derive(Clone)]
pub struct ProjectorStores {
    /// Task store.
    pub tasks: Arc<dyn RecordStore>,
    /// Cycle store.
    pub cycles: Arc<dyn RecordStore>,
    /// Actor store.
    pub actors: Arc<dyn RecordStore>,
    /// Agent store.
    pub agents: Arc<dyn RecordStore>,
    /// Execution store.
    pub executions: Arc<dyn RecordStore>,
    /// Feedback store.
    pub feedback: Arc<dyn RecordStore>,
    /// Changelog store.
    pub changelogs: Arc<dyn RecordStore>,
}

impl ProjectorStores {
    /// Filesystem stores under a `.gitgov/` directory.
    #[must_use]
    pub fn fs(gitgov_dir: &Path) -> Self {
        let store = |kind: RecordType| -> Arc<dyn RecordStore> {
            Arc::new(FsRecordStore::new(gitgov_dir.join(dir_for(kind))))
        };
        Self {
            tasks: store(RecordType::Task),
            cycles: store(RecordType::Cycle),
            actors: store(RecordType::Actor),
            agents: store(RecordType::Agent),
            executions: store(RecordType::Execution),
            feedback: store(RecordType::Feedback),
            changelogs: store(RecordType::Changelog),
        }
    }
}

/// Stateless aggregator from record stores to [`IndexData`].
///
/// Projectors hold no mutable state after construction; any number can run
/// in parallel against the same stores.
pub struct Projector {
    stores: ProjectorStores,
}

struct Loaded<T> {
    wrapper: RecordWrapper,
    record: T,
}

impl Projector {
    /// Projector over the given stores.
    #[must_use]
    pub fn new(stores: ProjectorStores) -> Self {
        Self { stores }
    }

    /// Projector over filesystem stores under `.gitgov/`.
    #[must_use]
    pub fn for_gitgov_dir(gitgov_dir: &Path) -> Self {
        Self::new(ProjectorStores::fs(gitgov_dir))
    }

    /// Read every record and compute a snapshot.
    ///
    /// Invalid records are skipped with a warning; the snapshot carries how
    /// many were lost in `metadata.skipped_records`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Store`] when a store itself fails (not
    /// when an individual record is invalid).
    pub async fn compute_projection(
        &self,
        now: DateTime<Utc>,
    ) -> Result<IndexData, ProjectionError> {
        let started = Instant::now();
        let mut skipped = 0usize;

        let tasks: Vec<Loaded<TaskRecord>> =
            load_all(self.stores.tasks.as_ref(), &mut skipped).await?;
        let cycles: Vec<Loaded<CycleRecord>> =
            load_all(self.stores.cycles.as_ref(), &mut skipped).await?;
        let actors: Vec<Loaded<ActorRecord>> =
            load_all(self.stores.actors.as_ref(), &mut skipped).await?;
        let agents: Vec<Loaded<AgentRecord>> =
            load_all(self.stores.agents.as_ref(), &mut skipped).await?;
        let executions: Vec<Loaded<ExecutionRecord>> =
            load_all(self.stores.executions.as_ref(), &mut skipped).await?;
        let feedback: Vec<Loaded<FeedbackRecord>> =
            load_all(self.stores.feedback.as_ref(), &mut skipped).await?;
        let changelogs: Vec<Loaded<ChangelogRecord>> =
            load_all(self.stores.changelogs.as_ref(), &mut skipped).await?;

        let execution_snapshots: Vec<ExecutionSnapshot<'_>> = executions
            .iter()
            .map(|e| ExecutionSnapshot {
                record: &e.record,
                signatures: &e.wrapper.header.signatures,
            })
            .collect();
        let feedback_records: Vec<&FeedbackRecord> =
            feedback.iter().map(|f| &f.record).collect();

        let enriched: Vec<EnrichedTask> = tasks
            .iter()
            .map(|t| enrich_task(t, &execution_snapshots, &feedback_records, now))
            .collect();

        let mut derived_states: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for task in &tasks {
            derived_states
                .entry(task.record.status.as_str().to_string())
                .or_default()
                .push(task.record.id.clone());
        }
        for cycle in &cycles {
            let status = serde_json::to_value(cycle.record.status)?
                .as_str()
                .unwrap_or("unknown")
                .to_string();
            derived_states
                .entry(status)
                .or_default()
                .push(cycle.record.id.clone());
        }

        let activity_history = fold_activity(
            &tasks,
            &cycles,
            &actors,
            &agents,
            &executions,
            &feedback,
            &changelogs,
        );

        let mut record_counts = BTreeMap::new();
        record_counts.insert(RecordType::Task.as_str().to_string(), tasks.len());
        record_counts.insert(RecordType::Cycle.as_str().to_string(), cycles.len());
        record_counts.insert(RecordType::Actor.as_str().to_string(), actors.len());
        record_counts.insert(RecordType::Agent.as_str().to_string(), agents.len());
        record_counts.insert(
            RecordType::Execution.as_str().to_string(),
            executions.len(),
        );
        record_counts.insert(RecordType::Feedback.as_str().to_string(), feedback.len());
        record_counts.insert(
            RecordType::Changelog.as_str().to_string(),
            changelogs.len(),
        );

        Ok(IndexData {
            metadata: IndexMetadata {
                generated_at: now.timestamp(),
                generation_time_ms: started.elapsed().as_millis() as u64,
                record_counts,
                integrity_status: if skipped == 0 {
                    IntegrityStatus::Clean
                } else {
                    IntegrityStatus::Degraded
                },
                skipped_records: skipped,
            },
            tasks: enriched,
            cycles: cycles.into_iter().map(|c| c.record).collect(),
            actors: actors.into_iter().map(|a| a.record).collect(),
            feedback: feedback.into_iter().map(|f| f.record).collect(),
            executions: executions.into_iter().map(|e| e.record).collect(),
            changelogs: changelogs.into_iter().map(|c| c.record).collect(),
            agents: agents.into_iter().map(|a| a.record).collect(),
            derived_states,
            activity_history,
        })
    }
}

/// Load, validate, and decode every record in a store, skipping invalid
/// ones with a warning.
async fn load_all<T: EntityPayload>(
    store: &dyn RecordStore,
    skipped: &mut usize,
) -> Result<Vec<Loaded<T>>, ProjectionError> {
    let mut ids = store.list().await?;
    ids.sort();

    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        let wrapper = match store.get(&id).await {
            Ok(Some(wrapper)) => wrapper,
            // Deleted between list and get; not an error.
            Ok(None) => continue,
            Err(StoreError::Record(err)) => {
                warn!(id, error = %err, "skipping unparseable record");
                *skipped += 1;
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        if let Err(err) = gitgov_record::validate_wrapper(&wrapper) {
            warn!(id, error = %err, "skipping invalid record");
            *skipped += 1;
            continue;
        }
        match wrapper.decode_payload::<T>() {
            Ok(record) => out.push(Loaded { wrapper, record }),
            Err(err) => {
                warn!(id, error = %err, "skipping undecodable record");
                *skipped += 1;
            }
        }
    }
    Ok(out)
}

fn enrich_task(
    task: &Loaded<TaskRecord>,
    executions: &[ExecutionSnapshot<'_>],
    feedback: &[&FeedbackRecord],
    now: DateTime<Utc>,
) -> EnrichedTask {
    let snapshot = TaskSnapshot {
        record: &task.record,
        signatures: &task.wrapper.header.signatures,
    };

    let execution_count = executions
        .iter()
        .filter(|e| e.record.task_id == task.record.id)
        .count();

    let time_in_current_stage = metrics::time_in_current_stage(&snapshot, now);

    let idle_days = metrics::days_since_last_execution(&task.record.id, executions, now)
        .unwrap_or(time_in_current_stage);
    let is_stalled = !task.record.status.is_closed() && idle_days > STALL_THRESHOLD_DAYS;

    let open_on_task = |f: &FeedbackRecord| {
        f.entity_type == EntityType::Task
            && f.entity_id == task.record.id
            && f.status == FeedbackStatus::Open
    };
    let has_open_blocking = feedback
        .iter()
        .any(|f| open_on_task(f) && f.feedback_type == FeedbackKind::Blocking);
    let needs_clarification = feedback
        .iter()
        .any(|f| open_on_task(f) && f.feedback_type == FeedbackKind::Question);

    let is_blocked_by_dependency =
        task.record.status == TaskStatus::Blocked || has_open_blocking;
    let is_at_risk =
        has_open_blocking || (is_stalled && task.record.status == TaskStatus::Active);

    EnrichedTask {
        health_score: metrics::health(std::slice::from_ref(&task.record)),
        is_stalled,
        is_at_risk,
        needs_clarification,
        is_blocked_by_dependency,
        time_in_current_stage,
        execution_count,
        task: task.record.clone(),
    }
}

fn fold_activity(
    tasks: &[Loaded<TaskRecord>],
    cycles: &[Loaded<CycleRecord>],
    actors: &[Loaded<ActorRecord>],
    agents: &[Loaded<AgentRecord>],
    executions: &[Loaded<ExecutionRecord>],
    feedback: &[Loaded<FeedbackRecord>],
    changelogs: &[Loaded<ChangelogRecord>],
) -> Vec<ActivityEvent> {
    let mut events = Vec::new();

    for t in tasks {
        push_signature_events(&mut events, &t.wrapper, &t.record.id);
    }
    for c in cycles {
        push_signature_events(&mut events, &c.wrapper, &c.record.id);
    }
    for a in actors {
        push_signature_events(&mut events, &a.wrapper, &a.record.id);
    }
    for a in agents {
        push_signature_events(&mut events, &a.wrapper, &a.record.id);
    }
    for f in feedback {
        push_signature_events(&mut events, &f.wrapper, &f.record.id);
    }
    for c in changelogs {
        push_signature_events(&mut events, &c.wrapper, &c.record.id);
    }
    for e in executions {
        push_signature_events(&mut events, &e.wrapper, &e.record.id);
        // Executions additionally produce a work event against their task,
        // stamped with the creation time embedded in their ID.
        if let Some(timestamp) = id_timestamp(&e.record.id)
            && timestamp > 0
        {
            let actor = e
                .wrapper
                .header
                .signatures
                .first()
                .map(|s| s.key_id.clone())
                .unwrap_or_else(|| "unknown".to_string());
            let kind = match serde_json::to_value(e.record.execution_type) {
                Ok(serde_json::Value::String(s)) => format!("execution:{s}"),
                _ => "execution".to_string(),
            };
            events.push(ActivityEvent {
                timestamp,
                actor,
                kind,
                entity_id: e.record.task_id.clone(),
            });
        }
    }

    events.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
            .then_with(|| a.kind.cmp(&b.kind))
    });
    events
}

fn push_signature_events(events: &mut Vec<ActivityEvent>, wrapper: &RecordWrapper, entity_id: &str) {
    for sig in &wrapper.header.signatures {
        // Non-temporal timestamps produce nothing useful downstream.
        if sig.timestamp <= 0 {
            continue;
        }
        events.push(ActivityEvent {
            timestamp: sig.timestamp,
            actor: sig.key_id.clone(),
            kind: format!("{}:{}", wrapper.header.kind, sig.role),
            entity_id: entity_id.to_string(),
        });
    }
}
