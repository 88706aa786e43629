// SPDX-License-Identifier: MIT OR Apache-2.0
//! The relational sink.
//!
//! Six tables — `task`, `cycle`, `actor`, `feedback`, `activity`, `meta` —
//! keyed by `(repo_id, projection_type, record_id)`. Each persist runs in a
//! single transaction: rows are upserted under a fresh generation number
//! and rows the snapshot no longer contains are swept, so re-projecting
//! the same state leaves an identical row set. Concurrent projectors for
//! the same key last-writer-win at the commit boundary.
//!
//! The schema holds the queryable core of a snapshot (the four entity
//! tables plus activity and metadata); executions, changelogs, and agent
//! definitions live in the snapshot's JSON form only, and `read` returns
//! them empty. The §8 parity fields — record counts, entity payloads,
//! enrichment flags, activity events — all round-trip.

use crate::{
    ActivityEvent, EnrichedTask, IndexData, IndexMetadata, IndexSink, IntegrityStatus,
    ProjectionError,
};
use async_trait::async_trait;
use gitgov_record::{ActorRecord, CycleRecord, FeedbackRecord};
use rusqlite::{Connection, params};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

/// Environment variable naming the database location.
pub const DB_URL_ENV: &str = "GITGOV_DB_URL";

/// Sink persisting snapshots to a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteIndexSink {
    path: PathBuf,
    repo_id: String,
    projection_type: String,
}

impl SqliteIndexSink {
    /// Sink writing to the database at `path` under the given projection
    /// key.
    #[must_use]
    pub fn new(
        path: impl Into<PathBuf>,
        repo_id: impl Into<String>,
        projection_type: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            repo_id: repo_id.into(),
            projection_type: projection_type.into(),
        }
    }

    /// Sink reading its database location from `GITGOV_DB_URL`. A
    /// `sqlite://` prefix is accepted and stripped.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::MissingDbUrl`] when the variable is not
    /// set or empty.
    pub fn from_env(
        repo_id: impl Into<String>,
        projection_type: impl Into<String>,
    ) -> Result<Self, ProjectionError> {
        let url = std::env::var(DB_URL_ENV).unwrap_or_default();
        if url.is_empty() {
            return Err(ProjectionError::MissingDbUrl);
        }
        let path = url.strip_prefix("sqlite://").unwrap_or(&url);
        Ok(Self::new(path, repo_id, projection_type))
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS task (
    repo_id TEXT NOT NULL,
    projection_type TEXT NOT NULL,
    record_id TEXT NOT NULL,
    status TEXT NOT NULL,
    health_score REAL NOT NULL,
    is_stalled INTEGER NOT NULL,
    is_at_risk INTEGER NOT NULL,
    needs_clarification INTEGER NOT NULL,
    is_blocked_by_dependency INTEGER NOT NULL,
    time_in_current_stage REAL NOT NULL,
    execution_count INTEGER NOT NULL,
    payload TEXT NOT NULL,
    generation INTEGER NOT NULL,
    PRIMARY KEY (repo_id, projection_type, record_id)
);
CREATE TABLE IF NOT EXISTS cycle (
    repo_id TEXT NOT NULL,
    projection_type TEXT NOT NULL,
    record_id TEXT NOT NULL,
    status TEXT NOT NULL,
    payload TEXT NOT NULL,
    generation INTEGER NOT NULL,
    PRIMARY KEY (repo_id, projection_type, record_id)
);
CREATE TABLE IF NOT EXISTS actor (
    repo_id TEXT NOT NULL,
    projection_type TEXT NOT NULL,
    record_id TEXT NOT NULL,
    actor_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    generation INTEGER NOT NULL,
    PRIMARY KEY (repo_id, projection_type, record_id)
);
CREATE TABLE IF NOT EXISTS feedback (
    repo_id TEXT NOT NULL,
    projection_type TEXT NOT NULL,
    record_id TEXT NOT NULL,
    status TEXT NOT NULL,
    payload TEXT NOT NULL,
    generation INTEGER NOT NULL,
    PRIMARY KEY (repo_id, projection_type, record_id)
);
CREATE TABLE IF NOT EXISTS activity (
    repo_id TEXT NOT NULL,
    projection_type TEXT NOT NULL,
    record_id TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    actor TEXT NOT NULL,
    kind TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    generation INTEGER NOT NULL,
    PRIMARY KEY (repo_id, projection_type, record_id)
);
CREATE TABLE IF NOT EXISTS meta (
    repo_id TEXT NOT NULL,
    projection_type TEXT NOT NULL,
    record_id TEXT NOT NULL,
    generated_at INTEGER NOT NULL,
    generation_time_ms INTEGER NOT NULL,
    record_counts TEXT NOT NULL,
    integrity_status TEXT NOT NULL,
    skipped_records INTEGER NOT NULL,
    derived_states TEXT NOT NULL,
    generation INTEGER NOT NULL,
    PRIMARY KEY (repo_id, projection_type, record_id)
);
";

const ENTITY_TABLES: [&str; 5] = ["task", "cycle", "actor", "feedback", "activity"];

fn activity_row_id(event: &ActivityEvent) -> String {
    format!(
        "{}:{}:{}:{}",
        event.timestamp, event.actor, event.kind, event.entity_id
    )
}

fn persist_blocking(
    path: &PathBuf,
    repo_id: &str,
    projection_type: &str,
    index: &IndexData,
) -> Result<(), ProjectionError> {
    let mut conn = Connection::open(path)?;
    conn.execute_batch(SCHEMA)?;

    let tx = conn.transaction()?;

    let generation: i64 = tx.query_row(
        "SELECT COALESCE(MAX(generation), 0) + 1 FROM meta
         WHERE repo_id = ?1 AND projection_type = ?2",
        params![repo_id, projection_type],
        |row| row.get(0),
    )?;

    for task in &index.tasks {
        tx.execute(
            "INSERT INTO task (repo_id, projection_type, record_id, status, health_score,
                 is_stalled, is_at_risk, needs_clarification, is_blocked_by_dependency,
                 time_in_current_stage, execution_count, payload, generation)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT (repo_id, projection_type, record_id) DO UPDATE SET
                 status = excluded.status,
                 health_score = excluded.health_score,
                 is_stalled = excluded.is_stalled,
                 is_at_risk = excluded.is_at_risk,
                 needs_clarification = excluded.needs_clarification,
                 is_blocked_by_dependency = excluded.is_blocked_by_dependency,
                 time_in_current_stage = excluded.time_in_current_stage,
                 execution_count = excluded.execution_count,
                 payload = excluded.payload,
                 generation = excluded.generation",
            params![
                repo_id,
                projection_type,
                task.task.id,
                task.task.status.as_str(),
                task.health_score,
                task.is_stalled,
                task.is_at_risk,
                task.needs_clarification,
                task.is_blocked_by_dependency,
                task.time_in_current_stage,
                task.execution_count as i64,
                serde_json::to_string(task)?,
                generation,
            ],
        )?;
    }

    for cycle in &index.cycles {
        let status = serde_json::to_value(cycle.status)?
            .as_str()
            .unwrap_or("unknown")
            .to_string();
        tx.execute(
            "INSERT INTO cycle (repo_id, projection_type, record_id, status, payload, generation)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (repo_id, projection_type, record_id) DO UPDATE SET
                 status = excluded.status,
                 payload = excluded.payload,
                 generation = excluded.generation",
            params![
                repo_id,
                projection_type,
                cycle.id,
                status,
                serde_json::to_string(cycle)?,
                generation,
            ],
        )?;
    }

    for actor in &index.actors {
        let actor_type = serde_json::to_value(actor.actor_type)?
            .as_str()
            .unwrap_or("unknown")
            .to_string();
        tx.execute(
            "INSERT INTO actor (repo_id, projection_type, record_id, actor_type, payload, generation)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (repo_id, projection_type, record_id) DO UPDATE SET
                 actor_type = excluded.actor_type,
                 payload = excluded.payload,
                 generation = excluded.generation",
            params![
                repo_id,
                projection_type,
                actor.id,
                actor_type,
                serde_json::to_string(actor)?,
                generation,
            ],
        )?;
    }

    for feedback in &index.feedback {
        let status = serde_json::to_value(feedback.status)?
            .as_str()
            .unwrap_or("unknown")
            .to_string();
        tx.execute(
            "INSERT INTO feedback (repo_id, projection_type, record_id, status, payload, generation)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (repo_id, projection_type, record_id) DO UPDATE SET
                 status = excluded.status,
                 payload = excluded.payload,
                 generation = excluded.generation",
            params![
                repo_id,
                projection_type,
                feedback.id,
                status,
                serde_json::to_string(feedback)?,
                generation,
            ],
        )?;
    }

    for event in &index.activity_history {
        tx.execute(
            "INSERT INTO activity (repo_id, projection_type, record_id, timestamp, actor,
                 kind, entity_id, generation)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (repo_id, projection_type, record_id) DO UPDATE SET
                 timestamp = excluded.timestamp,
                 actor = excluded.actor,
                 kind = excluded.kind,
                 entity_id = excluded.entity_id,
                 generation = excluded.generation",
            params![
                repo_id,
                projection_type,
                activity_row_id(event),
                event.timestamp,
                event.actor,
                event.kind,
                event.entity_id,
                generation,
            ],
        )?;
    }

    let integrity = serde_json::to_value(index.metadata.integrity_status)?
        .as_str()
        .unwrap_or("unknown")
        .to_string();
    tx.execute(
        "INSERT INTO meta (repo_id, projection_type, record_id, generated_at,
             generation_time_ms, record_counts, integrity_status, skipped_records,
             derived_states, generation)
         VALUES (?1, ?2, 'snapshot', ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT (repo_id, projection_type, record_id) DO UPDATE SET
             generated_at = excluded.generated_at,
             generation_time_ms = excluded.generation_time_ms,
             record_counts = excluded.record_counts,
             integrity_status = excluded.integrity_status,
             skipped_records = excluded.skipped_records,
             derived_states = excluded.derived_states,
             generation = excluded.generation",
        params![
            repo_id,
            projection_type,
            index.metadata.generated_at,
            index.metadata.generation_time_ms as i64,
            serde_json::to_string(&index.metadata.record_counts)?,
            integrity,
            index.metadata.skipped_records as i64,
            serde_json::to_string(&index.derived_states)?,
            generation,
        ],
    )?;

    // Sweep rows the snapshot no longer contains.
    for table in ENTITY_TABLES {
        tx.execute(
            &format!(
                "DELETE FROM {table}
                 WHERE repo_id = ?1 AND projection_type = ?2 AND generation < ?3"
            ),
            params![repo_id, projection_type, generation],
        )?;
    }

    tx.commit()?;
    Ok(())
}

fn read_blocking(
    path: &PathBuf,
    repo_id: &str,
    projection_type: &str,
) -> Result<Option<IndexData>, ProjectionError> {
    if !path.exists() {
        return Ok(None);
    }
    let conn = Connection::open(path)?;
    conn.execute_batch(SCHEMA)?;

    let meta = conn
        .query_row(
            "SELECT generated_at, generation_time_ms, record_counts, integrity_status,
                    skipped_records, derived_states
             FROM meta WHERE repo_id = ?1 AND projection_type = ?2 AND record_id = 'snapshot'",
            params![repo_id, projection_type],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                ))
            },
        )
        .map(Some)
        .or_else(|err| match err {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;
    let Some((generated_at, generation_time_ms, counts, integrity, skipped, derived)) = meta
    else {
        return Ok(None);
    };

    let record_counts: BTreeMap<String, usize> = serde_json::from_str(&counts)?;
    let derived_states: BTreeMap<String, Vec<String>> = serde_json::from_str(&derived)?;
    let integrity_status = if integrity == "clean" {
        IntegrityStatus::Clean
    } else {
        IntegrityStatus::Degraded
    };

    let tasks: Vec<EnrichedTask> = read_payloads(&conn, "task", repo_id, projection_type)?;
    let cycles: Vec<CycleRecord> = read_payloads(&conn, "cycle", repo_id, projection_type)?;
    let actors: Vec<ActorRecord> = read_payloads(&conn, "actor", repo_id, projection_type)?;
    let feedback: Vec<FeedbackRecord> =
        read_payloads(&conn, "feedback", repo_id, projection_type)?;

    let mut stmt = conn.prepare(
        "SELECT timestamp, actor, kind, entity_id FROM activity
         WHERE repo_id = ?1 AND projection_type = ?2
         ORDER BY timestamp, entity_id, kind",
    )?;
    let activity_history = stmt
        .query_map(params![repo_id, projection_type], |row| {
            Ok(ActivityEvent {
                timestamp: row.get(0)?,
                actor: row.get(1)?,
                kind: row.get(2)?,
                entity_id: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(IndexData {
        metadata: IndexMetadata {
            generated_at,
            generation_time_ms: generation_time_ms as u64,
            record_counts,
            integrity_status,
            skipped_records: skipped as usize,
        },
        tasks,
        cycles,
        actors,
        feedback,
        executions: Vec::new(),
        changelogs: Vec::new(),
        agents: Vec::new(),
        derived_states,
        activity_history,
    }))
}

fn read_payloads<T: serde::de::DeserializeOwned>(
    conn: &Connection,
    table: &str,
    repo_id: &str,
    projection_type: &str,
) -> Result<Vec<T>, ProjectionError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT payload FROM {table}
         WHERE repo_id = ?1 AND projection_type = ?2
         ORDER BY record_id"
    ))?;
    let rows = stmt
        .query_map(params![repo_id, projection_type], |row| {
            row.get::<_, String>(0)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out = Vec::with_capacity(rows.len());
    for payload in rows {
        out.push(serde_json::from_str(&payload)?);
    }
    Ok(out)
}

#[async_trait]
impl IndexSink for SqliteIndexSink {
    async fn persist(&self, index: &IndexData) -> Result<(), ProjectionError> {
        let path = self.path.clone();
        let repo_id = self.repo_id.clone();
        let projection_type = self.projection_type.clone();
        let index = index.clone();
        tokio::task::spawn_blocking(move || {
            persist_blocking(&path, &repo_id, &projection_type, &index)
        })
        .await??;
        debug!(path = %self.path.display(), "relational snapshot persisted");
        Ok(())
    }

    async fn read(&self) -> Result<Option<IndexData>, ProjectionError> {
        let path = self.path.clone();
        let repo_id = self.repo_id.clone();
        let projection_type = self.projection_type.clone();
        tokio::task::spawn_blocking(move || read_blocking(&path, &repo_id, &projection_type))
            .await?
    }
}
