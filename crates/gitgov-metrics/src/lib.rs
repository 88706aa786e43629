// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! gitgov-metrics
//!
//! Pure, deterministic functions over slices of records. No I/O, no clocks:
//! callers pass `now`. Empty inputs yield 0 or an empty map, never a
//! division by zero. A working set of a thousand records computes in tens
//! of milliseconds on commodity hardware.

use chrono::{DateTime, Utc};
use gitgov_record::{
    ActorRecord, ActorType, ExecutionRecord, FeedbackKind, FeedbackRecord, FeedbackStatus,
    Signature, TaskRecord, TaskStatus, id_timestamp,
};
use std::collections::{BTreeMap, BTreeSet};

const SECONDS_PER_DAY: f64 = 86_400.0;
/// Window for [`throughput`] and the stall threshold, in days.
pub const RECENT_WINDOW_DAYS: f64 = 7.0;
/// Window for [`active_agents`], in hours.
pub const AGENT_ACTIVITY_WINDOW_HOURS: f64 = 24.0;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from the metrics engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetricsError {
    /// An input failed local validation.
    #[error("invalid data: {detail}")]
    InvalidData {
        /// What was wrong.
        detail: String,
    },

    /// The metric belongs to a tier that is not implemented yet.
    #[error("metric not implemented: {metric}")]
    NotImplemented {
        /// The requested metric.
        metric: String,
    },
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// A record paired with its signature history, borrowed from a wrapper.
///
/// Several metrics need signing timestamps as well as payload fields; the
/// projector builds these views once per record and hands them out.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot<'a, T> {
    /// The decoded payload.
    pub record: &'a T,
    /// The wrapper's signature list, oldest first.
    pub signatures: &'a [Signature],
}

/// A task with its signature history.
pub type TaskSnapshot<'a> = Snapshot<'a, TaskRecord>;
/// An execution with its signature history.
pub type ExecutionSnapshot<'a> = Snapshot<'a, ExecutionRecord>;

impl<T> Snapshot<'_, T> {
    /// Newest signature timestamp, if any signature exists.
    #[must_use]
    pub fn signed_at(&self) -> Option<i64> {
        self.signatures.iter().map(|s| s.timestamp).max()
    }

    /// Oldest signature timestamp, if any signature exists.
    #[must_use]
    pub fn first_signed_at(&self) -> Option<i64> {
        self.signatures.iter().map(|s| s.timestamp).min()
    }
}

impl TaskSnapshot<'_> {
    /// Creation time: the timestamp embedded in the task ID, falling back
    /// to the oldest signature.
    #[must_use]
    pub fn created_at(&self) -> Option<i64> {
        id_timestamp(&self.record.id).or_else(|| self.first_signed_at())
    }

    /// When work started: the earliest signature strictly after creation,
    /// falling back to creation itself.
    #[must_use]
    pub fn started_at(&self) -> Option<i64> {
        let created = self.created_at()?;
        self.signatures
            .iter()
            .map(|s| s.timestamp)
            .filter(|ts| *ts > created)
            .min()
            .or(Some(created))
    }
}

// ---------------------------------------------------------------------------
// Health and distribution
// ---------------------------------------------------------------------------

/// Points awarded to a task by status.
fn status_points(status: TaskStatus) -> f64 {
    match status {
        TaskStatus::Done | TaskStatus::Archived => 100.0,
        TaskStatus::Active | TaskStatus::Review | TaskStatus::Ready => 80.0,
        TaskStatus::Draft => 60.0,
        TaskStatus::Paused | TaskStatus::Blocked | TaskStatus::Discarded => 0.0,
    }
}

/// Weighted project health in `[0, 100]`. Empty input is 0.
///
/// # Examples
///
/// ```
/// assert_eq!(gitgov_metrics::health(&[]), 0.0);
/// ```
#[must_use]
pub fn health(tasks: &[TaskRecord]) -> f64 {
    if tasks.is_empty() {
        return 0.0;
    }
    let sum: f64 = tasks.iter().map(|t| status_points(t.status)).sum();
    sum / tasks.len() as f64
}

/// Percentage of tasks per status.
///
/// Takes raw status strings so callers projecting unvalidated payloads can
/// use it too; unknown statuses are ignored entirely (they contribute to
/// neither numerator nor denominator). Empty input is an empty map.
#[must_use]
pub fn backlog_distribution<'a>(
    statuses: impl IntoIterator<Item = &'a str>,
) -> BTreeMap<String, f64> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut known = 0usize;
    for status in statuses {
        if parse_status(status).is_some() {
            *counts.entry(status.to_string()).or_default() += 1;
            known += 1;
        }
    }
    if known == 0 {
        return BTreeMap::new();
    }
    counts
        .into_iter()
        .map(|(status, count)| (status, count as f64 / known as f64 * 100.0))
        .collect()
}

fn parse_status(status: &str) -> Option<TaskStatus> {
    match status {
        "draft" => Some(TaskStatus::Draft),
        "review" => Some(TaskStatus::Review),
        "ready" => Some(TaskStatus::Ready),
        "active" => Some(TaskStatus::Active),
        "done" => Some(TaskStatus::Done),
        "archived" => Some(TaskStatus::Archived),
        "paused" => Some(TaskStatus::Paused),
        "discarded" => Some(TaskStatus::Discarded),
        "blocked" => Some(TaskStatus::Blocked),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Staleness
// ---------------------------------------------------------------------------

fn days_between(from: i64, now: DateTime<Utc>) -> f64 {
    ((now.timestamp() - from) as f64 / SECONDS_PER_DAY).max(0.0)
}

/// Days a task has sat in its current stage: since the newest signature,
/// falling back to the timestamp embedded in the task ID.
#[must_use]
pub fn time_in_current_stage(task: &TaskSnapshot<'_>, now: DateTime<Utc>) -> f64 {
    match task.signed_at().or_else(|| id_timestamp(&task.record.id)) {
        Some(ts) => days_between(ts, now),
        None => 0.0,
    }
}

/// Days since the newest execution related to any of `tasks`. 0 when no
/// related execution exists.
#[must_use]
pub fn staleness_index(
    tasks: &[TaskRecord],
    executions: &[ExecutionSnapshot<'_>],
    now: DateTime<Utc>,
) -> f64 {
    let task_ids: BTreeSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    let newest = executions
        .iter()
        .filter(|e| task_ids.contains(e.record.task_id.as_str()))
        .filter_map(execution_timestamp)
        .max();
    match newest {
        Some(ts) => days_between(ts, now),
        None => 0.0,
    }
}

/// Days since the newest execution for one task, or `None` when the task
/// has no executions.
#[must_use]
pub fn days_since_last_execution(
    task_id: &str,
    executions: &[ExecutionSnapshot<'_>],
    now: DateTime<Utc>,
) -> Option<f64> {
    executions
        .iter()
        .filter(|e| e.record.task_id == task_id)
        .filter_map(execution_timestamp)
        .max()
        .map(|ts| days_between(ts, now))
}

fn execution_timestamp(execution: &ExecutionSnapshot<'_>) -> Option<i64> {
    execution
        .signed_at()
        .or_else(|| id_timestamp(&execution.record.id))
}

/// Maximum age in days among open `blocking` feedback. 0 when none is open.
#[must_use]
pub fn blocking_feedback_age(feedback: &[FeedbackRecord], now: DateTime<Utc>) -> f64 {
    feedback
        .iter()
        .filter(|f| {
            f.feedback_type == FeedbackKind::Blocking && f.status == FeedbackStatus::Open
        })
        .filter_map(|f| id_timestamp(&f.id))
        .map(|ts| days_between(ts, now))
        .fold(0.0, f64::max)
}

// ---------------------------------------------------------------------------
// Flow
// ---------------------------------------------------------------------------

/// Number of tasks completed within the last seven days.
///
/// A task counts when it is closed as done or archived and its newest
/// signature falls inside the window.
#[must_use]
pub fn throughput(tasks: &[TaskSnapshot<'_>], now: DateTime<Utc>) -> usize {
    let cutoff = now.timestamp() - (RECENT_WINDOW_DAYS * SECONDS_PER_DAY) as i64;
    tasks
        .iter()
        .filter(|t| matches!(t.record.status, TaskStatus::Done | TaskStatus::Archived))
        .filter_map(|t| t.signed_at())
        .filter(|ts| *ts >= cutoff)
        .count()
}

/// Average days from creation to completion over closed tasks. 0 when no
/// task qualifies.
#[must_use]
pub fn lead_time(tasks: &[TaskSnapshot<'_>]) -> f64 {
    average_days(tasks, |t| Some((t.created_at()?, t.signed_at()?)))
}

/// Average days from the start of work to completion over closed tasks.
/// 0 when no task qualifies.
#[must_use]
pub fn cycle_time(tasks: &[TaskSnapshot<'_>]) -> f64 {
    average_days(tasks, |t| Some((t.started_at()?, t.signed_at()?)))
}

fn average_days(
    tasks: &[TaskSnapshot<'_>],
    span: impl Fn(&TaskSnapshot<'_>) -> Option<(i64, i64)>,
) -> f64 {
    let spans: Vec<f64> = tasks
        .iter()
        .filter(|t| t.record.status.is_closed())
        .filter_map(|t| span(t))
        .map(|(from, to)| ((to - from) as f64 / SECONDS_PER_DAY).max(0.0))
        .collect();
    if spans.is_empty() {
        return 0.0;
    }
    spans.iter().sum::<f64>() / spans.len() as f64
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

/// Distinct agent actors with executions signed within the last 24 hours.
#[must_use]
pub fn active_agents(
    actors: &[ActorRecord],
    executions: &[ExecutionSnapshot<'_>],
    now: DateTime<Utc>,
) -> usize {
    let cutoff = now.timestamp() - (AGENT_ACTIVITY_WINDOW_HOURS * 3_600.0) as i64;
    let agent_ids: BTreeSet<&str> = actors
        .iter()
        .filter(|a| a.actor_type == ActorType::Agent)
        .map(|a| a.id.as_str())
        .collect();

    let mut active: BTreeSet<&str> = BTreeSet::new();
    for execution in executions {
        for sig in execution.signatures {
            if sig.timestamp >= cutoff && agent_ids.contains(sig.key_id.as_str()) {
                active.insert(sig.key_id.as_str());
            }
        }
    }
    active.len()
}

// ---------------------------------------------------------------------------
// Future tiers
// ---------------------------------------------------------------------------

/// Velocity forecasting belongs to a later tier.
///
/// # Errors
///
/// Always [`MetricsError::NotImplemented`].
pub fn velocity_forecast(_tasks: &[TaskSnapshot<'_>]) -> Result<f64, MetricsError> {
    Err(MetricsError::NotImplemented {
        metric: "velocity_forecast".into(),
    })
}

/// Burndown projection belongs to a later tier.
///
/// # Errors
///
/// Always [`MetricsError::NotImplemented`].
pub fn burndown(_tasks: &[TaskSnapshot<'_>]) -> Result<Vec<f64>, MetricsError> {
    Err(MetricsError::NotImplemented {
        metric: "burndown".into(),
    })
}
