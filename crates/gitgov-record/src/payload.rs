// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed payload entities.
//!
//! Each record kind has a strict payload shape; wire field names are
//! camelCase and enum values are lowercase strings. The [`EntityPayload`]
//! trait ties a payload type to its [`RecordType`] tag so the factory and
//! stores can stay generic.

use crate::{RecordType, id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::BTreeMap;

/// A payload type that can be sealed into a record wrapper.
pub trait EntityPayload: Serialize + DeserializeOwned {
    /// The header tag for this payload.
    const KIND: RecordType;

    /// The record's ID.
    fn record_id(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Workflow state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Being drafted, not yet reviewable.
    Draft,
    /// Under review.
    Review,
    /// Approved and waiting to start.
    Ready,
    /// In progress.
    Active,
    /// Finished.
    Done,
    /// Finished and archived.
    Archived,
    /// Intentionally on hold.
    Paused,
    /// Abandoned.
    Discarded,
    /// Blocked on something external.
    Blocked,
}

impl TaskStatus {
    /// Lowercase wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Draft => "draft",
            TaskStatus::Review => "review",
            TaskStatus::Ready => "ready",
            TaskStatus::Active => "active",
            TaskStatus::Done => "done",
            TaskStatus::Archived => "archived",
            TaskStatus::Paused => "paused",
            TaskStatus::Discarded => "discarded",
            TaskStatus::Blocked => "blocked",
        }
    }

    /// Whether the task has reached a terminal state.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            TaskStatus::Done | TaskStatus::Archived | TaskStatus::Discarded
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Nice to have.
    Low,
    /// Default.
    Medium,
    /// Should jump the queue.
    High,
    /// Drop everything.
    Critical,
}

/// A unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    /// Record ID (`<ts>-task-<slug>`).
    pub id: String,
    /// Short human title.
    pub title: String,
    /// Workflow state.
    pub status: TaskStatus,
    /// Priority.
    pub priority: Priority,
    /// Longer description of the work.
    pub description: String,
    /// Free-form labels.
    #[serde(default)]
    pub tags: Vec<String>,
    /// External references (URLs, ticket IDs).
    #[serde(default)]
    pub references: Vec<String>,
    /// Cycles this task belongs to.
    #[serde(default)]
    pub cycle_ids: Vec<String>,
    /// Optional working notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl TaskRecord {
    /// Create a draft task with a generated ID.
    #[must_use]
    pub fn new(title: impl Into<String>, description: impl Into<String>, now: DateTime<Utc>) -> Self {
        let title = title.into();
        let id = id::generate_record_id(RecordType::Task, &title, now)
            .unwrap_or_default();
        Self {
            id,
            title,
            status: TaskStatus::Draft,
            priority: Priority::Medium,
            description: description.into(),
            tags: Vec::new(),
            references: Vec::new(),
            cycle_ids: Vec::new(),
            notes: None,
        }
    }
}

impl EntityPayload for TaskRecord {
    const KIND: RecordType = RecordType::Task;

    fn record_id(&self) -> &str {
        &self.id
    }
}

// ---------------------------------------------------------------------------
// Cycle
// ---------------------------------------------------------------------------

/// Lifecycle state of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleStatus {
    /// Being planned.
    Planning,
    /// In progress.
    Active,
    /// Finished.
    Completed,
    /// Finished and archived.
    Archived,
}

/// A grouping of tasks and child cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleRecord {
    /// Record ID (`<ts>-cycle-<slug>`).
    pub id: String,
    /// Short human title.
    pub title: String,
    /// Lifecycle state.
    pub status: CycleStatus,
    /// Tasks directly inside this cycle.
    #[serde(default)]
    pub task_ids: Vec<String>,
    /// Nested cycles.
    #[serde(default)]
    pub child_cycle_ids: Vec<String>,
    /// Free-form labels.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Optional working notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl CycleRecord {
    /// Create a planning-state cycle with a generated ID.
    #[must_use]
    pub fn new(title: impl Into<String>, now: DateTime<Utc>) -> Self {
        let title = title.into();
        let id = id::generate_record_id(RecordType::Cycle, &title, now)
            .unwrap_or_default();
        Self {
            id,
            title,
            status: CycleStatus::Planning,
            task_ids: Vec::new(),
            child_cycle_ids: Vec::new(),
            tags: Vec::new(),
            notes: None,
        }
    }
}

impl EntityPayload for CycleRecord {
    const KIND: RecordType = RecordType::Cycle;

    fn record_id(&self) -> &str {
        &self.id
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// Whether an actor is a human or an automated agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    /// A person.
    Human,
    /// An automated agent.
    Agent,
}

/// A participant identity with a verification key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorRecord {
    /// Actor ID (`human:name` or `agent:name`).
    pub id: String,
    /// Human or agent.
    #[serde(rename = "type")]
    pub actor_type: ActorType,
    /// Display name for rendering.
    pub display_name: String,
    /// Base64 Ed25519 public key.
    pub public_key: String,
    /// Roles held by this actor. Never empty.
    pub roles: Vec<String>,
    /// Set when this identity was rotated to a successor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
}

impl EntityPayload for ActorRecord {
    const KIND: RecordType = RecordType::Actor;

    fn record_id(&self) -> &str {
        &self.id
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// How an agent is invoked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AgentEngine {
    /// Runs in-process through a registered runtime handler.
    Local {
        /// Named runtime handler to dispatch to.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        runtime: Option<String>,
        /// Handler entrypoint, resolved against the project root.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        entrypoint: Option<String>,
        /// Exported function name; defaults to `runAgent`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        function: Option<String>,
    },
    /// Invoked over HTTP.
    Api {
        /// Endpoint URL.
        url: String,
        /// Auth scheme (e.g. `actor-signature`).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auth: Option<String>,
    },
    /// Reachable over MCP. Parsed but not yet invocable.
    Mcp {
        /// Transport-specific settings, preserved verbatim.
        #[serde(flatten)]
        settings: BTreeMap<String, serde_json::Value>,
    },
}

/// An automated agent definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    /// Record ID (`<ts>-agent-<slug>`).
    pub id: String,
    /// Invocation backend.
    pub engine: AgentEngine,
    /// Conditions under which the agent should run.
    #[serde(default)]
    pub triggers: Vec<serde_json::Value>,
    /// Knowledge assets the agent depends on.
    #[serde(default, rename = "knowledge_dependencies")]
    pub knowledge_dependencies: Vec<String>,
    /// Requirements the prompt engine must satisfy.
    #[serde(default, rename = "prompt_engine_requirements")]
    pub prompt_engine_requirements: BTreeMap<String, serde_json::Value>,
}

impl EntityPayload for AgentRecord {
    const KIND: RecordType = RecordType::Agent;

    fn record_id(&self) -> &str {
        &self.id
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// What kind of report an execution is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionType {
    /// Investigation results.
    Analysis,
    /// Progress update.
    Progress,
    /// Something is in the way.
    Blocker,
    /// The task finished.
    Completion,
    /// Informational note.
    Info,
    /// Corrects an earlier execution.
    Correction,
}

/// A report attached to a task, optionally carrying open metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    /// Record ID (`<ts>-exec-<slug>`).
    pub id: String,
    /// The task this execution reports on.
    pub task_id: String,
    /// Report kind.
    #[serde(rename = "type")]
    pub execution_type: ExecutionType,
    /// Short human title.
    pub title: String,
    /// What happened. At least ten characters.
    pub result: String,
    /// Optional notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// External references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<Vec<String>>,
    /// Arbitrary JSON metadata bag. The root must be an object; values are
    /// unconstrained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl EntityPayload for ExecutionRecord {
    const KIND: RecordType = RecordType::Execution;

    fn record_id(&self) -> &str {
        &self.id
    }
}

// ---------------------------------------------------------------------------
// Feedback
// ---------------------------------------------------------------------------

/// The entity kinds feedback and changelogs can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    /// A task record.
    Task,
    /// A cycle record.
    Cycle,
    /// An agent record.
    Agent,
    /// The system as a whole.
    System,
    /// Project configuration.
    Configuration,
}

/// What kind of feedback this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    /// A question needing an answer.
    Question,
    /// A non-blocking suggestion.
    Suggestion,
    /// Blocks progress until resolved.
    Blocking,
    /// Assigns the entity to an actor.
    Assignment,
    /// Approves the entity.
    Approval,
}

/// Whether feedback is still open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackStatus {
    /// Awaiting resolution.
    Open,
    /// Resolved.
    Resolved,
}

/// A question, suggestion, or blocker on another entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRecord {
    /// Record ID (`<ts>-feedback-<slug>`).
    pub id: String,
    /// What kind of entity this feedback targets.
    pub entity_type: EntityType,
    /// ID of the targeted entity.
    pub entity_id: String,
    /// Feedback kind.
    #[serde(rename = "type")]
    pub feedback_type: FeedbackKind,
    /// Open or resolved.
    pub status: FeedbackStatus,
    /// The feedback text.
    pub content: String,
    /// Actor the feedback assigns work to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    /// When this feedback resolves an earlier one, its ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolves_feedback_id: Option<String>,
}

impl EntityPayload for FeedbackRecord {
    const KIND: RecordType = RecordType::Feedback;

    fn record_id(&self) -> &str {
        &self.id
    }
}

// ---------------------------------------------------------------------------
// Changelog
// ---------------------------------------------------------------------------

/// The kind of change a changelog entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// Something new was created.
    Creation,
    /// Work was completed.
    Completion,
    /// An update to existing state.
    Update,
    /// Something was deleted.
    Deletion,
    /// An emergency fix.
    Hotfix,
}

/// How the change was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    /// A person initiated it.
    Manual,
    /// Automation initiated it.
    Automated,
    /// Emergency procedure.
    Emergency,
}

/// Risk classification of a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Routine.
    Low,
    /// Needs attention.
    Medium,
    /// Needs rollback instructions.
    High,
    /// Needs rollback instructions and sign-off.
    Critical,
}

/// Cross-record references carried by a changelog entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangelogReferences {
    /// Task IDs involved in the change.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<String>,
    /// Cycle IDs involved in the change.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cycles: Vec<String>,
    /// Commit SHAs involved in the change.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commits: Vec<String>,
}

/// An audit entry describing a change to the work graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangelogRecord {
    /// Record ID (`<ts>-changelog-<slug>`).
    pub id: String,
    /// What kind of entity changed.
    pub entity_type: EntityType,
    /// ID of the changed entity.
    pub entity_id: String,
    /// What kind of change happened.
    pub change_type: ChangeType,
    /// Short human title.
    pub title: String,
    /// What changed and why it matters.
    pub description: String,
    /// Unix seconds at which the change happened.
    pub timestamp: i64,
    /// How the change was initiated.
    pub trigger: TriggerKind,
    /// Actor ID that triggered the change.
    pub triggered_by: String,
    /// Why the change was made.
    pub reason: String,
    /// Risk classification.
    pub risk_level: RiskLevel,
    /// How to undo the change. Required for high and critical risk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_instructions: Option<String>,
    /// Who is affected. Required for medium risk and above.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users_affected: Option<String>,
    /// Cross-record references. `completion` changes must reference tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<ChangelogReferences>,
}

impl EntityPayload for ChangelogRecord {
    const KIND: RecordType = RecordType::Changelog;

    fn record_id(&self) -> &str {
        &self.id
    }
}
