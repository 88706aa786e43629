// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! gitgov-sync
//!
//! The state synchronization engine. Records under `<repo>/.gitgov/` are
//! reconciled with the shared `gitgov-state` branch through a dedicated
//! git worktree at `<repo>/.gitgov-worktree/`, so the user's working tree
//! never switches branches. Push and pull reconcile through rebase;
//! conflicts come back as structured results, resolutions are re-signed
//! and marked with an auditable empty commit, and an integrity audit can
//! walk the branch history for rebases that were never resolved.
//!
//! Collaborators — the git subprocess runner, identity, lint, and the
//! indexer — are injected, so deployments can swap any of them.

/// Integrity audit over the state branch history.
pub mod audit;
/// Conflict-marker parsing and diff extraction.
pub mod conflict;
/// Worktree ↔ repository mirroring and porcelain delta parsing.
pub mod delta;
/// Git subprocess runner.
pub mod git;
/// Pull protocol.
pub mod pull;
/// Push protocol.
pub mod push;
/// Resolve protocol.
pub mod resolve;
/// Worktree lifecycle and rebase detection.
pub mod worktree;

pub use audit::{AuditOptions, AuditReport, IntegrityViolation};
pub use conflict::{ConflictDiff, ConflictFileDiff};
pub use git::{GitError, GitOutput, GitRunner, TokioGit};

use gitgov_bus::EventBus;
use gitgov_record::{RecordError, Signer};
use gitgov_store::lint::{LintOptions, LintReport};
use gitgov_store::{GITGOV_DIR, StoreError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Directory name of the managed worktree inside the repository.
pub const WORKTREE_DIR: &str = ".gitgov-worktree";
/// Default name of the shared state branch.
pub const DEFAULT_STATE_BRANCH: &str = "gitgov-state";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from the sync engine.
///
/// Rebase conflicts during push and pull are *not* errors: they come back
/// as structured results so the happy path and the conflict path share a
/// return shape.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A rebase is already in progress on the worktree.
    #[error("a rebase is already in progress on the state worktree")]
    RebaseAlreadyInProgress,

    /// No rebase is in progress, so there is nothing to resolve.
    #[error("no rebase is in progress on the state worktree")]
    NoRebaseInProgress,

    /// The authenticated actor does not match the requested one.
    #[error("actor identity mismatch: authenticated as {actual}, requested {requested}")]
    ActorIdentityMismatch {
        /// The actor the session is authenticated as.
        actual: String,
        /// The actor the caller requested to act as.
        requested: String,
    },

    /// Conflict markers are still present in files being resolved.
    #[error("conflict markers still present in {} file(s)", .files.len())]
    ConflictMarkersPresent {
        /// Files that still contain markers.
        files: Vec<String>,
    },

    /// The worktree could not be provisioned.
    #[error("worktree setup failed at {path}: {detail}")]
    WorktreeSetupError {
        /// The worktree path.
        path: PathBuf,
        /// What went wrong.
        detail: String,
    },

    /// The state branch could not be created or resolved.
    #[error("state branch setup failed: {detail}")]
    StateBranchSetupError {
        /// What went wrong.
        detail: String,
    },

    /// The identity provider has no signing key, so records cannot be
    /// re-signed during resolution.
    #[error("no signing key available for conflict resolution")]
    IdentityKeyUnavailable,

    /// A git invocation failed.
    #[error(transparent)]
    Git(#[from] GitError),

    /// A store or lint operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A record could not be parsed or re-sealed.
    #[error(transparent)]
    Record(#[from] RecordError),

    /// A filesystem operation failed.
    #[error("io error on {path}: {source}")]
    Io {
        /// Path of the offending file.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Re-indexing after a sync failed.
    #[error("reindex failed: {detail}")]
    Index {
        /// Indexer error detail.
        detail: String,
    },
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Structured description of a rebase conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictInfo {
    /// Conflict kind; currently always `rebase_conflict`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Files left in a conflicted state.
    pub affected_files: Vec<String>,
    /// Human-readable steps to resolve.
    pub resolution_steps: Vec<String>,
}

impl ConflictInfo {
    /// A rebase conflict over `affected_files`.
    #[must_use]
    pub fn rebase(affected_files: Vec<String>) -> Self {
        Self {
            kind: "rebase_conflict".into(),
            affected_files,
            resolution_steps: vec![
                "edit the affected files and remove the conflict markers".into(),
                "call resolve_conflict with your actor id and a reason".into(),
            ],
        }
    }

    /// Serialize for the event bus.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Files brought in by the implicit pull a push performs before pushing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImplicitPull {
    /// Syncable files the rebase brought in.
    pub files_updated: usize,
    /// Whether the index was recomputed afterwards.
    pub reindexed: bool,
}

/// Outcome of a push.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResult {
    /// Whether the push succeeded.
    pub success: bool,
    /// Number of syncable files in the pushed delta.
    pub files_synced: usize,
    /// SHA of the sync commit, when one was made.
    pub commit_hash: Option<String>,
    /// Message of the sync commit, when one was made.
    pub commit_message: Option<String>,
    /// Whether a rebase conflict was detected.
    pub conflict_detected: bool,
    /// Conflict detail when `conflict_detected`.
    pub conflict_info: Option<ConflictInfo>,
    /// Failure reason when `success` is false without a conflict.
    pub error: Option<String>,
    /// Set when the pre-push rebase brought in remote changes.
    pub implicit_pull: Option<ImplicitPull>,
}

/// Outcome of a pull.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResult {
    /// Whether the pull succeeded.
    pub success: bool,
    /// Whether remote changes were brought in.
    pub has_changes: bool,
    /// Syncable files updated in the repository.
    pub files_updated: usize,
    /// Whether the index was recomputed.
    pub reindexed: bool,
    /// Whether a rebase conflict was detected.
    pub conflict_detected: bool,
    /// Conflict detail when `conflict_detected`.
    pub conflict_info: Option<ConflictInfo>,
    /// Failure reason when `success` is false without a conflict.
    pub error: Option<String>,
}

/// Outcome of a successful conflict resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveResult {
    /// Always true; failures are errors.
    pub success: bool,
    /// SHA of the empty resolution commit.
    pub resolution_commit_hash: Option<String>,
    /// Records that were re-signed as resolver.
    pub files_resolved: usize,
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Options for [`SyncEngine::push_state`].
#[derive(Debug, Clone)]
pub struct PushOptions {
    /// Actor the push is performed as; must match the authenticated one.
    pub actor_id: String,
    /// Branch the records were authored on, for context only.
    pub source_branch: Option<String>,
    /// Preview the delta without mutating anything.
    pub dry_run: bool,
    /// Skip the pre-push rebase against the remote.
    pub force: bool,
}

impl PushOptions {
    /// Push as `actor_id` with default flags.
    #[must_use]
    pub fn new(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            source_branch: None,
            dry_run: false,
            force: false,
        }
    }
}

/// Options for [`SyncEngine::pull_state`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PullOptions {
    /// Discard local syncable changes instead of auto-committing them.
    pub force: bool,
    /// Re-index even when already up to date.
    pub force_reindex: bool,
}

/// Options for [`SyncEngine::resolve_conflict`].
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Why the conflict was resolved this way; recorded in the resolution
    /// commit and in the resolver signatures.
    pub reason: String,
    /// Actor performing the resolution; must match the authenticated one.
    pub actor_id: String,
}

// ---------------------------------------------------------------------------
// Injectable collaborators
// ---------------------------------------------------------------------------

/// Supplies the authenticated actor and its signing key.
pub trait IdentityProvider: Send + Sync {
    /// The actor this machine operates as, when configured.
    fn actor_id(&self) -> Option<String>;
    /// The actor's signing key, when available.
    fn signer(&self) -> Option<Arc<Signer>>;
}

/// A fixed identity.
pub struct StaticIdentity {
    actor_id: String,
    signer: Option<Arc<Signer>>,
}

impl StaticIdentity {
    /// Identity for `actor_id`, optionally able to sign.
    #[must_use]
    pub fn new(actor_id: impl Into<String>, signer: Option<Arc<Signer>>) -> Self {
        Self {
            actor_id: actor_id.into(),
            signer,
        }
    }
}

impl IdentityProvider for StaticIdentity {
    fn actor_id(&self) -> Option<String> {
        Some(self.actor_id.clone())
    }

    fn signer(&self) -> Option<Arc<Signer>> {
        self.signer.clone()
    }
}

/// Identity resolved from `.gitgov/.session.json` on every check, so an
/// actor switch takes effect without restarting the engine. The signing
/// key is supplied by the embedder; the session file never holds key
/// material.
pub struct SessionIdentity {
    gitgov_dir: PathBuf,
    signer: Option<Arc<Signer>>,
}

impl SessionIdentity {
    /// Identity backed by the session file under `gitgov_dir`.
    #[must_use]
    pub fn new(gitgov_dir: impl Into<PathBuf>, signer: Option<Arc<Signer>>) -> Self {
        Self {
            gitgov_dir: gitgov_dir.into(),
            signer,
        }
    }
}

impl IdentityProvider for SessionIdentity {
    fn actor_id(&self) -> Option<String> {
        let text = std::fs::read_to_string(self.gitgov_dir.join(".session.json")).ok()?;
        let session: serde_json::Value = serde_json::from_str(&text).ok()?;
        session.get("actorId")?.as_str().map(String::from)
    }

    fn signer(&self) -> Option<Arc<Signer>> {
        self.signer.clone()
    }
}

/// Validates the records about to be synced.
#[async_trait]
pub trait Lint: Send + Sync {
    /// Lint the records under `gitgov_dir`.
    async fn lint(&self, gitgov_dir: &Path) -> Result<LintReport, StoreError>;
}

/// The default lint: full record validation via [`gitgov_store::lint_tree`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordLint {
    /// Verification toggles.
    pub options: LintOptions,
}

#[async_trait]
impl Lint for RecordLint {
    async fn lint(&self, gitgov_dir: &Path) -> Result<LintReport, StoreError> {
        gitgov_store::lint_tree(gitgov_dir, &self.options).await
    }
}

/// Recomputes the projection after state changes.
#[async_trait]
pub trait Indexer: Send + Sync {
    /// Recompute and persist the index.
    async fn reindex(&self) -> Result<(), String>;
}

/// An indexer that does nothing, for deployments without a projector.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopIndexer;

#[async_trait]
impl Indexer for NoopIndexer {
    async fn reindex(&self) -> Result<(), String> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The sync engine. One instance per repository; the worktree is a
/// single-writer resource.
pub struct SyncEngine {
    pub(crate) repo_root: PathBuf,
    pub(crate) state_branch: String,
    pub(crate) git: Arc<dyn GitRunner>,
    pub(crate) identity: Arc<dyn IdentityProvider>,
    pub(crate) lint: Arc<dyn Lint>,
    pub(crate) indexer: Arc<dyn Indexer>,
    pub(crate) bus: Option<EventBus>,
}

impl SyncEngine {
    /// Engine for the repository at `repo_root` with default collaborators
    /// (system git, full lint, no indexer, no event bus).
    #[must_use]
    pub fn new(repo_root: impl Into<PathBuf>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            repo_root: repo_root.into(),
            state_branch: DEFAULT_STATE_BRANCH.into(),
            git: Arc::new(TokioGit),
            identity,
            lint: Arc::new(RecordLint::default()),
            indexer: Arc::new(NoopIndexer),
            bus: None,
        }
    }

    /// Override the state branch name.
    #[must_use]
    pub fn with_state_branch(mut self, branch: impl Into<String>) -> Self {
        self.state_branch = branch.into();
        self
    }

    /// Override the git runner.
    #[must_use]
    pub fn with_git(mut self, git: Arc<dyn GitRunner>) -> Self {
        self.git = git;
        self
    }

    /// Override the lint implementation.
    #[must_use]
    pub fn with_lint(mut self, lint: Arc<dyn Lint>) -> Self {
        self.lint = lint;
        self
    }

    /// Override the indexer.
    #[must_use]
    pub fn with_indexer(mut self, indexer: Arc<dyn Indexer>) -> Self {
        self.indexer = indexer;
        self
    }

    /// Attach an event bus for sync events.
    #[must_use]
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// The repository root.
    #[must_use]
    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// The managed worktree path (`<repo>/.gitgov-worktree`).
    #[must_use]
    pub fn worktree_path(&self) -> PathBuf {
        self.repo_root.join(WORKTREE_DIR)
    }

    /// The live record tree (`<repo>/.gitgov`).
    #[must_use]
    pub fn gitgov_dir(&self) -> PathBuf {
        self.repo_root.join(GITGOV_DIR)
    }

    /// The record tree inside the worktree.
    #[must_use]
    pub fn worktree_gitgov_dir(&self) -> PathBuf {
        self.worktree_path().join(GITGOV_DIR)
    }

    /// The state branch name.
    #[must_use]
    pub fn state_branch(&self) -> &str {
        &self.state_branch
    }

    pub(crate) fn remote_ref(&self) -> String {
        format!("refs/remotes/origin/{}", self.state_branch)
    }

    pub(crate) fn require_actor(&self, requested: &str) -> Result<(), SyncError> {
        let actual = self.identity.actor_id().unwrap_or_default();
        if actual != requested {
            return Err(SyncError::ActorIdentityMismatch {
                actual,
                requested: requested.to_string(),
            });
        }
        Ok(())
    }

    pub(crate) async fn reindex(&self) -> Result<(), SyncError> {
        self.indexer
            .reindex()
            .await
            .map_err(|detail| SyncError::Index { detail })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_identity_tracks_the_session_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let identity = SessionIdentity::new(dir.path(), None);
        assert_eq!(identity.actor_id(), None);

        std::fs::write(
            dir.path().join(".session.json"),
            r#"{"actorId": "human:alice"}"#,
        )
        .unwrap();
        assert_eq!(identity.actor_id().as_deref(), Some("human:alice"));

        std::fs::write(
            dir.path().join(".session.json"),
            r#"{"actorId": "human:bob"}"#,
        )
        .unwrap();
        assert_eq!(identity.actor_id().as_deref(), Some("human:bob"));
    }

    #[test]
    fn conflict_info_carries_resolution_steps() {
        let info = ConflictInfo::rebase(vec![".gitgov/tasks/1700000000-task-x.json".into()]);
        assert_eq!(info.kind, "rebase_conflict");
        assert!(!info.resolution_steps.is_empty());
        let value = info.to_value();
        assert_eq!(value["type"], "rebase_conflict");
        assert_eq!(
            value["affectedFiles"][0],
            ".gitgov/tasks/1700000000-task-x.json"
        );
    }
}
