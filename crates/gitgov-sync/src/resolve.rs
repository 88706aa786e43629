// SPDX-License-Identifier: MIT OR Apache-2.0
//! Resolve protocol: marker preflight, resolver re-signing, rebase
//! continuation, and the auditable empty resolution commit.

use crate::{ResolveOptions, ResolveResult, SyncEngine, SyncError};
use gitgov_record::{RecordWrapper, SignatureRole, reseal};
use gitgov_store::should_sync_file;
use tracing::info;

impl SyncEngine {
    /// Finish a conflicted rebase on the state worktree.
    ///
    /// The caller has already edited the conflicted files and removed the
    /// markers. Every resolved record is re-signed as `resolver` with the
    /// supplied reason, the rebase continues, and an empty commit marks
    /// the resolution in the branch history for the audit to find.
    ///
    /// # Errors
    ///
    /// - [`SyncError::NoRebaseInProgress`] when there is nothing to
    ///   resolve.
    /// - [`SyncError::ActorIdentityMismatch`] when `options.actor_id` is
    ///   not the authenticated actor.
    /// - [`SyncError::ConflictMarkersPresent`] when markers remain; git
    ///   state is untouched in that case.
    /// - [`SyncError::IdentityKeyUnavailable`] when the identity provider
    ///   cannot sign.
    pub async fn resolve_conflict(
        &self,
        options: &ResolveOptions,
    ) -> Result<ResolveResult, SyncError> {
        if !self.is_rebase_in_progress().await {
            return Err(SyncError::NoRebaseInProgress);
        }
        self.require_actor(&options.actor_id)?;

        let worktree = self.worktree_path();
        let conflicted = self.conflicted_files().await?;

        // Preflight: refuse to touch git state while markers remain.
        let mut still_marked = Vec::new();
        for file in &conflicted {
            let path = worktree.join(file);
            let text = tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| SyncError::Io {
                    path: path.clone(),
                    source,
                })?;
            if text.contains("<<<<<<<") || text.contains(">>>>>>>") {
                still_marked.push(file.clone());
            }
        }
        if !still_marked.is_empty() {
            return Err(SyncError::ConflictMarkersPresent {
                files: still_marked,
            });
        }

        let signer = self
            .identity
            .signer()
            .ok_or(SyncError::IdentityKeyUnavailable)?;
        let now = chrono::Utc::now();

        // Re-sign every resolved record so the merged payload carries a
        // resolver signature over its fresh checksum.
        let mut files_resolved = 0usize;
        for file in &conflicted {
            if !should_sync_file(file) || file.ends_with("config.json") {
                continue;
            }
            let path = worktree.join(file);
            let text = tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| SyncError::Io {
                    path: path.clone(),
                    source,
                })?;
            let wrapper = RecordWrapper::from_json(&text)?;
            let resolved = reseal(
                &wrapper,
                &signer,
                SignatureRole::Resolver,
                Some(options.reason.clone()),
                now,
            )?;
            tokio::fs::write(&path, resolved.to_json()?)
                .await
                .map_err(|source| SyncError::Io {
                    path: path.clone(),
                    source,
                })?;
            files_resolved += 1;
        }

        self.git.run(&worktree, &["add", ".gitgov/"]).await?;
        self.git.run(&worktree, &["rebase", "--continue"]).await?;

        // Auditable marker: an empty commit naming the actor and reason,
        // immediately after the continued rebase.
        let message = format!(
            "gitgov: resolve conflict [actor:{}] reason: {}",
            options.actor_id, options.reason
        );
        self.git
            .run(&worktree, &["commit", "--allow-empty", "-m", &message])
            .await?;
        let resolution_commit_hash = self.rev_parse(&worktree, "HEAD").await?;

        self.git
            .run(&worktree, &["push", "origin", &self.state_branch])
            .await?;

        self.mirror_from_worktree().await?;
        self.update_manifest().await?;
        self.reindex().await?;

        info!(
            files = files_resolved,
            commit = resolution_commit_hash.as_deref().unwrap_or("none"),
            "conflict resolved"
        );
        Ok(ResolveResult {
            success: true,
            resolution_commit_hash,
            files_resolved,
        })
    }
}
