// SPDX-License-Identifier: MIT OR Apache-2.0
//! Push protocol: lint gate, delta staging, sync commit, pre-push rebase
//! with implicit-pull attribution, and the push itself.

use crate::{ConflictInfo, ImplicitPull, PushOptions, PushResult, SyncEngine, SyncError};
use gitgov_bus::GovEvent;
use gitgov_store::should_sync_file;
use std::path::Path;
use tracing::info;

impl SyncEngine {
    /// Push local record changes to the remote state branch.
    ///
    /// Rebase conflicts are reported in the result, not as errors; see
    /// [`PushResult`].
    ///
    /// # Errors
    ///
    /// - [`SyncError::RebaseAlreadyInProgress`] when a rebase is pending.
    /// - [`SyncError::ActorIdentityMismatch`] when `options.actor_id` is
    ///   not the authenticated actor.
    /// - Worktree, git, and store errors per [`SyncError`].
    pub async fn push_state(&self, options: &PushOptions) -> Result<PushResult, SyncError> {
        self.fail_if_rebasing().await?;
        self.require_actor(&options.actor_id)?;
        self.ensure_worktree().await?;

        // Lint gate: nothing leaves this machine unvalidated.
        let report = self.lint.lint(&self.gitgov_dir()).await?;
        if report.error_count() > 0 {
            return Ok(PushResult {
                success: false,
                error: Some(format!(
                    "Lint validation failed: {} error(s)",
                    report.error_count()
                )),
                ..Default::default()
            });
        }

        self.mirror_to_worktree().await?;
        let delta = self.worktree_delta().await?;

        let worktree = self.worktree_path();
        // Learn the remote position; the remote may not exist yet.
        let _ = self
            .git
            .try_run(&worktree, &["fetch", "origin", &self.state_branch])
            .await?;
        let remote_ref = self.remote_ref();
        let remote_sha = self.rev_parse(&worktree, &remote_ref).await?;
        let head_sha = self.rev_parse(&worktree, "HEAD").await?;

        if delta.is_empty() {
            let up_to_date =
                matches!((&head_sha, &remote_sha), (Some(h), Some(r)) if h == r);
            if up_to_date {
                return Ok(PushResult {
                    success: true,
                    files_synced: 0,
                    ..Default::default()
                });
            }
            // Local HEAD is ahead of the remote (or the remote branch is
            // missing): fall through and push the existing commits.
        }

        if options.dry_run {
            return Ok(PushResult {
                success: true,
                files_synced: delta.len(),
                commit_message: Some(format!("[dry-run] would sync {} file(s)", delta.len())),
                ..Default::default()
            });
        }

        let mut commit_hash = None;
        let mut commit_message = None;
        if !delta.is_empty() {
            self.stage_delta(&delta).await?;
            let message = format!("gitgov: sync state [actor:{}]", options.actor_id);
            self.git.run(&worktree, &["commit", "-m", &message]).await?;
            commit_hash = self.rev_parse(&worktree, "HEAD").await?;
            commit_message = Some(message);
        }

        let mut implicit_pull = None;
        if !options.force && remote_sha.is_some() {
            let behind = !self.is_ancestor(&worktree, &remote_ref, "HEAD").await?;
            let incoming = if behind {
                let out = self
                    .git
                    .run(&worktree, &["diff", "--name-only", "HEAD", &remote_ref])
                    .await?;
                out.lines().filter(|line| should_sync_file(line)).count()
            } else {
                0
            };

            let pull = self
                .git
                .try_run(
                    &worktree,
                    &["pull", "--rebase", "origin", &self.state_branch],
                )
                .await?;
            if !pull.success() {
                let affected = self.conflicted_files().await?;
                let conflict = ConflictInfo::rebase(affected);
                if let Some(bus) = &self.bus {
                    bus.publish(GovEvent::ConflictDetected {
                        conflict: conflict.to_value(),
                    });
                }
                return Ok(PushResult {
                    success: false,
                    files_synced: delta.len(),
                    commit_hash,
                    commit_message,
                    conflict_detected: true,
                    conflict_info: Some(conflict),
                    ..Default::default()
                });
            }

            if behind {
                // The rebase moved HEAD onto remote commits we did not
                // have: attribute that movement to an implicit pull.
                self.mirror_from_worktree().await?;
                self.reindex().await?;
                implicit_pull = Some(ImplicitPull {
                    files_updated: incoming,
                    reindexed: true,
                });
                commit_hash = self.rev_parse(&worktree, "HEAD").await?;
            }
        }

        let push = self
            .git
            .try_run(&worktree, &["push", "origin", &self.state_branch])
            .await?;
        if !push.success() {
            return Ok(PushResult {
                success: false,
                files_synced: delta.len(),
                commit_hash,
                commit_message,
                implicit_pull,
                error: Some(format!("push failed: {}", push.stderr.trim())),
                ..Default::default()
            });
        }

        self.update_manifest().await?;
        info!(
            files = delta.len(),
            commit = commit_hash.as_deref().unwrap_or("none"),
            "state pushed"
        );
        Ok(PushResult {
            success: true,
            files_synced: delta.len(),
            commit_hash,
            commit_message,
            implicit_pull,
            ..Default::default()
        })
    }

    // ── Shared git helpers ──────────────────────────────────────────────

    /// Resolve a rev to a SHA, or `None` when it does not exist.
    pub(crate) async fn rev_parse(
        &self,
        cwd: &Path,
        rev: &str,
    ) -> Result<Option<String>, SyncError> {
        let out = self
            .git
            .try_run(cwd, &["rev-parse", "--verify", "--quiet", rev])
            .await?;
        if out.success() {
            Ok(Some(out.stdout.trim().to_string()))
        } else {
            Ok(None)
        }
    }

    /// Whether `ancestor` is an ancestor of `descendant`.
    pub(crate) async fn is_ancestor(
        &self,
        cwd: &Path,
        ancestor: &str,
        descendant: &str,
    ) -> Result<bool, SyncError> {
        let out = self
            .git
            .try_run(cwd, &["merge-base", "--is-ancestor", ancestor, descendant])
            .await?;
        Ok(out.success())
    }

    /// Files currently in a conflicted (unmerged) state in the worktree.
    pub(crate) async fn conflicted_files(&self) -> Result<Vec<String>, SyncError> {
        let out = self
            .git
            .run(
                &self.worktree_path(),
                &["diff", "--name-only", "--diff-filter=U"],
            )
            .await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }
}
