// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pull protocol: auto-commit of local changes (or force-discard),
//! fetch, rebase, mirror-back, and re-index.

use crate::{ConflictInfo, PullOptions, PullResult, SyncEngine, SyncError};
use gitgov_bus::GovEvent;
use gitgov_store::{EXCLUDED_PATTERNS, LOCAL_ONLY};
use tracing::info;

impl SyncEngine {
    /// Bring remote state-branch changes into the local record tree.
    ///
    /// Without `force`, local syncable changes are auto-committed first so
    /// the rebase never refuses unstaged tracked changes. With `force`,
    /// local syncable changes are discarded; LOCAL_ONLY and excluded files
    /// are preserved either way.
    ///
    /// # Errors
    ///
    /// - [`SyncError::RebaseAlreadyInProgress`] when a rebase is pending.
    /// - Worktree, git, and store errors per [`SyncError`].
    pub async fn pull_state(&self, options: &PullOptions) -> Result<PullResult, SyncError> {
        self.fail_if_rebasing().await?;
        self.ensure_worktree().await?;

        let worktree = self.worktree_path();

        if options.force {
            // Revert tracked modifications, then sweep untracked syncable
            // leftovers. Every LOCAL_ONLY name and excluded pattern is an
            // explicit clean exclude.
            let _ = self
                .git
                .try_run(&worktree, &["checkout", "--", ".gitgov/"])
                .await?;
            let mut clean: Vec<String> = vec!["clean".into(), "-fd".into()];
            for name in LOCAL_ONLY {
                clean.push("-e".into());
                clean.push(name.to_string());
            }
            for pattern in EXCLUDED_PATTERNS {
                clean.push("-e".into());
                clean.push(pattern.to_string());
            }
            clean.push("--".into());
            clean.push(".gitgov/".into());
            let clean_args: Vec<&str> = clean.iter().map(String::as_str).collect();
            let _ = self.git.try_run(&worktree, &clean_args).await?;
        } else {
            self.mirror_to_worktree().await?;
            let pending = self.worktree_delta().await?;
            if !pending.is_empty() {
                self.stage_delta(&pending).await?;
                self.git
                    .run(
                        &worktree,
                        &["commit", "-m", "state: Auto-commit local changes before pull"],
                    )
                    .await?;
            }
        }

        // The remote may not exist yet; swallow fetch failures.
        let _ = self
            .git
            .try_run(&worktree, &["fetch", "origin", &self.state_branch])
            .await?;

        let remote_sha = self.rev_parse(&worktree, &self.remote_ref()).await?;
        let head_sha = self.rev_parse(&worktree, "HEAD").await?;
        let up_to_date = match (&head_sha, &remote_sha) {
            (Some(head), Some(remote)) => head == remote,
            // No remote branch: nothing to pull.
            (_, None) => true,
            // No local HEAD yet but a remote branch exists: not up to date.
            (None, Some(_)) => false,
        };

        if up_to_date && !options.force_reindex {
            // Nothing new on the remote; a fresh peer may still need the
            // checkout materialized into its live tree.
            let files_updated = self.mirror_from_worktree().await?;
            if files_updated == 0 {
                return Ok(PullResult {
                    success: true,
                    has_changes: false,
                    ..Default::default()
                });
            }
            self.update_manifest().await?;
            self.reindex().await?;
            if let Some(bus) = &self.bus {
                bus.publish(GovEvent::StateUpdated { has_changes: true });
            }
            return Ok(PullResult {
                success: true,
                has_changes: true,
                files_updated,
                reindexed: true,
                ..Default::default()
            });
        }

        if !up_to_date {
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
                return Ok(PullResult {
                    success: false,
                    conflict_detected: true,
                    conflict_info: Some(conflict),
                    ..Default::default()
                });
            }
        }

        let files_updated = self.mirror_from_worktree().await?;
        self.update_manifest().await?;
        self.reindex().await?;

        let has_changes = files_updated > 0 || !up_to_date;
        if let Some(bus) = &self.bus {
            bus.publish(GovEvent::StateUpdated { has_changes });
        }

        info!(files = files_updated, "state pulled");
        Ok(PullResult {
            success: true,
            has_changes,
            files_updated,
            reindexed: true,
            ..Default::default()
        })
    }
}
