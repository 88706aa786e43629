// SPDX-License-Identifier: MIT OR Apache-2.0
//! Worktree lifecycle: health check, teardown of corrupted worktrees,
//! state-branch provisioning (including orphan initialization via
//! plumbing), and in-progress rebase detection.

use crate::{SyncEngine, SyncError};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

impl SyncEngine {
    /// Ensure a healthy worktree pinned to the state branch exists,
    /// creating the branch (orphan, empty tree) when neither a local nor a
    /// remote copy of it exists yet.
    ///
    /// # Errors
    ///
    /// [`SyncError::WorktreeSetupError`] when the worktree cannot be
    /// created, [`SyncError::StateBranchSetupError`] when the branch
    /// cannot be provisioned.
    pub async fn ensure_worktree(&self) -> Result<(), SyncError> {
        let path = self.worktree_path();

        if path.exists() {
            if self.worktree_is_healthy(&path).await {
                return Ok(());
            }
            warn!(path = %path.display(), "state worktree corrupted; rebuilding");
            self.remove_worktree(&path).await?;
        }

        self.ensure_state_branch().await?;

        let path_str = path.to_string_lossy().into_owned();
        let out = self
            .git
            .try_run(
                &self.repo_root,
                &["worktree", "add", &path_str, &self.state_branch],
            )
            .await?;
        if !out.success() {
            return Err(SyncError::WorktreeSetupError {
                path,
                detail: out.stderr,
            });
        }

        self.remove_legacy_gitignore(&path).await?;
        info!(path = %path.display(), branch = %self.state_branch, "state worktree ready");
        Ok(())
    }

    /// A worktree is healthy when its `.git` pointer resolves and HEAD is
    /// the state branch.
    async fn worktree_is_healthy(&self, path: &Path) -> bool {
        if !path.join(".git").exists() {
            return false;
        }
        match self
            .git
            .try_run(path, &["rev-parse", "--abbrev-ref", "HEAD"])
            .await
        {
            Ok(out) if out.success() => out.stdout.trim() == self.state_branch,
            _ => false,
        }
    }

    /// Remove a corrupted worktree: `worktree remove --force`, falling
    /// back to a recursive delete plus `worktree prune`.
    async fn remove_worktree(&self, path: &Path) -> Result<(), SyncError> {
        let path_str = path.to_string_lossy().into_owned();
        let removed = self
            .git
            .try_run(
                &self.repo_root,
                &["worktree", "remove", "--force", &path_str],
            )
            .await?;
        if !removed.success() {
            tokio::fs::remove_dir_all(path)
                .await
                .map_err(|source| SyncError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
            self.git
                .try_run(&self.repo_root, &["worktree", "prune"])
                .await?;
        }
        Ok(())
    }

    /// Make sure the state branch exists locally: as-is, from
    /// `origin/<branch>`, or freshly orphan-initialized.
    async fn ensure_state_branch(&self) -> Result<(), SyncError> {
        let local = format!("refs/heads/{}", self.state_branch);
        let has_local = self
            .git
            .try_run(&self.repo_root, &["rev-parse", "--verify", "--quiet", &local])
            .await?
            .success();
        if has_local {
            return Ok(());
        }

        // A fetch may not have happened yet; try, but tolerate a missing
        // remote entirely.
        let _ = self
            .git
            .try_run(
                &self.repo_root,
                &["fetch", "origin", &self.state_branch],
            )
            .await?;

        let remote = self.remote_ref();
        let has_remote = self
            .git
            .try_run(&self.repo_root, &["rev-parse", "--verify", "--quiet", &remote])
            .await?
            .success();
        if has_remote {
            let out = self
                .git
                .try_run(
                    &self.repo_root,
                    &["branch", "--track", &self.state_branch, &remote],
                )
                .await?;
            if !out.success() {
                return Err(SyncError::StateBranchSetupError { detail: out.stderr });
            }
            return Ok(());
        }

        self.init_orphan_branch().await
    }

    /// Create the state branch as an orphan pointing at an empty tree,
    /// through plumbing so no checkout is needed. The fresh branch carries
    /// no `.gitignore`.
    async fn init_orphan_branch(&self) -> Result<(), SyncError> {
        let branch_err = |detail: String| SyncError::StateBranchSetupError { detail };

        let tree = self
            .git
            .run(&self.repo_root, &["hash-object", "-t", "tree", "/dev/null"])
            .await
            .map_err(|err| branch_err(err.to_string()))?;
        let tree = tree.trim();

        let commit = self
            .git
            .run(
                &self.repo_root,
                &[
                    "commit-tree",
                    tree,
                    "-m",
                    "gitgov: initialize state branch",
                ],
            )
            .await
            .map_err(|err| branch_err(err.to_string()))?;
        let commit = commit.trim();

        let local = format!("refs/heads/{}", self.state_branch);
        self.git
            .run(&self.repo_root, &["update-ref", &local, commit])
            .await
            .map_err(|err| branch_err(err.to_string()))?;

        info!(branch = %self.state_branch, commit, "state branch initialized");
        Ok(())
    }

    /// Drop a `.gitignore` a legacy peer committed to the state branch.
    async fn remove_legacy_gitignore(&self, worktree: &Path) -> Result<(), SyncError> {
        if !worktree.join(".gitignore").exists() {
            return Ok(());
        }
        warn!("legacy .gitignore found on state branch; removing");
        let removed = self
            .git
            .try_run(worktree, &["rm", "-f", ".gitignore"])
            .await?;
        if removed.success() {
            self.git
                .try_run(
                    worktree,
                    &["commit", "-m", "gitgov: remove legacy .gitignore"],
                )
                .await?;
        }
        Ok(())
    }

    /// Whether a rebase is in progress on the worktree.
    ///
    /// Resolves the worktree's `.git` pointer to its private gitdir and
    /// tests for `rebase-merge/` or `rebase-apply/`.
    pub async fn is_rebase_in_progress(&self) -> bool {
        let Some(gitdir) = self.resolve_gitdir().await else {
            return false;
        };
        gitdir.join("rebase-merge").exists() || gitdir.join("rebase-apply").exists()
    }

    async fn resolve_gitdir(&self) -> Option<PathBuf> {
        let pointer = self.worktree_path().join(".git");
        if pointer.is_dir() {
            return Some(pointer);
        }
        let text = tokio::fs::read_to_string(&pointer).await.ok()?;
        let target = text.strip_prefix("gitdir:")?.trim();
        let target = PathBuf::from(target);
        if target.is_absolute() {
            Some(target)
        } else {
            Some(self.worktree_path().join(target))
        }
    }

    /// Guard shared by push and pull.
    pub(crate) async fn fail_if_rebasing(&self) -> Result<(), SyncError> {
        if self.is_rebase_in_progress().await {
            return Err(SyncError::RebaseAlreadyInProgress);
        }
        Ok(())
    }
}
