// SPDX-License-Identifier: MIT OR Apache-2.0
//! Git subprocess runner.
//!
//! All git access goes through the [`GitRunner`] trait so tests and
//! alternative deployments can substitute their own; [`TokioGit`] is the
//! default. Every invocation is non-interactive: prompts are disabled and
//! the editor is forced to a no-op, so a rebase continue never blocks.

use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Commit identity used for engine-authored commits. Actor attribution
/// lives in the commit message, not the git author field.
const COMMIT_IDENT: [&str; 4] = [
    "-c",
    "user.name=gitgov",
    "-c",
    "user.email=gitgov@local",
];

/// Errors from running git.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    /// The git binary could not be spawned.
    #[error("failed to spawn git: {detail}")]
    Spawn {
        /// Underlying error detail.
        detail: String,
    },

    /// git exited non-zero on a command that must succeed.
    #[error("git {args} failed (status {status:?}): {stderr}")]
    Command {
        /// The argument list that failed.
        args: String,
        /// Exit status code, when the process exited.
        status: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
}

/// Captured output of a git invocation that is allowed to fail.
#[derive(Debug, Clone)]
pub struct GitOutput {
    /// Exit status code, when the process exited.
    pub status: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl GitOutput {
    /// Whether the command exited zero.
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Runs git subprocesses in a working directory.
#[async_trait]
pub trait GitRunner: Send + Sync {
    /// Run git and return stdout, failing on non-zero exit.
    async fn run(&self, cwd: &Path, args: &[&str]) -> Result<String, GitError>;

    /// Run git and capture the outcome without treating non-zero exit as
    /// an error.
    async fn try_run(&self, cwd: &Path, args: &[&str]) -> Result<GitOutput, GitError>;
}

/// The default runner: `tokio::process` over the system git binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioGit;

impl TokioGit {
    async fn invoke(cwd: &Path, args: &[&str]) -> Result<GitOutput, GitError> {
        let output = Command::new("git")
            .args(COMMIT_IDENT)
            .args(args)
            .current_dir(cwd)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_EDITOR", "true")
            .env("GIT_SEQUENCE_EDITOR", "true")
            .output()
            .await
            .map_err(|err| GitError::Spawn {
                detail: err.to_string(),
            })?;

        let out = GitOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(args = ?args, status = ?out.status, "git");
        Ok(out)
    }
}

#[async_trait]
impl GitRunner for TokioGit {
    async fn run(&self, cwd: &Path, args: &[&str]) -> Result<String, GitError> {
        let out = Self::invoke(cwd, args).await?;
        if !out.success() {
            return Err(GitError::Command {
                args: args.join(" "),
                status: out.status,
                stderr: out.stderr,
            });
        }
        Ok(out.stdout)
    }

    async fn try_run(&self, cwd: &Path, args: &[&str]) -> Result<GitOutput, GitError> {
        Self::invoke(cwd, args).await
    }
}
