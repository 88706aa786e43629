// SPDX-License-Identifier: MIT OR Apache-2.0
//! Conflict-marker parsing.
//!
//! Conflicted files are split into their local, base (diff3 style), and
//! remote sides with a line-by-line state machine over the git markers, so
//! callers can present both sides without shelling out again.

use crate::{SyncEngine, SyncError};
use serde::{Deserialize, Serialize};

/// One conflicted file, split into its sides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictFileDiff {
    /// Path relative to the worktree root.
    pub file_path: String,
    /// The local (ours) side.
    pub local_content: String,
    /// The remote (theirs) side.
    pub remote_content: String,
    /// The common ancestor, when diff3 markers are present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_content: Option<String>,
}

/// All conflicted files plus guidance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDiff {
    /// Per-file sides.
    pub files: Vec<ConflictFileDiff>,
    /// Human-readable summary.
    pub message: String,
    /// Steps to resolve.
    pub resolution_steps: Vec<String>,
}

/// Parser states while walking a conflicted file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    None,
    Local,
    Base,
    Remote,
}

/// Split one conflicted file's text into its sides.
///
/// Lines outside conflict regions are shared context and appear in both
/// local and remote content.
#[must_use]
pub fn parse_conflict_markers(file_path: &str, text: &str) -> ConflictFileDiff {
    let mut state = Side::None;
    let mut local = String::new();
    let mut remote = String::new();
    let mut base = String::new();
    let mut saw_base = false;

    for line in text.lines() {
        if line.starts_with("<<<<<<<") {
            state = Side::Local;
            continue;
        }
        if line.starts_with("|||||||") {
            state = Side::Base;
            saw_base = true;
            continue;
        }
        if line.starts_with("=======") && state != Side::None {
            state = Side::Remote;
            continue;
        }
        if line.starts_with(">>>>>>>") {
            state = Side::None;
            continue;
        }

        match state {
            Side::None => {
                local.push_str(line);
                local.push('\n');
                remote.push_str(line);
                remote.push('\n');
            }
            Side::Local => {
                local.push_str(line);
                local.push('\n');
            }
            Side::Base => {
                base.push_str(line);
                base.push('\n');
            }
            Side::Remote => {
                remote.push_str(line);
                remote.push('\n');
            }
        }
    }

    ConflictFileDiff {
        file_path: file_path.to_string(),
        local_content: local,
        remote_content: remote,
        base_content: saw_base.then_some(base),
    }
}

impl SyncEngine {
    /// Extract the sides of every conflicted file (or only `files`, when
    /// given) from the worktree.
    ///
    /// # Errors
    ///
    /// Git and I/O errors per [`SyncError`]; unreadable files are errors,
    /// an empty conflict set is not.
    pub async fn get_conflict_diff(
        &self,
        files: Option<&[String]>,
    ) -> Result<ConflictDiff, SyncError> {
        let conflicted = match files {
            Some(files) => files.to_vec(),
            None => self.conflicted_files().await?,
        };

        let worktree = self.worktree_path();
        let mut out = Vec::with_capacity(conflicted.len());
        for file in &conflicted {
            let path = worktree.join(file);
            let text = tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| SyncError::Io {
                    path: path.clone(),
                    source,
                })?;
            out.push(parse_conflict_markers(file, &text));
        }

        Ok(ConflictDiff {
            message: format!("{} file(s) in conflict", out.len()),
            resolution_steps: vec![
                "review the local and remote sides of each file".into(),
                "edit each file to the merged content, removing all markers".into(),
                "call resolve_conflict with your actor id and a reason".into(),
            ],
            files: out,
        })
    }
}
