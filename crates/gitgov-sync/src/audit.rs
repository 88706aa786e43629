// SPDX-License-Identifier: MIT OR Apache-2.0
//! Integrity audit over the state branch history.
//!
//! The invariant being audited: every rebase that touched the branch is
//! followed — immediately, in the next newer commit — by a resolution
//! commit. A rebase with no resolution marker means records were merged
//! without anyone signing off, and that is exactly what the audit exists
//! to surface.

use crate::{SyncEngine, SyncError};
use gitgov_store::lint::{LintOptions, LintReport};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Canonical paths expected on a healthy state branch.
pub const EXPECTED_FILES: [&str; 4] = ["tasks", "cycles", "actors", "config.json"];

/// What an audit run should verify.
#[derive(Debug, Clone)]
pub struct AuditOptions {
    /// Free-form scope label echoed into the report (e.g. `full`,
    /// `recent`).
    pub scope: Option<String>,
    /// Run lint with checksum verification.
    pub verify_checksums: bool,
    /// Run lint with signature verification.
    pub verify_signatures: bool,
    /// Check that the expected files exist on the branch.
    pub verify_expected_files: bool,
    /// Override the canonical expected-file set.
    pub expected_files: Option<Vec<String>>,
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self {
            scope: None,
            verify_checksums: true,
            verify_signatures: true,
            verify_expected_files: true,
            expected_files: None,
        }
    }
}

/// A rebase commit with no following resolution commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityViolation {
    /// SHA of the offending rebase commit.
    pub rebase_commit_hash: String,
    /// Its commit message.
    pub commit_message: String,
    /// Its commit timestamp (unix seconds).
    pub timestamp: i64,
    /// Its author.
    pub author: String,
}

/// Outcome of an audit run. Violations are reported, never thrown.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    /// No violations and (when lint ran) no lint errors.
    pub passed: bool,
    /// The scope label the caller supplied.
    pub scope: String,
    /// Commits examined on the state branch.
    pub total_commits: usize,
    /// Commits whose message mentions a rebase.
    pub rebase_commits: usize,
    /// Commits whose message mentions a resolution.
    pub resolution_commits: usize,
    /// Unresolved rebases.
    pub integrity_violations: Vec<IntegrityViolation>,
    /// Lint findings, when lint ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lint_report: Option<LintReport>,
    /// One-line human summary.
    pub summary: String,
    /// Expected files that were missing, when that check ran.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_files: Vec<String>,
}

struct LogEntry {
    hash: String,
    subject: String,
    timestamp: i64,
    author: String,
}

impl SyncEngine {
    /// Audit the state branch: walk its history for unresolved rebases,
    /// optionally lint its records and check the expected layout.
    ///
    /// # Errors
    ///
    /// Worktree, git, and lint errors per [`SyncError`]. Violations are
    /// data in the report, not errors.
    pub async fn audit_state(&self, options: &AuditOptions) -> Result<AuditReport, SyncError> {
        self.ensure_worktree().await?;
        let worktree = self.worktree_path();

        // %x1f keeps subjects with any punctuation parseable.
        let log = self
            .git
            .run(
                &worktree,
                &["log", "--format=%H%x1f%s%x1f%ct%x1f%an", &self.state_branch],
            )
            .await?;
        let entries: Vec<LogEntry> = log.lines().filter_map(parse_log_line).collect();

        let rebase_commits = entries.iter().filter(|e| mentions_rebase(e)).count();
        let resolution_commits = entries.iter().filter(|e| mentions_resolve(e)).count();

        // Entries are newest-first; the "next newer" commit of entries[i]
        // is entries[i - 1].
        let mut integrity_violations = Vec::new();
        for (i, entry) in entries.iter().enumerate() {
            if !mentions_rebase(entry) {
                continue;
            }
            let resolved_next = i > 0 && mentions_resolve(&entries[i - 1]);
            if !resolved_next {
                integrity_violations.push(IntegrityViolation {
                    rebase_commit_hash: entry.hash.clone(),
                    commit_message: entry.subject.clone(),
                    timestamp: entry.timestamp,
                    author: entry.author.clone(),
                });
            }
        }

        let lint_report = if options.verify_checksums || options.verify_signatures {
            let lint_options = LintOptions {
                verify_checksums: options.verify_checksums,
                verify_signatures: options.verify_signatures,
            };
            Some(gitgov_store::lint_tree(&self.worktree_gitgov_dir(), &lint_options).await?)
        } else {
            None
        };

        let mut missing_files = Vec::new();
        if options.verify_expected_files {
            let expected: Vec<String> = options.expected_files.clone().unwrap_or_else(|| {
                EXPECTED_FILES.iter().map(|s| s.to_string()).collect()
            });
            let base = self.worktree_gitgov_dir();
            for file in expected {
                if !base.join(&file).exists() {
                    missing_files.push(file);
                }
            }
        }

        let lint_errors = lint_report
            .as_ref()
            .map(LintReport::error_count)
            .unwrap_or(0);
        let passed =
            integrity_violations.is_empty() && lint_errors == 0 && missing_files.is_empty();

        let summary = format!(
            "{} commit(s), {} rebase(s), {} resolution(s), {} violation(s), {} lint error(s)",
            entries.len(),
            rebase_commits,
            resolution_commits,
            integrity_violations.len(),
            lint_errors,
        );
        info!(passed, %summary, "state audit finished");

        Ok(AuditReport {
            passed,
            scope: options.scope.clone().unwrap_or_else(|| "full".into()),
            total_commits: entries.len(),
            rebase_commits,
            resolution_commits,
            integrity_violations,
            lint_report,
            summary,
            missing_files,
        })
    }
}

fn parse_log_line(line: &str) -> Option<LogEntry> {
    let mut parts = line.split('\u{1f}');
    let hash = parts.next()?.to_string();
    let subject = parts.next()?.to_string();
    let timestamp = parts.next()?.parse().ok()?;
    let author = parts.next()?.to_string();
    Some(LogEntry {
        hash,
        subject,
        timestamp,
        author,
    })
}

fn mentions_rebase(entry: &LogEntry) -> bool {
    let subject = entry.subject.to_lowercase();
    subject.contains("rebase") && !subject.contains("resolve")
}

fn mentions_resolve(entry: &LogEntry) -> bool {
    entry.subject.to_lowercase().contains("resolve")
}
