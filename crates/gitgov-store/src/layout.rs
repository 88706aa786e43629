// SPDX-License-Identifier: MIT OR Apache-2.0
//! `.gitgov/` layout constants and the syncable-path filter.
//!
//! These rules are the single source of truth for what travels over the
//! state branch: the sync engine applies them to worktree status output and
//! the webhook handler applies them to push-event file lists, so both sides
//! always agree on the same delta.

use gitgov_record::RecordType;
use serde::{Deserialize, Serialize};

/// The reserved directory at the repository root.
pub const GITGOV_DIR: &str = ".gitgov";

/// Subdirectories of `.gitgov/` that are synchronized.
pub const SYNC_DIRECTORIES: [&str; 8] = [
    "tasks",
    "cycles",
    "actors",
    "agents",
    "executions",
    "feedbacks",
    "changelogs",
    "workflows",
];

/// Files directly under `.gitgov/` that are synchronized.
pub const SYNC_ROOT_FILES: [&str; 1] = ["config.json"];

/// File names that stay on this machine, never synced.
pub const LOCAL_ONLY: [&str; 3] = [".session.json", "index.json", "gitgov"];

/// Glob patterns for files that never sync (keys, backups, temp files).
pub const EXCLUDED_PATTERNS: [&str; 5] = ["*.key", "*.backup", "*.backup-*", "*.tmp", "*.bak"];

/// The directory a record type is stored under.
#[must_use]
pub fn dir_for(kind: RecordType) -> &'static str {
    match kind {
        RecordType::Task => "tasks",
        RecordType::Cycle => "cycles",
        RecordType::Actor => "actors",
        RecordType::Agent => "agents",
        RecordType::Execution => "executions",
        RecordType::Feedback => "feedbacks",
        RecordType::Changelog => "changelogs",
    }
}

/// Whether a file name matches the excluded patterns
/// (`*.key`, `*.backup`, `*.backup-*`, `*.tmp`, `*.bak`).
#[must_use]
pub fn is_excluded_name(name: &str) -> bool {
    name.ends_with(".key")
        || name.ends_with(".backup")
        || name.ends_with(".tmp")
        || name.ends_with(".bak")
        || name.contains(".backup-")
}

/// Whether `path` is syncable over the state branch.
///
/// A path qualifies iff its extension is `.json`, its file name is neither
/// LOCAL_ONLY nor excluded, and — once resolved relative to `.gitgov/` —
/// its first segment is a sync directory or the file is a sync root file.
///
/// The decision is invariant under equivalent spellings: absolute vs
/// relative to `.gitgov/`, forward vs back slashes.
///
/// # Examples
///
/// ```
/// use gitgov_store::should_sync_file;
///
/// assert!(should_sync_file(".gitgov/tasks/1700000000-task-x.json"));
/// assert!(should_sync_file("tasks/1700000000-task-x.json"));
/// assert!(should_sync_file(".gitgov\\config.json"));
/// assert!(!should_sync_file(".gitgov/index.json"));
/// assert!(!should_sync_file(".gitgov/actors/alice.key"));
/// ```
#[must_use]
pub fn should_sync_file(path: &str) -> bool {
    let normalized = path.replace('\\', "/");
    let normalized = normalized.trim_start_matches("./");

    let Some(name) = normalized.rsplit('/').next() else {
        return false;
    };
    if !name.ends_with(".json") || name == ".json" {
        return false;
    }
    if LOCAL_ONLY.contains(&name) || is_excluded_name(name) {
        return false;
    }

    // Resolve relative to `.gitgov/`: take everything after the last
    // `.gitgov/` segment, or the whole path when none is present.
    let relative = match normalized.rfind(".gitgov/") {
        Some(idx) => &normalized[idx + GITGOV_DIR.len() + 1..],
        None => normalized,
    };

    match relative.split_once('/') {
        Some((first, _)) => SYNC_DIRECTORIES.contains(&first),
        None => SYNC_ROOT_FILES.contains(&relative),
    }
}

// ---------------------------------------------------------------------------
// Delta
// ---------------------------------------------------------------------------

/// The change status of one file in a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeltaStatus {
    /// Added (untracked files map here).
    A,
    /// Modified.
    M,
    /// Deleted.
    D,
}

/// One syncable file change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaEntry {
    /// Path relative to the repository root (e.g. `.gitgov/tasks/x.json`).
    pub file: String,
    /// Change status.
    pub status: DeltaStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn record_dirs_are_syncable() {
        for dir in ["tasks", "cycles", "actors", "agents", "executions", "feedbacks", "changelogs", "workflows"] {
            let path = format!(".gitgov/{dir}/some-record.json");
            assert!(should_sync_file(&path), "rejected: {path}");
        }
    }

    #[test]
    fn config_json_is_the_only_syncable_root_file() {
        assert!(should_sync_file(".gitgov/config.json"));
        assert!(!should_sync_file(".gitgov/index.json"));
        assert!(!should_sync_file(".gitgov/.session.json"));
        assert!(!should_sync_file(".gitgov/random.json"));
    }

    #[test]
    fn excluded_patterns_are_rejected() {
        assert!(!should_sync_file(".gitgov/actors/alice.key"));
        assert!(!should_sync_file(".gitgov/tasks/x.json.backup"));
        assert!(!should_sync_file(".gitgov/tasks/x.backup-2024.json"));
        assert!(!should_sync_file(".gitgov/tasks/x.json.tmp"));
        assert!(!should_sync_file(".gitgov/tasks/x.bak"));
    }

    #[test]
    fn non_json_is_rejected() {
        assert!(!should_sync_file(".gitgov/tasks/readme.md"));
        assert!(!should_sync_file(".gitgov/gitgov"));
        assert!(!should_sync_file(".gitgov/tasks/.json"));
    }

    #[test]
    fn unknown_directories_are_rejected() {
        assert!(!should_sync_file(".gitgov/cache/x.json"));
        assert!(!should_sync_file("src/tasks/x.json.rs"));
    }

    #[test]
    fn spelling_invariance_examples() {
        let spellings = [
            ".gitgov/tasks/x.json",
            "./.gitgov/tasks/x.json",
            "tasks/x.json",
            ".gitgov\\tasks\\x.json",
            "/home/user/repo/.gitgov/tasks/x.json",
        ];
        for spelling in spellings {
            assert!(should_sync_file(spelling), "rejected: {spelling}");
        }
    }

    #[test]
    fn dir_mapping_covers_all_record_types() {
        use gitgov_record::RecordType;
        let dirs: Vec<&str> = RecordType::ALL.iter().map(|k| dir_for(*k)).collect();
        for dir in &dirs {
            assert!(SYNC_DIRECTORIES.contains(dir));
        }
    }

    proptest! {
        // Equivalent spellings of the same record path always agree.
        #[test]
        fn syncability_is_spelling_invariant(
            dir_idx in 0usize..8,
            slug in "[a-z0-9-]{1,20}",
            prefix in prop_oneof![
                Just(String::new()),
                Just("./".to_string()),
                Just("/repo/".to_string()),
                Just("C:\\work\\repo\\".to_string()),
            ],
            backslashes in any::<bool>(),
        ) {
            let dir = SYNC_DIRECTORIES[dir_idx];
            let bare = format!("{dir}/{slug}.json");
            let mut full = format!("{prefix}.gitgov/{bare}");
            if backslashes {
                full = full.replace('/', "\\");
            }
            prop_assert_eq!(should_sync_file(&bare), should_sync_file(&full));
            prop_assert!(should_sync_file(&full));
        }
    }
}
