// SPDX-License-Identifier: MIT OR Apache-2.0
//! Mirroring between the live record tree and the worktree, and parsing
//! of `git status --porcelain` output into syncable deltas.
//!
//! The live tree at `<repo>/.gitgov/` is where stores read and write; the
//! worktree's checkout of the state branch is what git reconciles. Push
//! mirrors live → worktree before computing its delta; pull mirrors
//! worktree → live after the rebase lands. Only syncable paths move in
//! either direction, so LOCAL_ONLY files (the index, the session, keys)
//! never cross.
//!
//! Deletions are the subtle case: a file absent from one side may be a
//! local deletion or may simply never have been synced (a fresh peer has
//! an empty live tree). The engine keeps a manifest of the syncable paths
//! present after the last successful sync; only manifest-listed files are
//! ever deleted by a mirror pass.

use crate::{SyncEngine, SyncError};
use gitgov_store::{DeltaEntry, DeltaStatus, SYNC_DIRECTORIES, SYNC_ROOT_FILES, should_sync_file};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

/// Manifest of last-synced paths, kept at the live tree root. Never
/// syncable (only `config.json` is a syncable root file).
pub const SYNC_MANIFEST: &str = ".sync-manifest.json";

impl SyncEngine {
    /// Mirror syncable files live → worktree. Returns the number of files
    /// copied or deleted.
    pub(crate) async fn mirror_to_worktree(&self) -> Result<usize, SyncError> {
        let manifest = self.read_manifest().await?;
        mirror(&self.gitgov_dir(), &self.worktree_gitgov_dir(), &manifest).await
    }

    /// Mirror syncable files worktree → live. Returns the number of files
    /// copied or deleted.
    pub(crate) async fn mirror_from_worktree(&self) -> Result<usize, SyncError> {
        let manifest = self.read_manifest().await?;
        mirror(&self.worktree_gitgov_dir(), &self.gitgov_dir(), &manifest).await
    }

    /// Record the worktree's current syncable paths as the last-synced
    /// manifest. Called after every successful push, pull, or resolve.
    pub(crate) async fn update_manifest(&self) -> Result<(), SyncError> {
        let files = list_tree(&self.worktree_gitgov_dir()).await?;
        let path = self.gitgov_dir().join(SYNC_MANIFEST);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| SyncError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let text = serde_json::to_string_pretty(&files).map_err(|err| SyncError::Index {
            detail: err.to_string(),
        })?;
        tokio::fs::write(&path, text)
            .await
            .map_err(|source| SyncError::Io { path, source })?;
        Ok(())
    }

    async fn read_manifest(&self) -> Result<BTreeSet<String>, SyncError> {
        let path = self.gitgov_dir().join(SYNC_MANIFEST);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(BTreeSet::new());
            }
            Err(err) => return Err(SyncError::Io { path, source: err }),
        };
        // A corrupt manifest only disables deletion propagation.
        Ok(serde_json::from_str::<Vec<String>>(&text)
            .map(|files| files.into_iter().collect())
            .unwrap_or_default())
    }

    /// The syncable delta currently pending in the worktree, from
    /// `git status --porcelain -uall --ignored=traditional`.
    pub(crate) async fn worktree_delta(&self) -> Result<Vec<DeltaEntry>, SyncError> {
        let output = self
            .git
            .run(
                &self.worktree_path(),
                &["status", "--porcelain", "-uall", "--ignored=traditional"],
            )
            .await?;
        Ok(parse_porcelain(&output))
    }

    /// Stage a delta: `git rm` for deletions, `git add -f` for adds and
    /// modifications (`-f` because `.gitgov/` is often in the project's
    /// `.gitignore` by design).
    pub(crate) async fn stage_delta(&self, delta: &[DeltaEntry]) -> Result<(), SyncError> {
        let worktree = self.worktree_path();
        for entry in delta {
            match entry.status {
                DeltaStatus::D => {
                    self.git
                        .run(
                            &worktree,
                            &["rm", "-f", "--ignore-unmatch", "--", &entry.file],
                        )
                        .await?;
                }
                DeltaStatus::A | DeltaStatus::M => {
                    self.git
                        .run(&worktree, &["add", "-f", "--", &entry.file])
                        .await?;
                }
            }
        }
        Ok(())
    }
}

/// Parse porcelain v1 status output into syncable delta entries.
///
/// Untracked (`??`) and ignored (`!!`) files map to `A`, deletions to `D`,
/// everything else staged or unstaged to `M`.
pub(crate) fn parse_porcelain(output: &str) -> Vec<DeltaEntry> {
    let mut delta = Vec::new();
    for line in output.lines() {
        if line.len() < 4 {
            continue;
        }
        let (code, rest) = line.split_at(2);
        let path = rest.trim_start();
        // Renames come as `old -> new`; the new path is what syncs.
        let path = match path.rsplit_once(" -> ") {
            Some((_, new)) => new,
            None => path,
        };
        let path = path.trim_matches('"');
        if !should_sync_file(path) {
            continue;
        }

        let status = match code {
            "??" | "!!" => DeltaStatus::A,
            _ if code.contains('D') => DeltaStatus::D,
            _ if code.contains('A') => DeltaStatus::A,
            _ => DeltaStatus::M,
        };
        delta.push(DeltaEntry {
            file: path.to_string(),
            status,
        });
    }
    delta
}

/// One-way mirror of syncable files from `src` to `dst`.
///
/// Copies files that are missing or differ; deletes a `dst` file only when
/// it is missing from `src` *and* listed in the last-synced manifest (so a
/// never-synced empty side cannot wipe the other).
async fn mirror(
    src: &Path,
    dst: &Path,
    deletable: &BTreeSet<String>,
) -> Result<usize, SyncError> {
    let mut changed = 0usize;

    let src_files = list_tree(src).await?;
    let dst_files = list_tree(dst).await?;

    for rel in &src_files {
        let from = src.join(rel);
        let to = dst.join(rel);
        if !files_equal(&from, &to).await? {
            copy_file(&from, &to).await?;
            changed += 1;
        }
    }

    for rel in &dst_files {
        if !src_files.contains(rel) && deletable.contains(rel) {
            let stale = dst.join(rel);
            tokio::fs::remove_file(&stale)
                .await
                .map_err(|source| SyncError::Io {
                    path: stale,
                    source,
                })?;
            changed += 1;
        }
    }

    if changed > 0 {
        debug!(from = %src.display(), to = %dst.display(), changed, "mirrored state");
    }
    Ok(changed)
}

/// All syncable paths under a `.gitgov/` tree, relative to it (e.g.
/// `tasks/<id>.json`, `config.json`), sorted.
async fn list_tree(gitgov: &Path) -> Result<BTreeSet<String>, SyncError> {
    let mut out = BTreeSet::new();

    for dir in SYNC_DIRECTORIES {
        let dir_path = gitgov.join(dir);
        let mut entries = match tokio::fs::read_dir(&dir_path).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(SyncError::Io {
                    path: dir_path,
                    source: err,
                });
            }
        };
        while let Some(entry) = entries.next_entry().await.map_err(|source| SyncError::Io {
            path: dir_path.clone(),
            source,
        })? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let rel = format!("{dir}/{name}");
            if should_sync_file(&rel) {
                out.insert(rel);
            }
        }
    }

    for name in SYNC_ROOT_FILES {
        if gitgov.join(name).exists() {
            out.insert(name.to_string());
        }
    }

    Ok(out)
}

async fn files_equal(a: &Path, b: &Path) -> Result<bool, SyncError> {
    let read = |path: &Path| {
        let path = path.to_path_buf();
        async move {
            match tokio::fs::read(&path).await {
                Ok(bytes) => Ok(Some(bytes)),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(err) => Err(SyncError::Io { path, source: err }),
            }
        }
    };
    Ok(read(a).await? == read(b).await?)
}

async fn copy_file(from: &Path, to: &Path) -> Result<(), SyncError> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| SyncError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    tokio::fs::copy(from, to)
        .await
        .map_err(|source| SyncError::Io {
            path: to.to_path_buf(),
            source,
        })?;
    Ok(())
}
