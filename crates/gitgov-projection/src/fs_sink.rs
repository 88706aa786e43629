// SPDX-License-Identifier: MIT OR Apache-2.0
//! The on-disk JSON sink: `.gitgov/index.json`.
//!
//! `index.json` is LOCAL_ONLY — it never travels over the state branch;
//! every peer recomputes its own. Writes are temp-file-plus-rename so a
//! concurrent reader never sees a torn snapshot.

use crate::{IndexData, IndexSink, ProjectionError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the snapshot inside `.gitgov/`.
pub const INDEX_FILE: &str = "index.json";

/// Sink writing the snapshot to `.gitgov/index.json`.
#[derive(Debug, Clone)]
pub struct FsIndexSink {
    path: PathBuf,
}

impl FsIndexSink {
    /// Sink for the `index.json` inside `gitgov_dir`.
    #[must_use]
    pub fn new(gitgov_dir: &Path) -> Self {
        Self {
            path: gitgov_dir.join(INDEX_FILE),
        }
    }

    /// The file this sink writes.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl IndexSink for FsIndexSink {
    async fn persist(&self, index: &IndexData) -> Result<(), ProjectionError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ProjectionError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let text = serde_json::to_string_pretty(index)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, text.as_bytes())
            .await
            .map_err(|source| ProjectionError::Io {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| ProjectionError::Io {
                path: self.path.clone(),
                source,
            })?;

        debug!(path = %self.path.display(), tasks = index.tasks.len(), "index persisted");
        Ok(())
    }

    async fn read(&self) -> Result<Option<IndexData>, ProjectionError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(ProjectionError::Io {
                    path: self.path.clone(),
                    source: err,
                });
            }
        };
        Ok(Some(serde_json::from_str(&text)?))
    }
}
