// SPDX-License-Identifier: MIT OR Apache-2.0
//! Filesystem record store.
//!
//! Each record lives at `<base>/<encoded-id>.json`. Writes go to a
//! temporary file in the same directory followed by a rename, so readers
//! never observe a torn record. ID encoding is pluggable: actor IDs contain
//! `:`, which is not filename-safe everywhere, so the default codec maps it
//! to `__` and back.

use crate::{RecordStore, StoreError, WriteReceipt};
use async_trait::async_trait;
use gitgov_record::RecordWrapper;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// An invertible record-ID ↔ file-stem encoding.
pub trait IdCodec: Send + Sync {
    /// Encode a record ID into a filename stem.
    fn encode(&self, id: &str) -> String;
    /// Decode a filename stem back into a record ID, or `None` when the
    /// stem is not one this codec produced.
    fn decode(&self, stem: &str) -> Option<String>;
}

/// The default codec: `:` ↔ `__`.
///
/// Record slugs and actor names are `[a-z0-9-]`, so `__` never appears in
/// a real ID and the mapping is invertible.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColonCodec;

impl IdCodec for ColonCodec {
    fn encode(&self, id: &str) -> String {
        id.replace(':', "__")
    }

    fn decode(&self, stem: &str) -> Option<String> {
        if stem.is_empty() {
            return None;
        }
        Some(stem.replace("__", ":"))
    }
}

/// A record store over a single directory.
pub struct FsRecordStore {
    base: PathBuf,
    codec: Arc<dyn IdCodec>,
}

impl FsRecordStore {
    /// Store rooted at `base` with the default ID codec.
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self::with_codec(base, Arc::new(ColonCodec))
    }

    /// Store rooted at `base` with a custom ID codec.
    #[must_use]
    pub fn with_codec(base: impl Into<PathBuf>, codec: Arc<dyn IdCodec>) -> Self {
        Self {
            base: base.into(),
            codec,
        }
    }

    /// The directory this store reads and writes.
    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.base.join(format!("{}.json", self.codec.encode(id)))
    }

    fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
        move |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[async_trait]
impl RecordStore for FsRecordStore {
    async fn put(&self, id: &str, wrapper: &RecordWrapper) -> Result<WriteReceipt, StoreError> {
        tokio::fs::create_dir_all(&self.base)
            .await
            .map_err(Self::io_err(&self.base))?;

        let target = self.path_for(id);
        let tmp = target.with_extension("json.tmp");
        let text = wrapper.to_json()?;

        tokio::fs::write(&tmp, text.as_bytes())
            .await
            .map_err(Self::io_err(&tmp))?;
        tokio::fs::rename(&tmp, &target)
            .await
            .map_err(Self::io_err(&target))?;

        debug!(id, path = %target.display(), "record written");
        Ok(WriteReceipt::default())
    }

    async fn get(&self, id: &str) -> Result<Option<RecordWrapper>, StoreError> {
        let path = self.path_for(id);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::Io { path, source: err }),
        };
        Ok(Some(RecordWrapper::from_json(&text)?))
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.base).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(StoreError::Io {
                    path: self.base.clone(),
                    source: err,
                });
            }
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(Self::io_err(&self.base))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            if let Some(id) = self.codec.decode(stem) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let path = self.path_for(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                id: id.to_string(),
            }),
            Err(err) => Err(StoreError::Io { path, source: err }),
        }
    }

    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        match tokio::fs::metadata(self.path_for(id)).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StoreError::Io {
                path: self.path_for(id),
                source: err,
            }),
        }
    }
}
