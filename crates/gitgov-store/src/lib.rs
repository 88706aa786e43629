// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! gitgov-store
//!
//! Typed key→record CRUD over pluggable backends, the `.gitgov/` on-disk
//! layout, the syncable-path rules shared by the sync engine and the
//! webhook handler, and record lint over a tree.

/// Filesystem backend.
pub mod fs;
/// `.gitgov/` layout constants and the syncable-path filter.
pub mod layout;
/// Record lint over a `.gitgov/` tree.
pub mod lint;

pub use fs::{ColonCodec, FsRecordStore, IdCodec};
pub use layout::{
    DeltaEntry, DeltaStatus, EXCLUDED_PATTERNS, GITGOV_DIR, LOCAL_ONLY, SYNC_DIRECTORIES,
    SYNC_ROOT_FILES, dir_for, is_excluded_name, should_sync_file,
};
pub use lint::{LintCode, LintFinding, LintOptions, LintReport, lint_tree};

use async_trait::async_trait;
use gitgov_record::{RecordError, RecordWrapper};
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by record stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The record does not exist.
    #[error("record not found: {id}")]
    NotFound {
        /// The missing record's ID.
        id: String,
    },

    /// A concurrent writer updated the record first (remote backends).
    #[error("concurrent update on {id}: {detail}")]
    ConcurrentUpdate {
        /// The contended record's ID.
        id: String,
        /// Backend-specific detail (e.g. the HTTP response body).
        detail: String,
    },

    /// A filesystem operation failed.
    #[error("io error on {path}: {source}")]
    Io {
        /// Path of the offending file.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The stored bytes are not a valid record wrapper.
    #[error(transparent)]
    Record(#[from] RecordError),

    /// A backend transport failure with context.
    #[error("backend error: {detail}")]
    Backend {
        /// Transport error detail.
        detail: String,
    },
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Result of a successful write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReceipt {
    /// The commit SHA produced by the write, for backends that commit.
    pub commit_sha: Option<String>,
}

/// Typed key→record CRUD over a backend.
///
/// The invariant every backend upholds: a `get(id)` following a successful
/// `put(id, w)` on the same instance returns a wrapper byte-equivalent to
/// `w` modulo wrapper whitespace.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Write (or atomically replace) a record.
    async fn put(&self, id: &str, wrapper: &RecordWrapper) -> Result<WriteReceipt, StoreError>;

    /// Read a record, or `None` when it does not exist.
    async fn get(&self, id: &str) -> Result<Option<RecordWrapper>, StoreError>;

    /// All record IDs in this store.
    async fn list(&self) -> Result<Vec<String>, StoreError>;

    /// Delete a record.
    ///
    /// Deleting a missing record is [`StoreError::NotFound`].
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Whether a record exists.
    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.get(id).await?.is_some())
    }
}
