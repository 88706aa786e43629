// SPDX-License-Identifier: MIT OR Apache-2.0
//! Record lint over a `.gitgov/` tree.
//!
//! Walks the record directories, parses every `.json` file as a wrapper,
//! and checks schema, checksum, and (optionally) signatures. Signature
//! verification resolves keys from the tree's own `actors/` directory, so
//! a tree is self-describing: it lints clean iff every record verifies
//! against the actors it ships.

use crate::{StoreError, layout};
use gitgov_record::{ActorKeyring, ActorRecord, RecordType, RecordWrapper, VerifyError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// What a lint run should verify.
#[derive(Debug, Clone, Copy)]
pub struct LintOptions {
    /// Recompute and compare payload checksums.
    pub verify_checksums: bool,
    /// Verify every signature against the tree's actors.
    pub verify_signatures: bool,
}

impl Default for LintOptions {
    fn default() -> Self {
        Self {
            verify_checksums: true,
            verify_signatures: true,
        }
    }
}

/// Category of a lint finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LintCode {
    /// The file is not parseable as a record wrapper.
    Parse,
    /// Schema or cross-field validation failed.
    Schema,
    /// The stored checksum disagrees with the payload.
    Checksum,
    /// A signature does not verify or its signer is unknown.
    Signature,
    /// The record sits in the wrong directory for its type.
    Placement,
}

/// One lint finding. All findings are errors; a clean tree has none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LintFinding {
    /// File the finding is about.
    pub path: PathBuf,
    /// Finding category.
    pub code: LintCode,
    /// Human-readable detail.
    pub message: String,
}

/// Outcome of a lint run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LintReport {
    /// Every finding, in walk order.
    pub findings: Vec<LintFinding>,
    /// Number of record files examined.
    pub checked: usize,
}

impl LintReport {
    /// Number of errors (currently every finding is an error).
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.findings.len()
    }

    /// Whether the tree linted clean.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Lint every record under `gitgov_dir`.
///
/// Missing record directories are fine (a fresh project has none); only
/// I/O failures on files that do exist are errors.
///
/// # Errors
///
/// Returns [`StoreError::Io`] when the tree itself cannot be read.
pub async fn lint_tree(gitgov_dir: &Path, options: &LintOptions) -> Result<LintReport, StoreError> {
    let mut report = LintReport::default();

    let keyring = if options.verify_signatures {
        Some(load_keyring(gitgov_dir, &mut report).await?)
    } else {
        None
    };

    for kind in RecordType::ALL {
        let dir = gitgov_dir.join(layout::dir_for(kind));
        for (path, text) in read_json_files(&dir).await? {
            report.checked += 1;
            lint_file(&path, &text, kind, keyring.as_ref(), options, &mut report);
        }
    }

    debug!(
        checked = report.checked,
        errors = report.error_count(),
        "lint finished"
    );
    Ok(report)
}

fn lint_file(
    path: &Path,
    text: &str,
    expected_kind: RecordType,
    keyring: Option<&ActorKeyring>,
    options: &LintOptions,
    report: &mut LintReport,
) {
    let wrapper = match RecordWrapper::from_json(text) {
        Ok(wrapper) => wrapper,
        Err(err) => {
            report.findings.push(LintFinding {
                path: path.to_path_buf(),
                code: LintCode::Parse,
                message: err.to_string(),
            });
            return;
        }
    };

    if wrapper.header.kind != expected_kind {
        report.findings.push(LintFinding {
            path: path.to_path_buf(),
            code: LintCode::Placement,
            message: format!(
                "{} record stored under {}/",
                wrapper.header.kind,
                layout::dir_for(expected_kind)
            ),
        });
    }

    if let Err(err) = gitgov_record::validate_wrapper(&wrapper) {
        report.findings.push(LintFinding {
            path: path.to_path_buf(),
            code: LintCode::Schema,
            message: err.to_string(),
        });
    }

    if options.verify_checksums || options.verify_signatures {
        let resolver: &dyn gitgov_record::KeyResolver = match keyring {
            Some(keyring) => keyring,
            // Checksum-only runs still go through verify; an empty keyring
            // would misreport signers as unknown, so stop at the checksum.
            None => {
                match gitgov_record::checksum(&wrapper.payload) {
                    Ok(computed) if computed != wrapper.header.payload_checksum => {
                        report.findings.push(LintFinding {
                            path: path.to_path_buf(),
                            code: LintCode::Checksum,
                            message: format!(
                                "header has {}, computed {computed}",
                                wrapper.header.payload_checksum
                            ),
                        });
                    }
                    _ => {}
                }
                return;
            }
        };

        match gitgov_record::verify(&wrapper, resolver) {
            Ok(()) => {}
            Err(VerifyError::ChecksumMismatch { stored, computed }) => {
                report.findings.push(LintFinding {
                    path: path.to_path_buf(),
                    code: LintCode::Checksum,
                    message: format!("header has {stored}, computed {computed}"),
                });
            }
            Err(err) => {
                report.findings.push(LintFinding {
                    path: path.to_path_buf(),
                    code: LintCode::Signature,
                    message: err.to_string(),
                });
            }
        }
    }
}

/// Read the actors directory and build a keyring, recording findings for
/// actors that fail to parse.
async fn load_keyring(
    gitgov_dir: &Path,
    report: &mut LintReport,
) -> Result<ActorKeyring, StoreError> {
    let mut keyring = ActorKeyring::new();
    let dir = gitgov_dir.join(layout::dir_for(RecordType::Actor));
    for (path, text) in read_json_files(&dir).await? {
        let Ok(wrapper) = RecordWrapper::from_json(&text) else {
            // The actor pass below reports the parse failure.
            continue;
        };
        let Ok(actor) = wrapper.decode_payload::<ActorRecord>() else {
            continue;
        };
        if keyring.add(&actor).is_err() {
            report.findings.push(LintFinding {
                path,
                code: LintCode::Signature,
                message: format!("malformed public key for {}", actor.id),
            });
        }
    }
    Ok(keyring)
}

/// All `.json` files directly under `dir`, sorted by name.
async fn read_json_files(dir: &Path) -> Result<Vec<(PathBuf, String)>, StoreError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(StoreError::Io {
                path: dir.to_path_buf(),
                source: err,
            });
        }
    };

    let mut out = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|source| StoreError::Io {
        path: dir.to_path_buf(),
        source,
    })? {
        let path = entry.path();
        let is_json = path.extension().is_some_and(|ext| ext == "json");
        if !is_json {
            continue;
        }
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
        out.push((path, text));
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ed25519_dalek::SigningKey;
    use gitgov_record::{ActorType, Signer, TaskRecord, seal};
    use rand::rngs::OsRng;
    use tempfile::TempDir;

    fn signer(key_id: &str) -> Signer {
        Signer::new(key_id, SigningKey::generate(&mut OsRng))
    }

    async fn write_actor(gitgov: &Path, signer: &Signer) {
        let actor = ActorRecord {
            id: signer.key_id().to_string(),
            actor_type: ActorType::Human,
            display_name: "Alice".into(),
            public_key: signer.public_key_base64(),
            roles: vec!["author".into()],
            superseded_by: None,
        };
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let wrapper = seal(&actor, signer, now).unwrap();
        let dir = gitgov.join("actors");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(
            dir.join("human__alice.json"),
            wrapper.to_json().unwrap(),
        )
        .await
        .unwrap();
    }

    async fn write_task(gitgov: &Path, signer: &Signer) -> RecordWrapper {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let task = TaskRecord::new("Demo", "a demo task", now);
        let wrapper = seal(&task, signer, now).unwrap();
        let dir = gitgov.join("tasks");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(
            dir.join(format!("{}.json", task.id)),
            wrapper.to_json().unwrap(),
        )
        .await
        .unwrap();
        wrapper
    }

    #[tokio::test]
    async fn clean_tree_lints_clean() {
        let dir = TempDir::new().unwrap();
        let alice = signer("human:alice");
        write_actor(dir.path(), &alice).await;
        write_task(dir.path(), &alice).await;

        let report = lint_tree(dir.path(), &LintOptions::default()).await.unwrap();
        assert!(report.is_clean(), "findings: {:?}", report.findings);
        assert_eq!(report.checked, 2);
    }

    #[tokio::test]
    async fn empty_tree_lints_clean() {
        let dir = TempDir::new().unwrap();
        let report = lint_tree(dir.path(), &LintOptions::default()).await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.checked, 0);
    }

    #[tokio::test]
    async fn tampered_payload_is_a_checksum_finding() {
        let dir = TempDir::new().unwrap();
        let alice = signer("human:alice");
        write_actor(dir.path(), &alice).await;
        let wrapper = write_task(dir.path(), &alice).await;

        let mut tampered = wrapper.clone();
        tampered.payload["title"] = serde_json::json!("Tampered");
        let id = tampered.record_id().unwrap().to_string();
        tokio::fs::write(
            dir.path().join("tasks").join(format!("{id}.json")),
            tampered.to_json().unwrap(),
        )
        .await
        .unwrap();

        let report = lint_tree(dir.path(), &LintOptions::default()).await.unwrap();
        assert!(
            report
                .findings
                .iter()
                .any(|f| f.code == LintCode::Checksum)
        );
    }

    #[tokio::test]
    async fn unknown_signer_is_a_signature_finding() {
        let dir = TempDir::new().unwrap();
        // Task signed by an actor the tree does not ship.
        write_task(dir.path(), &signer("human:ghost")).await;

        let report = lint_tree(dir.path(), &LintOptions::default()).await.unwrap();
        assert!(
            report
                .findings
                .iter()
                .any(|f| f.code == LintCode::Signature)
        );
    }

    #[tokio::test]
    async fn garbage_file_is_a_parse_finding() {
        let dir = TempDir::new().unwrap();
        let tasks = dir.path().join("tasks");
        tokio::fs::create_dir_all(&tasks).await.unwrap();
        tokio::fs::write(tasks.join("broken.json"), "{").await.unwrap();

        let report = lint_tree(dir.path(), &LintOptions::default()).await.unwrap();
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.findings[0].code, LintCode::Parse);
    }

    #[tokio::test]
    async fn signature_checks_can_be_disabled() {
        let dir = TempDir::new().unwrap();
        write_task(dir.path(), &signer("human:ghost")).await;

        let options = LintOptions {
            verify_checksums: true,
            verify_signatures: false,
        };
        let report = lint_tree(dir.path(), &options).await.unwrap();
        assert!(report.is_clean(), "findings: {:?}", report.findings);
    }

    #[tokio::test]
    async fn misplaced_record_is_a_placement_finding() {
        let dir = TempDir::new().unwrap();
        let alice = signer("human:alice");
        write_actor(dir.path(), &alice).await;
        let wrapper = write_task(dir.path(), &alice).await;

        // Copy the task wrapper into cycles/.
        let cycles = dir.path().join("cycles");
        tokio::fs::create_dir_all(&cycles).await.unwrap();
        tokio::fs::write(cycles.join("misplaced.json"), wrapper.to_json().unwrap())
            .await
            .unwrap();

        let report = lint_tree(dir.path(), &LintOptions::default()).await.unwrap();
        assert!(
            report
                .findings
                .iter()
                .any(|f| f.code == LintCode::Placement)
        );
    }
}
