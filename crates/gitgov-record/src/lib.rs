// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! gitgov-record
//!
//! The signed record wrapper that every piece of GitGov state is persisted
//! as: a `header` carrying type, payload checksum, and signatures, plus the
//! `payload` itself. This crate owns canonical JSON serialization, SHA-256
//! checksums, Ed25519 signing and verification, the record ID grammar, and
//! JSON-Schema validation over embedded per-type schema assets.
//!
//! Everything here is pure: no I/O, no clocks. Callers supply timestamps.

/// Byte-deterministic canonical JSON.
pub mod canonical;
/// Checksums, signing, and signature verification.
pub mod codec;
/// Validate-before-return record construction.
pub mod factory;
/// Record and actor ID grammar.
pub mod id;
/// Typed payload entities.
pub mod payload;
/// JSON-Schema validation over embedded assets.
pub mod schema;

pub use canonical::canonicalize;
pub use codec::{ActorKeyring, KeyResolver, Signer, VerifyError, checksum, sign, verify};
pub use factory::{reseal, seal};
pub use id::{
    RecordIdParts, generate_record_id, id_timestamp, is_valid_actor_id, is_valid_record_id,
    parse_record_id, slugify,
};
pub use payload::{
    ActorRecord, ActorType, AgentEngine, AgentRecord, ChangeType, ChangelogRecord,
    ChangelogReferences, CycleRecord, CycleStatus, EntityPayload, EntityType, ExecutionRecord,
    ExecutionType, FeedbackKind, FeedbackRecord, FeedbackStatus, Priority, RiskLevel, TaskRecord,
    TaskStatus, TriggerKind,
};
pub use schema::{FieldViolation, validate, validate_wrapper};

use serde::{Deserialize, Serialize};

/// Wrapper format version written into every header.
pub const WRAPPER_VERSION: &str = "1.0";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced while encoding, decoding, or validating records.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The input is a flat payload with no `header`. Legacy header-less
    /// records are rejected, never migrated.
    #[error("record has no header; header-less payloads are not accepted")]
    MissingHeader,

    /// Schema or cross-field validation failed.
    #[error("validation failed with {} violation(s)", .0.len())]
    Schema(Vec<FieldViolation>),

    /// The record ID does not agree with the header type.
    #[error("record id {id} does not match record type {kind}")]
    IdMismatch {
        /// The offending record ID.
        id: String,
        /// The type declared in the header.
        kind: RecordType,
    },

    /// A public key could not be decoded.
    #[error("malformed public key for {key_id}")]
    MalformedKey {
        /// The key identifier whose key failed to decode.
        key_id: String,
    },
}

// ---------------------------------------------------------------------------
// Record type tag
// ---------------------------------------------------------------------------

/// Discriminator for the seven record kinds GitGov persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    /// A participant identity with a public key.
    Actor,
    /// An automated agent definition.
    Agent,
    /// A unit of work.
    Task,
    /// A report attached to a task.
    Execution,
    /// A question, suggestion, or blocker on another entity.
    Feedback,
    /// A grouping of tasks and child cycles.
    Cycle,
    /// An audit entry describing a change.
    Changelog,
}

impl RecordType {
    /// All record types, in the order they are projected.
    pub const ALL: [RecordType; 7] = [
        RecordType::Actor,
        RecordType::Agent,
        RecordType::Task,
        RecordType::Execution,
        RecordType::Feedback,
        RecordType::Cycle,
        RecordType::Changelog,
    ];

    /// Lowercase wire name of this type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Actor => "actor",
            RecordType::Agent => "agent",
            RecordType::Task => "task",
            RecordType::Execution => "execution",
            RecordType::Feedback => "feedback",
            RecordType::Cycle => "cycle",
            RecordType::Changelog => "changelog",
        }
    }

    /// The token this type uses inside record IDs, or `None` for actors
    /// (actor IDs follow their own `kind:name` grammar).
    #[must_use]
    pub fn id_token(&self) -> Option<&'static str> {
        match self {
            RecordType::Actor => None,
            RecordType::Agent => Some("agent"),
            RecordType::Task => Some("task"),
            RecordType::Execution => Some("exec"),
            RecordType::Feedback => Some("feedback"),
            RecordType::Cycle => Some("cycle"),
            RecordType::Changelog => Some("changelog"),
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Signatures and header
// ---------------------------------------------------------------------------

/// The role a signer played when attaching a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureRole {
    /// The original author of the record.
    Author,
    /// A reviewer approving the record.
    Approver,
    /// The actor who resolved a sync conflict involving this record.
    Resolver,
    /// The actor who submitted the record on someone's behalf.
    Submitter,
}

impl SignatureRole {
    /// Lowercase wire name of this role.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureRole::Author => "author",
            SignatureRole::Approver => "approver",
            SignatureRole::Resolver => "resolver",
            SignatureRole::Submitter => "submitter",
        }
    }
}

impl std::fmt::Display for SignatureRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One signature over a record's payload checksum and signer metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    /// Actor ID whose key produced this signature (e.g. `human:alice`).
    pub key_id: String,
    /// Role the signer played.
    pub role: SignatureRole,
    /// Free-form note attached at signing time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Base64 Ed25519 signature bytes.
    pub signature: String,
    /// Unix seconds at which the signature was produced.
    pub timestamp: i64,
}

/// Embedded metadata preceding every payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    /// Wrapper format version, currently `"1.0"`.
    pub version: String,
    /// Payload type tag.
    #[serde(rename = "type")]
    pub kind: RecordType,
    /// Hex SHA-256 of the canonicalized payload.
    pub payload_checksum: String,
    /// Ordered, non-empty list of signatures.
    pub signatures: Vec<Signature>,
}

// ---------------------------------------------------------------------------
// Wrapper
// ---------------------------------------------------------------------------

/// A persisted record: `header` plus the raw JSON `payload`.
///
/// The payload is kept as [`serde_json::Value`] so that checksums and
/// signatures always cover the bytes that were actually stored; typed views
/// are obtained with [`RecordWrapper::decode_payload`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordWrapper {
    /// Embedded metadata.
    pub header: Header,
    /// The record payload as stored.
    pub payload: serde_json::Value,
}

impl RecordWrapper {
    /// Parse a wrapper from its JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::MissingHeader`] for flat, header-less payloads
    /// and [`RecordError::Json`] for any other malformed input.
    pub fn from_json(text: &str) -> Result<Self, RecordError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        if value.get("header").is_none() {
            return Err(RecordError::MissingHeader);
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Serialize this wrapper to pretty JSON for on-disk storage.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<String, RecordError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Decode the payload into a typed entity.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Json`] when the payload does not match `T`.
    pub fn decode_payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, RecordError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// The record's ID as carried in the payload, if present.
    #[must_use]
    pub fn record_id(&self) -> Option<&str> {
        self.payload.get("id").and_then(|v| v.as_str())
    }

    /// Unix-second timestamp of the newest signature, if any.
    #[must_use]
    pub fn latest_signature_timestamp(&self) -> Option<i64> {
        self.header.signatures.iter().map(|s| s.timestamp).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_type_wire_names_round_trip() {
        for kind in RecordType::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
            let back: RecordType = serde_json::from_str(&json).unwrap();
            assert_eq!(back, kind);
        }
    }

    #[test]
    fn headerless_input_is_rejected() {
        let flat = r#"{"id":"1700000000-task-x","title":"T"}"#;
        let err = RecordWrapper::from_json(flat).unwrap_err();
        assert!(matches!(err, RecordError::MissingHeader));
    }

    #[test]
    fn wrapper_round_trips_through_json() {
        let wrapper = RecordWrapper {
            header: Header {
                version: WRAPPER_VERSION.into(),
                kind: RecordType::Task,
                payload_checksum: "ab".repeat(32),
                signatures: vec![Signature {
                    key_id: "human:alice".into(),
                    role: SignatureRole::Author,
                    notes: None,
                    signature: "c2ln".into(),
                    timestamp: 1_700_000_000,
                }],
            },
            payload: serde_json::json!({"id": "1700000000-task-x"}),
        };
        let text = wrapper.to_json().unwrap();
        let back = RecordWrapper::from_json(&text).unwrap();
        assert_eq!(back, wrapper);
        assert_eq!(back.record_id(), Some("1700000000-task-x"));
        assert_eq!(back.latest_signature_timestamp(), Some(1_700_000_000));
    }

    #[test]
    fn header_serializes_camel_case() {
        let header = Header {
            version: "1.0".into(),
            kind: RecordType::Feedback,
            payload_checksum: "00".into(),
            signatures: vec![],
        };
        let value = serde_json::to_value(&header).unwrap();
        assert!(value.get("payloadChecksum").is_some());
        assert_eq!(value.get("type").unwrap(), "feedback");
    }
}
