// SPDX-License-Identifier: MIT OR Apache-2.0
//! Checksums, signing, and signature verification.
//!
//! A signature covers the UTF-8 bytes of
//! `"{payload_checksum}:{key_id}:{role}:{timestamp}"` — the checksum binds
//! the payload, the rest binds the signer metadata. Timestamps are decimal
//! Unix seconds.

use crate::{
    ActorRecord, RecordError, RecordWrapper, Signature, SignatureRole, canonical::canonicalize,
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures surfaced while verifying a record wrapper.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// The stored checksum disagrees with the recomputed one.
    #[error("payload checksum mismatch: header has {stored}, computed {computed}")]
    ChecksumMismatch {
        /// Checksum carried in the header.
        stored: String,
        /// Checksum recomputed from the payload.
        computed: String,
    },

    /// A signature does not verify (or is not decodable).
    #[error("signature by {key_id} does not verify")]
    SignatureInvalid {
        /// The signer whose signature failed.
        key_id: String,
    },

    /// No public key is known for a signer.
    #[error("no public key known for signer {key_id}")]
    UnknownSigner {
        /// The unresolvable signer.
        key_id: String,
    },

    /// The record carries no signatures at all.
    #[error("record has no signatures")]
    NoSignatures,

    /// The payload could not be canonicalized.
    #[error(transparent)]
    Codec(#[from] RecordError),
}

// ---------------------------------------------------------------------------
// Checksum
// ---------------------------------------------------------------------------

/// Hex SHA-256 of the canonical JSON bytes of `payload`.
///
/// # Errors
///
/// Returns [`RecordError::Json`] if the payload cannot be serialized.
///
/// # Examples
///
/// ```
/// let a = serde_json::json!({"b": 1, "a": 2});
/// let b = serde_json::json!({"a": 2, "b": 1});
/// assert_eq!(
///     gitgov_record::checksum(&a).unwrap(),
///     gitgov_record::checksum(&b).unwrap()
/// );
/// ```
pub fn checksum(payload: &Value) -> Result<String, RecordError> {
    let canonical = canonicalize(payload)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// The exact bytes a signature covers.
#[must_use]
pub fn signing_input(
    payload_checksum: &str,
    key_id: &str,
    role: SignatureRole,
    timestamp: i64,
) -> String {
    format!("{payload_checksum}:{key_id}:{role}:{timestamp}")
}

// ---------------------------------------------------------------------------
// Signer
// ---------------------------------------------------------------------------

/// An actor's signing identity: key ID plus Ed25519 private key.
pub struct Signer {
    key_id: String,
    key: SigningKey,
}

impl Signer {
    /// Wrap an existing signing key under `key_id`.
    #[must_use]
    pub fn new(key_id: impl Into<String>, key: SigningKey) -> Self {
        Self {
            key_id: key_id.into(),
            key,
        }
    }

    /// The actor ID this signer signs as.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// The verifying half of the key pair.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// Base64 of the public key, in the form `ActorRecord.publicKey` carries.
    #[must_use]
    pub fn public_key_base64(&self) -> String {
        BASE64.encode(self.key.verifying_key().as_bytes())
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("Signer").field("key_id", &self.key_id).finish()
    }
}

/// Append a signature to `wrapper` as `signer` in `role`.
///
/// The signature covers the checksum already present in the header; callers
/// that changed the payload must refresh the header checksum first (the
/// factory does this).
pub fn sign(
    wrapper: &mut RecordWrapper,
    signer: &Signer,
    role: SignatureRole,
    notes: Option<String>,
    timestamp: i64,
) {
    let input = signing_input(
        &wrapper.header.payload_checksum,
        signer.key_id(),
        role,
        timestamp,
    );
    let sig = signer.key.sign(input.as_bytes());
    wrapper.header.signatures.push(Signature {
        key_id: signer.key_id().to_string(),
        role,
        notes,
        signature: BASE64.encode(sig.to_bytes()),
        timestamp,
    });
}

// ---------------------------------------------------------------------------
// Key resolution and verification
// ---------------------------------------------------------------------------

/// Resolves signer key IDs to verification keys.
pub trait KeyResolver {
    /// The verifying key for `key_id`, if known.
    fn resolve(&self, key_id: &str) -> Option<VerifyingKey>;
}

impl KeyResolver for BTreeMap<String, VerifyingKey> {
    fn resolve(&self, key_id: &str) -> Option<VerifyingKey> {
        self.get(key_id).copied()
    }
}

/// A [`KeyResolver`] built from actor records.
#[derive(Debug, Default, Clone)]
pub struct ActorKeyring {
    keys: BTreeMap<String, VerifyingKey>,
}

impl ActorKeyring {
    /// Empty keyring.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an actor's public key.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::MalformedKey`] when the base64 key does not
    /// decode to 32 Ed25519 public key bytes.
    pub fn add(&mut self, actor: &ActorRecord) -> Result<(), RecordError> {
        let malformed = || RecordError::MalformedKey {
            key_id: actor.id.clone(),
        };
        let bytes = BASE64.decode(&actor.public_key).map_err(|_| malformed())?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| malformed())?;
        let key = VerifyingKey::from_bytes(&bytes).map_err(|_| malformed())?;
        self.keys.insert(actor.id.clone(), key);
        Ok(())
    }

    /// Build a keyring from a set of actors, skipping malformed keys.
    #[must_use]
    pub fn from_actors<'a>(actors: impl IntoIterator<Item = &'a ActorRecord>) -> Self {
        let mut keyring = Self::new();
        for actor in actors {
            let _ = keyring.add(actor);
        }
        keyring
    }

    /// Number of resolvable keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the keyring has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl KeyResolver for ActorKeyring {
    fn resolve(&self, key_id: &str) -> Option<VerifyingKey> {
        self.keys.get(key_id).copied()
    }
}

/// Verify a wrapper's checksum and every signature.
///
/// # Errors
///
/// - [`VerifyError::ChecksumMismatch`] when the recomputed payload checksum
///   disagrees with the header.
/// - [`VerifyError::NoSignatures`] when the signature list is empty.
/// - [`VerifyError::UnknownSigner`] when a signer's key cannot be resolved.
/// - [`VerifyError::SignatureInvalid`] when a signature fails to decode or
///   verify.
pub fn verify(wrapper: &RecordWrapper, resolver: &dyn KeyResolver) -> Result<(), VerifyError> {
    let computed = checksum(&wrapper.payload)?;
    if computed != wrapper.header.payload_checksum {
        return Err(VerifyError::ChecksumMismatch {
            stored: wrapper.header.payload_checksum.clone(),
            computed,
        });
    }

    if wrapper.header.signatures.is_empty() {
        return Err(VerifyError::NoSignatures);
    }

    for sig in &wrapper.header.signatures {
        let key = resolver
            .resolve(&sig.key_id)
            .ok_or_else(|| VerifyError::UnknownSigner {
                key_id: sig.key_id.clone(),
            })?;
        let invalid = || VerifyError::SignatureInvalid {
            key_id: sig.key_id.clone(),
        };
        let bytes = BASE64.decode(&sig.signature).map_err(|_| invalid())?;
        let signature = ed25519_dalek::Signature::from_slice(&bytes).map_err(|_| invalid())?;
        let input = signing_input(&computed, &sig.key_id, sig.role, sig.timestamp);
        key.verify(input.as_bytes(), &signature)
            .map_err(|_| invalid())?;
    }

    Ok(())
}
