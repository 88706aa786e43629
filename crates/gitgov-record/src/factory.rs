// SPDX-License-Identifier: MIT OR Apache-2.0
//! Validate-before-return record construction.
//!
//! [`seal`] is the only way a typed payload becomes a [`RecordWrapper`]:
//! the payload is schema-validated, checksummed, and author-signed in one
//! step, so an invalid record never exists in wrapped form.

use crate::{
    EntityPayload, Header, RecordError, RecordWrapper, SignatureRole, WRAPPER_VERSION, checksum,
    codec::{self, Signer},
    schema,
};
use chrono::{DateTime, Utc};

/// Seal a payload into a signed record wrapper.
///
/// Validates the payload against its schema (plus ID/type agreement),
/// computes the canonical checksum, and attaches an `author` signature
/// stamped at `now`.
///
/// # Errors
///
/// - [`RecordError::Schema`] with every violation when validation fails.
/// - [`RecordError::Json`] when the payload cannot be serialized.
pub fn seal<T: EntityPayload>(
    payload: &T,
    signer: &Signer,
    now: DateTime<Utc>,
) -> Result<RecordWrapper, RecordError> {
    let value = serde_json::to_value(payload)?;
    schema::validate(&value, T::KIND).map_err(RecordError::Schema)?;

    let payload_checksum = checksum(&value)?;
    let mut wrapper = RecordWrapper {
        header: Header {
            version: WRAPPER_VERSION.into(),
            kind: T::KIND,
            payload_checksum,
            signatures: Vec::new(),
        },
        payload: value,
    };
    codec::sign(
        &mut wrapper,
        signer,
        SignatureRole::Author,
        None,
        now.timestamp(),
    );
    schema::validate_wrapper(&wrapper)?;
    Ok(wrapper)
}

/// Re-seal a record whose payload changed, signing the new checksum in
/// `role`.
///
/// Old signatures covered the old checksum and can no longer verify, so
/// they are replaced rather than kept; the audit trail of who signed what
/// lives in the state branch history. Used by conflict resolution to
/// re-sign merged records as `resolver`.
///
/// # Errors
///
/// Same as [`seal`].
pub fn reseal(
    wrapper: &RecordWrapper,
    signer: &Signer,
    role: SignatureRole,
    notes: Option<String>,
    now: DateTime<Utc>,
) -> Result<RecordWrapper, RecordError> {
    let kind = wrapper.header.kind;
    schema::validate(&wrapper.payload, kind).map_err(RecordError::Schema)?;

    let payload_checksum = checksum(&wrapper.payload)?;
    let mut out = RecordWrapper {
        header: Header {
            version: wrapper.header.version.clone(),
            kind,
            payload_checksum,
            signatures: Vec::new(),
        },
        payload: wrapper.payload.clone(),
    };
    codec::sign(&mut out, signer, role, notes, now.timestamp());
    schema::validate_wrapper(&out)?;
    Ok(out)
}
