// SPDX-License-Identifier: MIT OR Apache-2.0
//! Record and actor ID grammar.
//!
//! Record IDs are `<unix-seconds>-<token>-<slug>` where the token names the
//! record kind (`task`, `cycle`, `exec`, `feedback`, `changelog`, `agent`)
//! and the slug is 1–50 chars of `[a-z0-9-]`. Actor IDs are
//! `(human|agent):<name>` with the same character set for the name.

use crate::RecordType;
use chrono::{DateTime, Utc};

/// Maximum slug length inside a record ID.
pub const MAX_SLUG_LEN: usize = 50;

/// The parsed pieces of a record ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordIdParts<'a> {
    /// Unix-second creation timestamp embedded in the ID.
    pub timestamp: i64,
    /// The record kind the token names.
    pub kind: RecordType,
    /// The trailing slug.
    pub slug: &'a str,
}

/// Generate a record ID for `kind` from a title slug and a creation time.
///
/// The slug is normalized with [`slugify`] and truncated to
/// [`MAX_SLUG_LEN`]. Actor records do not use this grammar; passing
/// [`RecordType::Actor`] returns `None`.
#[must_use]
pub fn generate_record_id(kind: RecordType, slug: &str, now: DateTime<Utc>) -> Option<String> {
    let token = kind.id_token()?;
    let mut slug = slugify(slug);
    if slug.is_empty() {
        slug = "record".into();
    }
    slug.truncate(MAX_SLUG_LEN);
    let slug = slug.trim_end_matches('-');
    Some(format!("{}-{token}-{slug}", now.timestamp()))
}

/// Normalize a title into the slug character set: lowercase ASCII
/// alphanumerics with single dashes between words.
///
/// # Examples
///
/// ```
/// assert_eq!(gitgov_record::slugify("Fix the  Sync engine!"), "fix-the-sync-engine");
/// ```
#[must_use]
pub fn slugify(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut pending_dash = false;
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

/// Parse a record ID into its timestamp, kind, and slug.
#[must_use]
pub fn parse_record_id(id: &str) -> Option<RecordIdParts<'_>> {
    let (ts, rest) = id.split_once('-')?;
    if ts.len() != 10 || !ts.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let (token, slug) = rest.split_once('-')?;
    let kind = kind_for_token(token)?;
    if slug.is_empty() || slug.len() > MAX_SLUG_LEN {
        return None;
    }
    if !slug
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return None;
    }
    Some(RecordIdParts {
        timestamp: ts.parse().ok()?,
        kind,
        slug,
    })
}

/// Whether `id` is a well-formed record ID for `kind`.
#[must_use]
pub fn is_valid_record_id(id: &str, kind: RecordType) -> bool {
    parse_record_id(id).is_some_and(|parts| parts.kind == kind)
}

/// Whether `id` is a well-formed actor ID (`human:name` or `agent:name`).
#[must_use]
pub fn is_valid_actor_id(id: &str) -> bool {
    let Some((kind, name)) = id.split_once(':') else {
        return false;
    };
    (kind == "human" || kind == "agent")
        && !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// The Unix-second timestamp embedded in a record ID, if the ID parses.
#[must_use]
pub fn id_timestamp(id: &str) -> Option<i64> {
    parse_record_id(id).map(|parts| parts.timestamp)
}

fn kind_for_token(token: &str) -> Option<RecordType> {
    match token {
        "task" => Some(RecordType::Task),
        "cycle" => Some(RecordType::Cycle),
        "exec" => Some(RecordType::Execution),
        "feedback" => Some(RecordType::Feedback),
        "changelog" => Some(RecordType::Changelog),
        "agent" => Some(RecordType::Agent),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn generated_ids_parse_back() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let id = generate_record_id(RecordType::Task, "Demo Task", now).unwrap();
        assert_eq!(id, "1700000000-task-demo-task");
        let parts = parse_record_id(&id).unwrap();
        assert_eq!(parts.timestamp, 1_700_000_000);
        assert_eq!(parts.kind, RecordType::Task);
        assert_eq!(parts.slug, "demo-task");
    }

    #[test]
    fn execution_ids_use_exec_token() {
        let now = Utc.timestamp_opt(1_700_000_001, 0).unwrap();
        let id = generate_record_id(RecordType::Execution, "run", now).unwrap();
        assert_eq!(id, "1700000001-exec-run");
    }

    #[test]
    fn actor_kind_has_no_record_id() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert!(generate_record_id(RecordType::Actor, "alice", now).is_none());
    }

    #[test]
    fn long_slugs_truncate_without_trailing_dash() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let title = "a".repeat(49) + " b and more words";
        let id = generate_record_id(RecordType::Task, &title, now).unwrap();
        let parts = parse_record_id(&id).unwrap();
        assert!(parts.slug.len() <= MAX_SLUG_LEN);
        assert!(!parts.slug.ends_with('-'));
    }

    #[test]
    fn malformed_ids_are_rejected() {
        for bad in [
            "",
            "170000000-task-x",        // 9-digit timestamp
            "17000000000-task-x",      // 11-digit timestamp
            "1700000000-widget-x",     // unknown token
            "1700000000-task-",        // empty slug
            "1700000000-task-UPPER",   // uppercase slug
            "1700000000-task-has.dot", // bad slug char
            "human:alice",             // actor grammar, not a record ID
        ] {
            assert!(parse_record_id(bad).is_none(), "accepted: {bad}");
        }
        let long = format!("1700000000-task-{}", "a".repeat(51));
        assert!(parse_record_id(&long).is_none());
    }

    #[test]
    fn id_kind_must_match() {
        assert!(is_valid_record_id("1700000000-task-x", RecordType::Task));
        assert!(!is_valid_record_id("1700000000-task-x", RecordType::Cycle));
    }

    #[test]
    fn actor_ids_validate() {
        assert!(is_valid_actor_id("human:alice"));
        assert!(is_valid_actor_id("agent:ci-bot-2"));
        assert!(!is_valid_actor_id("robot:alice"));
        assert!(!is_valid_actor_id("human:"));
        assert!(!is_valid_actor_id("human:Alice"));
        assert!(!is_valid_actor_id("alice"));
    }

    #[test]
    fn id_timestamp_extracts_prefix() {
        assert_eq!(id_timestamp("1700000000-cycle-q1"), Some(1_700_000_000));
        assert_eq!(id_timestamp("not-an-id"), None);
    }
}
