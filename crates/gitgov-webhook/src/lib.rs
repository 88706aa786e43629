// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! gitgov-webhook
//!
//! A pure transformation from a hosted-git push webhook to a sync
//! decision. No HTTP here: the consumer hands in the signature, event, and
//! delivery headers plus the raw body, and gets back exactly one of
//! `sync`, `ignore`, or `error`. The handler never fails — every problem
//! is an `error` result with a stable reason string.

use gitgov_store::{DeltaEntry, DeltaStatus, should_sync_file};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

/// Configuration for webhook verification.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Shared secret the sender signs bodies with.
    pub secret: String,
    /// Branch whose pushes trigger syncs (e.g. `gitgov-state`).
    pub state_branch: String,
}

/// One webhook delivery, already unframed from HTTP.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    /// Signature header (`sha256=<hex>`).
    pub signature: String,
    /// Event header (`push`, `ping`, …).
    pub event: String,
    /// Delivery ID header, echoed back in the result.
    pub delivery_id: String,
    /// The raw request body.
    pub raw_body: String,
}

/// The decision for one delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum WebhookResult {
    /// The push touched syncable state: pull it.
    Sync {
        /// Syncable files changed by the push, in path order.
        delta: Vec<DeltaEntry>,
        /// The push's head commit SHA.
        #[serde(rename = "headSha")]
        head_sha: String,
        /// Why the delivery produced a sync.
        reason: String,
        /// Echo of the delivery ID.
        #[serde(rename = "deliveryId")]
        delivery_id: String,
    },
    /// Nothing to do for this delivery.
    Ignore {
        /// Why it was ignored.
        reason: String,
        /// Echo of the delivery ID.
        #[serde(rename = "deliveryId")]
        delivery_id: String,
    },
    /// The delivery was invalid.
    Error {
        /// Why it was rejected.
        reason: String,
        /// Echo of the delivery ID.
        #[serde(rename = "deliveryId")]
        delivery_id: String,
    },
}

#[derive(Debug, Deserialize)]
struct PushEvent {
    #[serde(rename = "ref")]
    git_ref: Option<String>,
    after: Option<String>,
    commits: Option<Vec<PushCommit>>,
}

#[derive(Debug, Default, Deserialize)]
struct PushCommit {
    #[serde(default)]
    added: Vec<String>,
    #[serde(default)]
    modified: Vec<String>,
    #[serde(default)]
    removed: Vec<String>,
}

/// Decide what to do with a webhook delivery. Never fails.
///
/// # Examples
///
/// ```
/// use gitgov_webhook::{WebhookConfig, WebhookRequest, WebhookResult, handle_webhook, sign_body};
///
/// let config = WebhookConfig {
///     secret: "s3cret".into(),
///     state_branch: "gitgov-state".into(),
/// };
/// let body = r#"{"ref":"refs/heads/gitgov-state","after":"abc",
///     "commits":[{"added":[".gitgov/tasks/1700000000-task-x.json"]}]}"#;
/// let request = WebhookRequest {
///     signature: sign_body(&config.secret, body),
///     event: "push".into(),
///     delivery_id: "d-1".into(),
///     raw_body: body.into(),
/// };
/// assert!(matches!(handle_webhook(&config, &request), WebhookResult::Sync { .. }));
/// ```
#[must_use]
pub fn handle_webhook(config: &WebhookConfig, request: &WebhookRequest) -> WebhookResult {
    let delivery_id = request.delivery_id.clone();
    let error = |reason: &str| WebhookResult::Error {
        reason: reason.into(),
        delivery_id: delivery_id.clone(),
    };
    let ignore = |reason: &str| WebhookResult::Ignore {
        reason: reason.into(),
        delivery_id: delivery_id.clone(),
    };

    if !verify_signature(&config.secret, &request.signature, &request.raw_body) {
        return error("Invalid signature");
    }

    if request.event == "ping" {
        return ignore("Ping event");
    }
    if request.event != "push" {
        return ignore("Unsupported event");
    }

    let event: PushEvent = match serde_json::from_str(&request.raw_body) {
        Ok(event) => event,
        Err(_) => return error("Invalid JSON payload"),
    };

    let mut missing = Vec::new();
    if event.git_ref.is_none() {
        missing.push("ref");
    }
    if event.after.is_none() {
        missing.push("after");
    }
    if event.commits.is_none() {
        missing.push("commits");
    }
    if !missing.is_empty() {
        return error(&format!(
            "Malformed push event: missing {}",
            missing.join(", ")
        ));
    }
    let (git_ref, after, commits) = (
        event.git_ref.unwrap_or_default(),
        event.after.unwrap_or_default(),
        event.commits.unwrap_or_default(),
    );

    if git_ref != format!("refs/heads/{}", config.state_branch) {
        return ignore("Not state branch");
    }

    let delta = fold_commits(&commits);
    if delta.is_empty() {
        return ignore("No syncable files");
    }

    WebhookResult::Sync {
        delta,
        head_sha: after,
        reason: "State branch push with syncable changes".into(),
        delivery_id,
    }
}

/// Compute the `sha256=<hex>` signature for a body. The sender-side twin
/// of the verification, handy for tests and for re-delivery tooling.
#[must_use]
pub fn sign_body(secret: &str, body: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(body.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time verification of a `sha256=<hex>` signature.
fn verify_signature(secret: &str, signature: &str, body: &str) -> bool {
    let Some(hex_digest) = signature.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body.as_bytes());
    // verify_slice is the constant-time comparison.
    mac.verify_slice(&expected).is_ok()
}

/// Fold per-commit file lists into one status per file, oldest commit
/// first so the last commit wins — with two refinements: a file added and
/// then removed in the same push vanishes entirely, and a file added and
/// then modified stays `A`.
fn fold_commits(commits: &[PushCommit]) -> Vec<DeltaEntry> {
    let mut statuses: BTreeMap<String, DeltaStatus> = BTreeMap::new();

    for commit in commits {
        for file in &commit.added {
            if !should_sync_file(file) {
                continue;
            }
            statuses.insert(file.clone(), DeltaStatus::A);
        }
        for file in &commit.modified {
            if !should_sync_file(file) {
                continue;
            }
            // Added earlier in this push: the net effect is still an add.
            match statuses.get(file) {
                Some(DeltaStatus::A) => {}
                _ => {
                    statuses.insert(file.clone(), DeltaStatus::M);
                }
            }
        }
        for file in &commit.removed {
            if !should_sync_file(file) {
                continue;
            }
            // Added and removed within the same push: net nothing.
            if statuses.get(file) == Some(&DeltaStatus::A) {
                statuses.remove(file);
            } else {
                statuses.insert(file.clone(), DeltaStatus::D);
            }
        }
    }

    statuses
        .into_iter()
        .map(|(file, status)| DeltaEntry { file, status })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> WebhookConfig {
        WebhookConfig {
            secret: "s3cret".into(),
            state_branch: "gitgov-state".into(),
        }
    }

    fn push_request(body: &str) -> WebhookRequest {
        WebhookRequest {
            signature: sign_body("s3cret", body),
            event: "push".into(),
            delivery_id: "d-1".into(),
            raw_body: body.into(),
        }
    }

    fn body(commits: serde_json::Value) -> String {
        serde_json::json!({
            "ref": "refs/heads/gitgov-state",
            "after": "abc123",
            "commits": commits,
        })
        .to_string()
    }

    #[test]
    fn valid_push_produces_sync_with_delta() {
        let body = body(serde_json::json!([
            {"added": [".gitgov/tasks/1700000000-task-x.json"],
             "modified": [".gitgov/config.json"]},
        ]));
        let result = handle_webhook(&config(), &push_request(&body));
        let WebhookResult::Sync {
            delta,
            head_sha,
            delivery_id,
            ..
        } = result
        else {
            panic!("expected sync, got {result:?}");
        };
        assert_eq!(head_sha, "abc123");
        assert_eq!(delivery_id, "d-1");
        assert_eq!(delta.len(), 2);
        assert!(delta.contains(&DeltaEntry {
            file: ".gitgov/tasks/1700000000-task-x.json".into(),
            status: DeltaStatus::A,
        }));
        assert!(delta.contains(&DeltaEntry {
            file: ".gitgov/config.json".into(),
            status: DeltaStatus::M,
        }));
    }

    #[test]
    fn invalid_signature_is_an_error() {
        let body = body(serde_json::json!([]));
        let mut request = push_request(&body);
        request.signature = "sha256=deadbeef".into();
        let result = handle_webhook(&config(), &request);
        assert_eq!(
            result,
            WebhookResult::Error {
                reason: "Invalid signature".into(),
                delivery_id: "d-1".into(),
            }
        );
    }

    #[test]
    fn missing_signature_prefix_is_an_error() {
        let body = body(serde_json::json!([]));
        let mut request = push_request(&body);
        request.signature = hex::encode([0u8; 32]);
        let result = handle_webhook(&config(), &request);
        assert!(matches!(result, WebhookResult::Error { reason, .. } if reason == "Invalid signature"));
    }

    #[test]
    fn ping_and_other_events_are_ignored() {
        let body = body(serde_json::json!([]));
        let mut request = push_request(&body);
        request.event = "ping".into();
        assert!(matches!(
            handle_webhook(&config(), &request),
            WebhookResult::Ignore { reason, .. } if reason == "Ping event"
        ));

        let mut request = push_request(&body);
        request.event = "issues".into();
        assert!(matches!(
            handle_webhook(&config(), &request),
            WebhookResult::Ignore { reason, .. } if reason == "Unsupported event"
        ));
    }

    #[test]
    fn malformed_json_is_an_error() {
        let raw = "{not json";
        let request = WebhookRequest {
            signature: sign_body("s3cret", raw),
            event: "push".into(),
            delivery_id: "d-1".into(),
            raw_body: raw.into(),
        };
        assert!(matches!(
            handle_webhook(&config(), &request),
            WebhookResult::Error { reason, .. } if reason == "Invalid JSON payload"
        ));
    }

    #[test]
    fn missing_fields_are_named() {
        let raw = serde_json::json!({"ref": "refs/heads/gitgov-state"}).to_string();
        let request = push_request(&raw);
        let result = handle_webhook(&config(), &request);
        assert!(matches!(
            result,
            WebhookResult::Error { reason, .. }
                if reason == "Malformed push event: missing after, commits"
        ));
    }

    #[test]
    fn other_branches_are_ignored() {
        let raw = serde_json::json!({
            "ref": "refs/heads/main",
            "after": "abc",
            "commits": [{"added": [".gitgov/tasks/1700000000-task-x.json"]}],
        })
        .to_string();
        assert!(matches!(
            handle_webhook(&config(), &push_request(&raw)),
            WebhookResult::Ignore { reason, .. } if reason == "Not state branch"
        ));
    }

    #[test]
    fn push_with_only_non_syncable_files_is_ignored() {
        let body = body(serde_json::json!([
            {"added": [".gitgov/index.json", "src/main.rs"],
             "modified": [".gitgov/actors/alice.key"]},
        ]));
        assert!(matches!(
            handle_webhook(&config(), &push_request(&body)),
            WebhookResult::Ignore { reason, .. } if reason == "No syncable files"
        ));
    }

    #[test]
    fn added_then_removed_vanishes() {
        let file = ".gitgov/tasks/1700000000-task-x.json";
        let body = body(serde_json::json!([
            {"added": [file]},
            {"removed": [file]},
        ]));
        assert!(matches!(
            handle_webhook(&config(), &push_request(&body)),
            WebhookResult::Ignore { reason, .. } if reason == "No syncable files"
        ));
    }

    #[test]
    fn added_then_modified_stays_added() {
        let file = ".gitgov/tasks/1700000000-task-x.json";
        let body = body(serde_json::json!([
            {"added": [file]},
            {"modified": [file]},
        ]));
        let result = handle_webhook(&config(), &push_request(&body));
        let WebhookResult::Sync { delta, .. } = result else {
            panic!("expected sync");
        };
        assert_eq!(delta[0].status, DeltaStatus::A);
    }

    #[test]
    fn removed_then_added_is_last_commit_wins() {
        let file = ".gitgov/tasks/1700000000-task-x.json";
        let body = body(serde_json::json!([
            {"removed": [file]},
            {"added": [file]},
        ]));
        let result = handle_webhook(&config(), &push_request(&body));
        let WebhookResult::Sync { delta, .. } = result else {
            panic!("expected sync");
        };
        assert_eq!(delta[0].status, DeltaStatus::A);
    }

    #[test]
    fn handler_is_total_over_arbitrary_garbage() {
        for garbage in ["", "\u{0}", "][", "{\"commits\": 42}"] {
            let request = WebhookRequest {
                signature: sign_body("s3cret", garbage),
                event: "push".into(),
                delivery_id: "d".into(),
                raw_body: garbage.into(),
            };
            // Whatever comes back, it is a value, not a panic.
            let _ = handle_webhook(&config(), &request);
        }
    }
}
