// SPDX-License-Identifier: MIT OR Apache-2.0
//! JSON-Schema validation over embedded assets.
//!
//! One schema file per record type ships inside the crate and is compiled
//! once into a cached validator. Validation failures come back as a list of
//! [`FieldViolation`]s, never as opaque blobs.

use crate::{RecordError, RecordType, RecordWrapper, id};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldViolation {
    /// JSON pointer to the offending field (`""` for the root).
    pub field: String,
    /// Human-readable description of the failure.
    pub message: String,
    /// The offending value.
    pub value: Value,
}

static TASK: LazyLock<jsonschema::Validator> =
    LazyLock::new(|| compile(include_str!("../schemas/task.json")));
static CYCLE: LazyLock<jsonschema::Validator> =
    LazyLock::new(|| compile(include_str!("../schemas/cycle.json")));
static ACTOR: LazyLock<jsonschema::Validator> =
    LazyLock::new(|| compile(include_str!("../schemas/actor.json")));
static AGENT: LazyLock<jsonschema::Validator> =
    LazyLock::new(|| compile(include_str!("../schemas/agent.json")));
static EXECUTION: LazyLock<jsonschema::Validator> =
    LazyLock::new(|| compile(include_str!("../schemas/execution.json")));
static FEEDBACK: LazyLock<jsonschema::Validator> =
    LazyLock::new(|| compile(include_str!("../schemas/feedback.json")));
static CHANGELOG: LazyLock<jsonschema::Validator> =
    LazyLock::new(|| compile(include_str!("../schemas/changelog.json")));

fn compile(source: &str) -> jsonschema::Validator {
    let schema: Value = serde_json::from_str(source).expect("embedded schema is valid JSON");
    jsonschema::validator_for(&schema).expect("embedded schema compiles")
}

fn validator_for(kind: RecordType) -> &'static jsonschema::Validator {
    match kind {
        RecordType::Task => &TASK,
        RecordType::Cycle => &CYCLE,
        RecordType::Actor => &ACTOR,
        RecordType::Agent => &AGENT,
        RecordType::Execution => &EXECUTION,
        RecordType::Feedback => &FEEDBACK,
        RecordType::Changelog => &CHANGELOG,
    }
}

/// Validate a payload against the schema for `kind`, plus the cross-field
/// rules the schema language cannot express.
///
/// # Errors
///
/// Returns every violation found; an empty error list is never returned.
pub fn validate(payload: &Value, kind: RecordType) -> Result<(), Vec<FieldViolation>> {
    let mut violations: Vec<FieldViolation> = validator_for(kind)
        .iter_errors(payload)
        .map(|err| {
            let field = err.instance_path.to_string();
            let message = err.to_string();
            FieldViolation {
                field,
                message,
                value: err.instance.into_owned(),
            }
        })
        .collect();

    if kind == RecordType::Changelog {
        violations.extend(changelog_rules(payload));
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

/// Validate a full wrapper: payload schema plus ID/type agreement.
///
/// # Errors
///
/// Returns [`RecordError::Schema`] with every violation found, including an
/// `id-mismatch` violation when the payload ID's token disagrees with the
/// header type.
pub fn validate_wrapper(wrapper: &RecordWrapper) -> Result<(), RecordError> {
    let kind = wrapper.header.kind;
    let mut violations = match validate(&wrapper.payload, kind) {
        Ok(()) => Vec::new(),
        Err(v) => v,
    };

    if let Some(record_id) = wrapper.record_id() {
        let matches = match kind {
            RecordType::Actor => id::is_valid_actor_id(record_id),
            _ => id::is_valid_record_id(record_id, kind),
        };
        if !matches {
            violations.push(FieldViolation {
                field: "/id".into(),
                message: format!("id does not match record type {kind}"),
                value: Value::String(record_id.to_string()),
            });
        }
    }

    if wrapper.header.signatures.is_empty() {
        violations.push(FieldViolation {
            field: "/header/signatures".into(),
            message: "signature list must not be empty".into(),
            value: Value::Array(vec![]),
        });
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(RecordError::Schema(violations))
    }
}

/// Cross-field rules for changelog entries.
fn changelog_rules(payload: &Value) -> Vec<FieldViolation> {
    let mut out = Vec::new();
    let risk = payload.get("riskLevel").and_then(Value::as_str);
    let non_empty = |field: &str| {
        payload
            .get(field)
            .and_then(Value::as_str)
            .is_some_and(|s| !s.is_empty())
    };

    if matches!(risk, Some("high" | "critical")) && !non_empty("rollbackInstructions") {
        out.push(FieldViolation {
            field: "/rollbackInstructions".into(),
            message: "required for high and critical risk changes".into(),
            value: payload
                .get("rollbackInstructions")
                .cloned()
                .unwrap_or(Value::Null),
        });
    }

    if matches!(risk, Some("medium" | "high" | "critical")) && !non_empty("usersAffected") {
        out.push(FieldViolation {
            field: "/usersAffected".into(),
            message: "required for medium risk and above".into(),
            value: payload.get("usersAffected").cloned().unwrap_or(Value::Null),
        });
    }

    let is_completion = payload.get("changeType").and_then(Value::as_str) == Some("completion");
    let has_task_refs = payload
        .get("references")
        .and_then(|r| r.get("tasks"))
        .and_then(Value::as_array)
        .is_some_and(|tasks| !tasks.is_empty());
    if is_completion && !has_task_refs {
        out.push(FieldViolation {
            field: "/references/tasks".into(),
            message: "completion changes must reference at least one task".into(),
            value: payload.get("references").cloned().unwrap_or(Value::Null),
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_task() -> Value {
        json!({
            "id": "1700000000-task-demo",
            "title": "Demo",
            "status": "draft",
            "priority": "medium",
            "description": "a demo",
            "tags": [],
            "references": [],
            "cycleIds": []
        })
    }

    fn valid_changelog() -> Value {
        json!({
            "id": "1700000000-changelog-release",
            "entityType": "task",
            "entityId": "1700000000-task-demo",
            "changeType": "update",
            "title": "Release",
            "description": "shipped it",
            "timestamp": 1_700_000_000,
            "trigger": "manual",
            "triggeredBy": "human:alice",
            "reason": "scheduled release",
            "riskLevel": "low"
        })
    }

    #[test]
    fn valid_task_passes() {
        assert!(validate(&valid_task(), RecordType::Task).is_ok());
    }

    #[test]
    fn bad_status_reports_field() {
        let mut task = valid_task();
        task["status"] = json!("wip");
        let violations = validate(&task, RecordType::Task).unwrap_err();
        assert!(violations.iter().any(|v| v.field == "/status"));
    }

    #[test]
    fn short_execution_result_fails() {
        let exec = json!({
            "id": "1700000000-exec-x",
            "taskId": "1700000000-task-demo",
            "type": "progress",
            "title": "Step",
            "result": "short"
        });
        let violations = validate(&exec, RecordType::Execution).unwrap_err();
        assert!(violations.iter().any(|v| v.field == "/result"));
    }

    #[test]
    fn high_risk_requires_rollback_instructions() {
        let mut entry = valid_changelog();
        entry["riskLevel"] = json!("high");
        entry["usersAffected"] = json!("all peers");
        let violations = validate(&entry, RecordType::Changelog).unwrap_err();
        assert!(
            violations
                .iter()
                .any(|v| v.field == "/rollbackInstructions")
        );

        entry["rollbackInstructions"] = json!("revert the commit");
        assert!(validate(&entry, RecordType::Changelog).is_ok());
    }

    #[test]
    fn medium_risk_requires_users_affected() {
        let mut entry = valid_changelog();
        entry["riskLevel"] = json!("medium");
        let violations = validate(&entry, RecordType::Changelog).unwrap_err();
        assert!(violations.iter().any(|v| v.field == "/usersAffected"));
    }

    #[test]
    fn completion_requires_task_references() {
        let mut entry = valid_changelog();
        entry["changeType"] = json!("completion");
        let violations = validate(&entry, RecordType::Changelog).unwrap_err();
        assert!(violations.iter().any(|v| v.field == "/references/tasks"));

        entry["references"] = json!({"tasks": ["1700000000-task-demo"]});
        assert!(validate(&entry, RecordType::Changelog).is_ok());
    }

    #[test]
    fn wrapper_id_type_agreement() {
        use crate::{Header, Signature, SignatureRole, WRAPPER_VERSION};
        let wrapper = RecordWrapper {
            header: Header {
                version: WRAPPER_VERSION.into(),
                kind: RecordType::Cycle,
                payload_checksum: "00".repeat(32),
                signatures: vec![Signature {
                    key_id: "human:alice".into(),
                    role: SignatureRole::Author,
                    notes: None,
                    signature: "c2ln".into(),
                    timestamp: 1,
                }],
            },
            // Task-shaped payload under a cycle header.
            payload: valid_task(),
        };
        let err = validate_wrapper(&wrapper).unwrap_err();
        let RecordError::Schema(violations) = err else {
            panic!("expected schema error");
        };
        assert!(violations.iter().any(|v| v.field == "/id"));
    }
}
