// SPDX-License-Identifier: MIT OR Apache-2.0
//! Byte-deterministic canonical JSON.
//!
//! Canonical form: object keys sorted lexicographically at every depth, no
//! insignificant whitespace, UTF-8 with non-ASCII characters preserved, and
//! numbers exactly as serde_json renders them. Two semantically equal values
//! always canonicalize to the same bytes.

use crate::RecordError;
use serde_json::Value;

/// Produce the canonical JSON text of `value`.
///
/// # Errors
///
/// Returns [`RecordError::Json`] if serialization fails.
///
/// # Examples
///
/// ```
/// use gitgov_record::canonicalize;
///
/// let a = serde_json::json!({"b": 1, "a": {"z": true, "y": "ü"}});
/// assert_eq!(canonicalize(&a).unwrap(), r#"{"a":{"y":"ü","z":true},"b":1}"#);
/// ```
pub fn canonicalize(value: &Value) -> Result<String, RecordError> {
    Ok(serde_json::to_string(&sorted(value))?)
}

/// Rebuild `value` with object keys in sorted order at every depth.
fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::with_capacity(map.len());
            for key in keys {
                out.insert(key.clone(), sorted(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn keys_sort_at_every_depth() {
        let v = serde_json::json!({"z": {"b": 2, "a": 1}, "a": [{"d": 4, "c": 3}]});
        assert_eq!(
            canonicalize(&v).unwrap(),
            r#"{"a":[{"c":3,"d":4}],"z":{"a":1,"b":2}}"#
        );
    }

    #[test]
    fn non_ascii_is_preserved() {
        let v = serde_json::json!({"name": "café ☕"});
        assert_eq!(canonicalize(&v).unwrap(), r#"{"name":"café ☕"}"#);
    }

    #[test]
    fn scalars_pass_through() {
        assert_eq!(canonicalize(&serde_json::json!(null)).unwrap(), "null");
        assert_eq!(canonicalize(&serde_json::json!(1.5)).unwrap(), "1.5");
        assert_eq!(canonicalize(&serde_json::json!(-7)).unwrap(), "-7");
        assert_eq!(canonicalize(&serde_json::json!(true)).unwrap(), "true");
    }

    #[test]
    fn array_order_is_significant() {
        let v = serde_json::json!([2, 1]);
        assert_eq!(canonicalize(&v).unwrap(), "[2,1]");
    }

    fn arb_json(depth: u32) -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| Value::Number(n.into())),
            "[a-zA-Zà-ÿ0-9 ]{0,12}".prop_map(Value::String),
        ];
        leaf.prop_recursive(depth, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(|m| {
                    Value::Object(m.into_iter().collect())
                }),
            ]
        })
    }

    proptest! {
        // canonicalize ∘ parse ∘ canonicalize = canonicalize
        #[test]
        fn canonicalize_is_idempotent(v in arb_json(3)) {
            let once = canonicalize(&v).unwrap();
            let reparsed: Value = serde_json::from_str(&once).unwrap();
            let twice = canonicalize(&reparsed).unwrap();
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn canonical_form_is_order_independent(
            entries in prop::collection::btree_map("[a-z]{1,6}", any::<i64>(), 0..8)
        ) {
            let forward: serde_json::Map<String, Value> = entries
                .iter()
                .map(|(k, n)| (k.clone(), Value::Number((*n).into())))
                .collect();
            let reversed: serde_json::Map<String, Value> = entries
                .iter()
                .rev()
                .map(|(k, n)| (k.clone(), Value::Number((*n).into())))
                .collect();
            prop_assert_eq!(
                canonicalize(&Value::Object(forward)).unwrap(),
                canonicalize(&Value::Object(reversed)).unwrap()
            );
        }
    }
}
