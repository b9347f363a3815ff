//! Deep equality.
//!
//! Unlike `equals`, `deepEquals` requires an exact structural match of each
//! named field:
//! - objects have the same key set (under the key policy) with deep-equal
//!   values; each expected key must claim a distinct actual key
//! - arrays are equal as multisets: same length, each expected element paired
//!   with a distinct actual element, order ignored
//! - scalars compare as normalized text

use super::evaluator::{with_interpreted, Comparison, Expected};
use super::field_value::lookup_entry;
use serde_json::Value;
use std::collections::HashSet;

pub fn deep_equal(expected: &Expected, actual: &Value, cmp: &Comparison<'_>) -> bool {
    match (expected, actual) {
        (Expected::Scalar(_), Value::Array(_) | Value::Object(_)) => false,
        (Expected::Scalar(scalar), value) => cmp.scalar(scalar, value),
        (Expected::Object(entries), Value::Object(map)) => {
            if entries.len() != map.len() {
                return false;
            }
            let mut claimed = HashSet::with_capacity(map.len());
            entries.iter().all(|(key, child)| {
                lookup_entry(map, key, cmp.key_match).is_some_and(|(actual_key, value)| {
                    claimed.insert(actual_key.as_str()) && deep_equal(child, value, cmp)
                })
            })
        }
        (Expected::Array(children), Value::Array(items)) => multiset_equal(children, items, cmp),
        (Expected::Object(_) | Expected::Array(_), Value::String(text)) => {
            with_interpreted(text, |parsed| deep_equal(expected, parsed, cmp))
        }
        _ => false,
    }
}

/// Greedy bijection between expected and actual elements.
fn multiset_equal(expected: &[Expected], actual: &[Value], cmp: &Comparison<'_>) -> bool {
    if expected.len() != actual.len() {
        return false;
    }
    let mut used = vec![false; actual.len()];
    expected.iter().all(|child| {
        let found = actual
            .iter()
            .enumerate()
            .find(|(i, item)| !used[*i] && deep_equal(child, item, cmp))
            .map(|(i, _)| i);
        match found {
            Some(i) => {
                used[i] = true;
                true
            }
            None => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use crate::predicate::definition::Operator;
    use crate::predicate::evaluator::{CompiledLeaf, EvaluationScope};
    use crate::predicate::options::PredicateOptions;
    use crate::request::CanonicalRequest;
    use serde_json::{json, Value};

    fn deep_equals(fields: Value, request: &CanonicalRequest) -> bool {
        deep_equals_with(fields, json!({}), request)
    }

    fn deep_equals_with(fields: Value, options: Value, request: &CanonicalRequest) -> bool {
        let options: PredicateOptions = serde_json::from_value(options).unwrap();
        let leaf =
            CompiledLeaf::compile(Operator::DeepEquals, fields.as_object().unwrap(), &options)
                .unwrap();
        leaf.evaluate(&EvaluationScope::new(request))
    }

    fn body(text: &str) -> CanonicalRequest {
        CanonicalRequest::new().with_field("body", text)
    }

    #[test]
    fn test_query_requires_exact_key_set() {
        let request = CanonicalRequest::http("GET", "/").query("a=1&b=2").build();
        assert!(deep_equals(json!({"query": {"a": "1", "b": "2"}}), &request));
        assert!(!deep_equals(json!({"query": {"a": "1"}}), &request));
        assert!(!deep_equals(json!({"query": {}}), &request));

        let bare = CanonicalRequest::http("GET", "/").build();
        assert!(deep_equals(json!({"query": {}}), &bare));
    }

    #[test]
    fn test_folded_keys_cannot_share_an_actual_key() {
        let request = CanonicalRequest::http("GET", "/").query("a=1&b=2").build();
        assert!(!deep_equals(json!({"query": {"a": "1", "A": "1"}}), &request));

        let single = CanonicalRequest::http("GET", "/").query("a=1").build();
        assert!(!deep_equals(json!({"query": {"a": "1", "A": "1"}}), &single));
        assert!(deep_equals(json!({"query": {"A": "1"}}), &single));
    }

    #[test]
    fn test_arrays_are_order_independent() {
        let request = body(r#"{"key": ["first", "second", "third"]}"#);
        assert!(deep_equals(
            json!({"body": {"key": ["third", "first", "second"]}}),
            &request
        ));
        assert!(!deep_equals(json!({"body": {"key": ["first", "second"]}}), &request));
        assert!(!deep_equals(
            json!({"body": {"key": ["first", "second", "third", "fourth"]}}),
            &request
        ));
    }

    #[test]
    fn test_duplicate_elements_need_duplicates() {
        let request = body(r#"{"key": ["a", "a", "b"]}"#);
        assert!(deep_equals(json!({"body": {"key": ["a", "b", "a"]}}), &request));
        assert!(!deep_equals(json!({"body": {"key": ["a", "b", "b"]}}), &request));
    }

    #[test]
    fn test_arrays_of_objects() {
        let request = body(r#"{"key": [{"id": 1}, {"id": 2}]}"#);
        assert!(deep_equals(
            json!({"body": {"key": [{"id": 2}, {"id": 1}]}}),
            &request
        ));
        assert!(!deep_equals(json!({"body": {"key": [{"id": 2}]}}), &request));
    }

    #[test]
    fn test_unnamed_request_fields_are_ignored() {
        let request = CanonicalRequest::http("POST", "/orders").body("x").build();
        assert!(deep_equals(json!({"path": "/orders", "method": "post"}), &request));
    }

    #[test]
    fn test_case_sensitivity_applies_to_values_and_keys() {
        let request = body(r#"{"Key": "Value"}"#);
        assert!(deep_equals(json!({"body": {"key": "value"}}), &request));
        assert!(!deep_equals_with(
            json!({"body": {"key": "Value"}}),
            json!({"caseSensitive": true}),
            &request
        ));
        assert!(deep_equals_with(
            json!({"body": {"key": "Value"}}),
            json!({"caseSensitive": true, "keyCaseSensitive": false}),
            &request
        ));
    }

    #[test]
    fn test_scalar_against_structure_is_false() {
        let request = body(r#"{"key": {"nested": 1}}"#);
        assert!(!deep_equals(json!({"body": {"key": "1"}}), &request));
    }
}
