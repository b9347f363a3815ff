//! Field value resolution.
//!
//! Extracts the value a predicate compares against from a canonical request.
//! A string field is only interpreted as JSON or XML when a predicate needs to
//! navigate into it; flat field references see the raw value. Within one
//! resolution, a field's interpretation is computed once and shared by every
//! predicate touching it.

use super::xml::xml_to_value;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Key comparison policy for object lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyMatch {
    /// Lower-cased comparison; the first matching key wins.
    #[default]
    Folded,
    Exact,
}

impl KeyMatch {
    pub fn from_case_sensitive(case_sensitive: bool) -> Self {
        if case_sensitive {
            KeyMatch::Exact
        } else {
            KeyMatch::Folded
        }
    }

    pub fn keys_match(self, expected: &str, actual: &str) -> bool {
        match self {
            KeyMatch::Exact => expected == actual,
            KeyMatch::Folded => expected.to_lowercase() == actual.to_lowercase(),
        }
    }
}

/// Look up `key` in an object according to the key policy.
pub fn lookup_key<'a>(map: &'a Map<String, Value>, key: &str, key_match: KeyMatch) -> Option<&'a Value> {
    lookup_entry(map, key, key_match).map(|(_, value)| value)
}

/// Like [`lookup_key`], but also returns the actual key that matched.
///
/// Under `Folded` the first key in map order whose lowercase form matches
/// wins, even when an exact spelling appears later.
pub fn lookup_entry<'a>(
    map: &'a Map<String, Value>,
    key: &str,
    key_match: KeyMatch,
) -> Option<(&'a String, &'a Value)> {
    match key_match {
        KeyMatch::Exact => map.get_key_value(key),
        KeyMatch::Folded => {
            let lower = key.to_lowercase();
            map.iter().find(|(k, _)| k.to_lowercase() == lower)
        }
    }
}

/// Interpret opaque text as structured data: JSON first, then XML.
///
/// Returns `None` when the text is neither, or when it is a bare JSON string
/// (nothing to navigate into).
pub fn interpret(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::String(_)) => None,
        Ok(value) => Some(value),
        Err(_) => xml_to_value(text),
    }
}

/// Resolve a key path within a raw field value.
///
/// An empty path returns the raw value unchanged. `None` means absent, which
/// is distinct from `Some(Value::Null)`.
pub fn resolve<'a>(raw: &'a Value, path: &[&str], key_match: KeyMatch) -> Option<Cow<'a, Value>> {
    if path.is_empty() {
        return Some(Cow::Borrowed(raw));
    }
    match raw {
        Value::String(text) => {
            let parsed = interpret(text)?;
            navigate(&parsed, path, key_match).map(|v| Cow::Owned(v.clone()))
        }
        other => navigate(other, path, key_match).map(Cow::Borrowed),
    }
}

fn navigate<'a>(value: &'a Value, path: &[&str], key_match: KeyMatch) -> Option<&'a Value> {
    let Some((head, rest)) = path.split_first() else {
        return Some(value);
    };
    match value {
        Value::Object(map) => navigate(lookup_key(map, head, key_match)?, rest, key_match),
        Value::Array(items) => items
            .iter()
            .find_map(|item| navigate(item, path, key_match)),
        _ => None,
    }
}

/// Per-resolution cache of structured interpretations, keyed by field name.
#[derive(Debug, Default)]
pub struct InterpretationCache {
    parsed: Mutex<HashMap<String, Option<Arc<Value>>>>,
}

impl InterpretationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Structured interpretation of a string field, computed at most once.
    pub fn interpret(&self, field: &str, raw: &str) -> Option<Arc<Value>> {
        if let Some(hit) = self.parsed.lock().get(field) {
            return hit.clone();
        }
        let parsed = interpret(raw).map(Arc::new);
        if parsed.is_none() {
            debug!(field, "field is neither JSON nor XML, treating as opaque text");
        }
        self.parsed
            .lock()
            .insert(field.to_string(), parsed.clone());
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flat_reference_returns_raw_value() {
        let raw = json!(r#"{"key": "value"}"#);
        assert_eq!(
            resolve(&raw, &[], KeyMatch::Folded).as_deref(),
            Some(&raw)
        );
    }

    #[test]
    fn test_json_string_is_navigated() {
        let raw = json!(r#"{"Outer": {"inner": 5}}"#);
        assert_eq!(
            resolve(&raw, &["outer", "INNER"], KeyMatch::Folded).as_deref(),
            Some(&json!(5))
        );
        assert!(resolve(&raw, &["outer", "INNER"], KeyMatch::Exact).is_none());
    }

    #[test]
    fn test_xml_string_is_navigated() {
        let raw = json!("<user><name>ann</name></user>");
        assert_eq!(
            resolve(&raw, &["user", "name"], KeyMatch::Folded).as_deref(),
            Some(&json!("ann"))
        );
    }

    #[test]
    fn test_opaque_text_cannot_be_navigated() {
        let raw = json!("hello world");
        assert!(resolve(&raw, &["hello"], KeyMatch::Folded).is_none());
    }

    #[test]
    fn test_arrays_are_searched_element_wise() {
        let raw = json!({"items": [{"id": 1}, {"id": 2, "name": "b"}]});
        assert_eq!(
            resolve(&raw, &["items", "name"], KeyMatch::Folded).as_deref(),
            Some(&json!("b"))
        );
    }

    #[test]
    fn test_null_is_distinct_from_absent() {
        let raw = json!({"key": null});
        assert_eq!(
            resolve(&raw, &["key"], KeyMatch::Folded).as_deref(),
            Some(&Value::Null)
        );
        assert!(resolve(&raw, &["other"], KeyMatch::Folded).is_none());
    }

    #[test]
    fn test_folded_lookup_takes_first_matching_key() {
        let raw = json!({"Key": 1, "key": 2});
        let map = raw.as_object().unwrap();
        assert_eq!(lookup_key(map, "key", KeyMatch::Folded), Some(&json!(1)));
        assert_eq!(
            lookup_entry(map, "KEY", KeyMatch::Folded).map(|(k, _)| k.as_str()),
            Some("Key")
        );
        assert_eq!(lookup_key(map, "key", KeyMatch::Exact), Some(&json!(2)));
        assert_eq!(lookup_key(map, "KEY", KeyMatch::Exact), None);
    }

    #[test]
    fn test_cache_interprets_once() {
        let cache = InterpretationCache::new();
        let first = cache.interpret("body", r#"{"a": 1}"#).unwrap();
        // Cached by field name: a different raw value for the same field is ignored.
        let second = cache.interpret("body", "not json").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(cache.interpret("other", "plain").is_none());
    }
}
