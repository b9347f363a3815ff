//! Scalar comparison primitives shared by every leaf operator.
//!
//! Values are stringified before comparison, `except` is stripped, then both
//! sides are lower-cased unless the predicate is case sensitive. Expected
//! values are normalized once at construction and cached.

use regex::{Regex, RegexBuilder};
use serde_json::Value;
use std::borrow::Cow;
use std::sync::Arc;

/// Substring relation used by equals, contains, startsWith and endsWith.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextRelation {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
}

impl TextRelation {
    #[inline]
    pub fn holds(self, actual: &str, expected: &str) -> bool {
        match self {
            TextRelation::Equals => actual == expected,
            TextRelation::Contains => actual.contains(expected),
            TextRelation::StartsWith => actual.starts_with(expected),
            TextRelation::EndsWith => actual.ends_with(expected),
        }
    }
}

/// Compiled except regex for stripping patterns before matching.
#[derive(Debug, Clone)]
pub struct CompiledExcept {
    pub regex: Arc<Regex>,
}

impl CompiledExcept {
    /// Compile an except pattern; it ignores case unless the predicate is case sensitive.
    pub fn compile(pattern: &str, case_sensitive: bool) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(!case_sensitive)
            .build()?;
        Ok(CompiledExcept {
            regex: Arc::new(regex),
        })
    }

    /// Remove every match of the except pattern from the value.
    pub fn apply<'a>(&self, value: &'a str) -> Cow<'a, str> {
        self.regex.replace_all(value, "")
    }
}

/// Except + case folding, applied identically to both sides of a comparison.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer<'a> {
    pub case_sensitive: bool,
    pub except: Option<&'a CompiledExcept>,
}

impl Normalizer<'_> {
    /// Normalized text for equals-family operators.
    pub fn text<'v>(&self, value: &'v str) -> Cow<'v, str> {
        let stripped = self.strip(value);
        if self.case_sensitive {
            stripped
        } else {
            Cow::Owned(stripped.to_lowercase())
        }
    }

    /// Only the except pass; `matches` never folds case.
    pub fn strip<'v>(&self, value: &'v str) -> Cow<'v, str> {
        match self.except {
            Some(except) => except.apply(value),
            None => Cow::Borrowed(value),
        }
    }
}

/// Compile a `matches` pattern. Case-insensitive matching is a regex flag so
/// escapes like `\W` keep their meaning.
pub fn compile_pattern(pattern: &str, case_sensitive: bool) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .case_insensitive(!case_sensitive)
        .build()
}

/// Text form of a scalar JSON value. Structured values render as compact JSON.
pub fn stringify(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s.as_str()),
        Value::Null => Cow::Borrowed("null"),
        Value::Bool(b) => Cow::Borrowed(if *b { "true" } else { "false" }),
        Value::Number(n) => Cow::Owned(n.to_string()),
        other => Cow::Owned(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_relations() {
        assert!(TextRelation::Equals.holds("test", "test"));
        assert!(!TextRelation::Equals.holds("test", "tes"));
        assert!(TextRelation::Contains.holds("/api/v1", "api"));
        assert!(TextRelation::StartsWith.holds("/api/v1", "/api"));
        assert!(!TextRelation::StartsWith.holds("other/api", "/api"));
        assert!(TextRelation::EndsWith.holds("/data.json", ".json"));
        assert!(!TextRelation::EndsWith.holds("/data.xml", ".json"));
    }

    #[test]
    fn test_except_ignores_case_by_default() {
        let except = CompiledExcept::compile("alu", false).unwrap();
        assert_eq!(except.apply("VALUE"), "VE");

        let except = CompiledExcept::compile("alu", true).unwrap();
        assert_eq!(except.apply("VALUE"), "VALUE");
    }

    #[test]
    fn test_normalizer_folds_after_stripping() {
        let except = CompiledExcept::compile(r"\d+", false).unwrap();
        let normalizer = Normalizer {
            case_sensitive: false,
            except: Some(&except),
        };
        assert_eq!(normalizer.text("Order-123"), "order-");
        assert_eq!(normalizer.strip("Order-123"), "Order-");

        let exact = Normalizer {
            case_sensitive: true,
            except: None,
        };
        assert_eq!(exact.text("Order"), "Order");
    }

    #[test]
    fn test_pattern_case_insensitive_flag_keeps_escapes() {
        let regex = compile_pattern(r"^\W+ABC$", false).unwrap();
        assert!(regex.is_match("--abc"));
        let regex = compile_pattern(r"^ABC$", true).unwrap();
        assert!(!regex.is_match("abc"));
    }

    #[test]
    fn test_stringify_scalars() {
        assert_eq!(stringify(&json!("x")), "x");
        assert_eq!(stringify(&json!(42)), "42");
        assert_eq!(stringify(&json!(true)), "true");
        assert_eq!(stringify(&json!(null)), "null");
        assert_eq!(stringify(&json!({"a": 1})), r#"{"a":1}"#);
    }
}
