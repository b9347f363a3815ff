//! Leaf predicate evaluation.
//!
//! A leaf is compiled once: expected scalars are stringified, stripped and
//! case-folded, `matches` patterns become regexes. Evaluation then walks the
//! expected structure against the request field, treating the expected value
//! as a key-path template.

use super::deep_equals::deep_equal;
use super::definition::Operator;
use super::field_value::{interpret, lookup_key, InterpretationCache, KeyMatch};
use super::options::{CompiledOptions, CompiledSelector, PredicateOptions};
use super::string_matcher::{compile_pattern, stringify, Normalizer, TextRelation};
use crate::error::ConfigError;
use crate::request::CanonicalRequest;
use regex::Regex;
use serde_json::{Map, Value};
use serde_json_path::JsonPath;
use std::sync::Arc;
use tracing::debug;

/// Everything predicates may look at during one resolution.
#[derive(Debug)]
pub struct EvaluationScope<'a> {
    pub request: &'a CanonicalRequest,
    pub cache: InterpretationCache,
}

impl<'a> EvaluationScope<'a> {
    pub fn new(request: &'a CanonicalRequest) -> Self {
        Self {
            request,
            cache: InterpretationCache::new(),
        }
    }
}

/// Compiled expected scalar.
#[derive(Debug, Clone)]
pub enum ExpectedScalar {
    /// Stripped and, unless case sensitive, lower-cased text
    Text(String),
    Pattern(Arc<Regex>),
    Flag(bool),
}

/// Compiled expected value, mirroring the authored JSON shape.
#[derive(Debug, Clone)]
pub enum Expected {
    Scalar(ExpectedScalar),
    Array(Vec<Expected>),
    Object(Vec<(String, Expected)>),
}

impl Expected {
    pub fn is_structured(&self) -> bool {
        !matches!(self, Expected::Scalar(_))
    }
}

/// Scalar comparison settings shared by the structural walks.
#[derive(Debug, Clone, Copy)]
pub struct Comparison<'a> {
    pub relation: TextRelation,
    pub normalizer: Normalizer<'a>,
    pub key_match: KeyMatch,
}

impl Comparison<'_> {
    pub fn scalar(&self, expected: &ExpectedScalar, actual: &Value) -> bool {
        let text = stringify(actual);
        match expected {
            ExpectedScalar::Text(expected) => {
                self.relation.holds(&self.normalizer.text(&text), expected)
            }
            ExpectedScalar::Pattern(regex) => regex.is_match(&self.normalizer.strip(&text)),
            ExpectedScalar::Flag(_) => false,
        }
    }
}

/// A compiled leaf predicate: `{ operator: { field: expected, ... }, options }`.
#[derive(Debug, Clone)]
pub struct CompiledLeaf {
    operator: Operator,
    fields: Vec<(String, Expected)>,
    options: CompiledOptions,
}

impl CompiledLeaf {
    pub fn compile(
        operator: Operator,
        fields: &Map<String, Value>,
        options: &PredicateOptions,
    ) -> Result<Self, ConfigError> {
        let options = options.compile()?;
        let fields = fields
            .iter()
            .map(|(name, value)| Ok((name.clone(), compile_expected(value, operator, &options)?)))
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self {
            operator,
            fields,
            options,
        })
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    /// True when every named field satisfies the operator.
    pub fn evaluate(&self, scope: &EvaluationScope<'_>) -> bool {
        self.fields.iter().all(|(name, expected)| {
            let matched = self.evaluate_field(name, expected, scope);
            debug!(
                operator = %self.operator,
                field = %name,
                matched,
                "predicate field evaluated"
            );
            matched
        })
    }

    fn comparison(&self) -> Comparison<'_> {
        Comparison {
            relation: match self.operator {
                Operator::Contains => TextRelation::Contains,
                Operator::StartsWith => TextRelation::StartsWith,
                Operator::EndsWith => TextRelation::EndsWith,
                _ => TextRelation::Equals,
            },
            normalizer: Normalizer {
                case_sensitive: self.options.case_sensitive,
                except: self.options.except.as_ref(),
            },
            key_match: self.options.key_match,
        }
    }

    fn evaluate_field(&self, name: &str, expected: &Expected, scope: &EvaluationScope<'_>) -> bool {
        let raw = lookup_key(scope.request.fields(), name, self.options.key_match);

        let selected;
        let interpreted;
        let actual: Option<&Value> = match (&self.options.selector, raw) {
            (Some(selector), Some(value)) => {
                selected = select(selector, name, value, scope);
                selected.as_ref()
            }
            (None, Some(Value::String(text))) if expected.is_structured() => {
                interpreted = scope.cache.interpret(name, text);
                interpreted.as_deref().or(raw)
            }
            _ => raw,
        };

        let cmp = self.comparison();
        match self.operator {
            Operator::Exists => exists(expected, actual, cmp.key_match),
            Operator::DeepEquals => actual.is_some_and(|value| deep_equal(expected, value, &cmp)),
            _ => actual.is_some_and(|value| satisfies(expected, value, &cmp)),
        }
    }
}

fn select(
    selector: &CompiledSelector,
    name: &str,
    value: &Value,
    scope: &EvaluationScope<'_>,
) -> Option<Value> {
    match (selector, value) {
        (CompiledSelector::JsonPath(path), Value::String(text)) => {
            let document = scope.cache.interpret(name, text)?;
            query_json(path, &document)
        }
        // Protocols with structured fields skip interpretation
        (CompiledSelector::JsonPath(path), structured) => query_json(path, structured),
        (CompiledSelector::XPath(xpath), Value::String(text)) => xpath.select(text),
        (CompiledSelector::XPath(_), _) => None,
    }
}

fn query_json(path: &JsonPath, document: &Value) -> Option<Value> {
    let mut nodes: Vec<Value> = path.query(document).all().into_iter().cloned().collect();
    match nodes.len() {
        0 => None,
        1 => nodes.pop(),
        _ => Some(Value::Array(nodes)),
    }
}

fn compile_expected(
    value: &Value,
    operator: Operator,
    options: &CompiledOptions,
) -> Result<Expected, ConfigError> {
    match value {
        Value::Object(map) => Ok(Expected::Object(
            map.iter()
                .map(|(key, child)| Ok((key.clone(), compile_expected(child, operator, options)?)))
                .collect::<Result<Vec<_>, ConfigError>>()?,
        )),
        Value::Array(_) if operator == Operator::Exists => Err(ConfigError::InvalidPredicate(
            "exists expects true/false or an object of them".to_string(),
        )),
        Value::Array(items) => Ok(Expected::Array(
            items
                .iter()
                .map(|child| compile_expected(child, operator, options))
                .collect::<Result<Vec<_>, _>>()?,
        )),
        scalar => match operator {
            Operator::Exists => match scalar {
                Value::Bool(flag) => Ok(Expected::Scalar(ExpectedScalar::Flag(*flag))),
                other => Err(ConfigError::InvalidPredicate(format!(
                    "exists expects true or false, got {other}"
                ))),
            },
            Operator::Matches => {
                let pattern = stringify(scalar);
                let regex = compile_pattern(&pattern, options.case_sensitive).map_err(|source| {
                    ConfigError::InvalidRegex {
                        pattern: pattern.to_string(),
                        source,
                    }
                })?;
                Ok(Expected::Scalar(ExpectedScalar::Pattern(Arc::new(regex))))
            }
            _ => {
                let normalizer = Normalizer {
                    case_sensitive: options.case_sensitive,
                    except: options.except.as_ref(),
                };
                let text = normalizer.text(&stringify(scalar)).into_owned();
                Ok(Expected::Scalar(ExpectedScalar::Text(text)))
            }
        },
    }
}

/// equals / contains / startsWith / endsWith / matches over a resolved value.
pub fn satisfies(expected: &Expected, actual: &Value, cmp: &Comparison<'_>) -> bool {
    match expected {
        Expected::Scalar(scalar) => match actual {
            Value::Array(items) => items.iter().any(|item| satisfies(expected, item, cmp)),
            Value::Object(_) => false,
            value => cmp.scalar(scalar, value),
        },
        Expected::Object(entries) => match actual {
            Value::Object(map) => entries.iter().all(|(key, child)| {
                lookup_key(map, key, cmp.key_match).is_some_and(|value| satisfies(child, value, cmp))
            }),
            Value::Array(items) => items.iter().any(|item| satisfies(expected, item, cmp)),
            Value::String(text) => with_interpreted(text, |parsed| satisfies(expected, parsed, cmp)),
            _ => false,
        },
        Expected::Array(children) => match actual {
            Value::Array(items) => children
                .iter()
                .all(|child| items.iter().any(|item| satisfies(child, item, cmp))),
            Value::String(text) => with_interpreted(text, |parsed| satisfies(expected, parsed, cmp)),
            _ => false,
        },
    }
}

/// exists over a possibly absent value.
pub fn exists(expected: &Expected, actual: Option<&Value>, key_match: KeyMatch) -> bool {
    match expected {
        Expected::Scalar(ExpectedScalar::Flag(should_exist)) => {
            let does_exist = match actual {
                None => false,
                Some(Value::String(text)) => !text.is_empty(),
                Some(_) => true,
            };
            *should_exist == does_exist
        }
        Expected::Object(entries) => match actual {
            Some(Value::Object(map)) => entries
                .iter()
                .all(|(key, child)| exists(child, lookup_key(map, key, key_match), key_match)),
            Some(Value::Array(items)) if !items.is_empty() => items
                .iter()
                .any(|item| exists(expected, Some(item), key_match)),
            Some(Value::String(text)) => match interpret(text) {
                Some(parsed) => exists(expected, Some(&parsed), key_match),
                None => all_absent(entries, key_match),
            },
            _ => all_absent(entries, key_match),
        },
        _ => false,
    }
}

fn all_absent(entries: &[(String, Expected)], key_match: KeyMatch) -> bool {
    entries
        .iter()
        .all(|(_, child)| exists(child, None, key_match))
}

/// Run `f` against the structured interpretation of nested text, if any.
pub(super) fn with_interpreted(text: &str, f: impl FnOnce(&Value) -> bool) -> bool {
    match interpret(text) {
        Some(parsed) => f(&parsed),
        None => {
            debug!("structured predicate over opaque text does not match");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn leaf(operator: Operator, fields: Value) -> CompiledLeaf {
        leaf_with(operator, fields, json!({}))
    }

    fn leaf_with(operator: Operator, fields: Value, options: Value) -> CompiledLeaf {
        let options: PredicateOptions = serde_json::from_value(options).unwrap();
        CompiledLeaf::compile(operator, fields.as_object().unwrap(), &options).unwrap()
    }

    fn holds(leaf: &CompiledLeaf, request: &CanonicalRequest) -> bool {
        leaf.evaluate(&EvaluationScope::new(request))
    }

    fn body(text: &str) -> CanonicalRequest {
        CanonicalRequest::new().with_field("body", text)
    }

    #[test]
    fn test_equals_is_case_insensitive_by_default() {
        let request = CanonicalRequest::http("GET", "/Users").build();
        assert!(holds(&leaf(Operator::Equals, json!({"path": "/users"})), &request));
        assert!(!holds(
            &leaf_with(
                Operator::Equals,
                json!({"path": "/users"}),
                json!({"caseSensitive": true})
            ),
            &request
        ));
    }

    #[test]
    fn test_equals_on_query_ignores_extra_keys() {
        let request = CanonicalRequest::http("GET", "/").query("a=1&b=2").build();
        assert!(holds(&leaf(Operator::Equals, json!({"query": {"A": "1"}})), &request));
        assert!(!holds(&leaf(Operator::Equals, json!({"query": {"c": "3"}})), &request));
    }

    #[test]
    fn test_equals_array_any_element() {
        let request = CanonicalRequest::http("GET", "/").query("key=first&key=second").build();
        assert!(holds(&leaf(Operator::Equals, json!({"query": {"key": "second"}})), &request));
        assert!(holds(
            &leaf(Operator::Equals, json!({"query": {"key": ["second", "first"]}})),
            &request
        ));
        assert!(!holds(
            &leaf(Operator::Equals, json!({"query": {"key": ["third"]}})),
            &request
        ));
    }

    #[test]
    fn test_equals_json_body_field() {
        let request = body(r#"{"field": "VALUE", "items": [{"id": 1}, {"id": 2}]}"#);
        assert!(holds(&leaf(Operator::Equals, json!({"body": {"field": "value"}})), &request));
        assert!(holds(&leaf(Operator::Equals, json!({"body": {"items": {"id": 2}}})), &request));
        assert!(!holds(&leaf(Operator::Equals, json!({"body": {"items": {"id": 3}}})), &request));
    }

    #[test]
    fn test_equals_json_null() {
        let request = body(r#"{"field": null}"#);
        assert!(holds(&leaf(Operator::Equals, json!({"body": {"field": null}})), &request));
    }

    #[test]
    fn test_structured_predicate_on_text_body_is_false() {
        let request = body("just text");
        assert!(!holds(&leaf(Operator::Equals, json!({"body": {"field": "x"}})), &request));
    }

    #[test]
    fn test_except_strips_before_comparison() {
        let request = body(r#"{"field": "VALUE"}"#);
        let predicate = leaf_with(
            Operator::Equals,
            json!({"body": {"field": "VE"}}),
            json!({"caseSensitive": true, "except": "ALU"}),
        );
        assert!(holds(&predicate, &request));
    }

    #[test]
    fn test_contains_starts_ends() {
        let request = CanonicalRequest::http("GET", "/api/v1/users.json").build();
        assert!(holds(&leaf(Operator::Contains, json!({"path": "V1"})), &request));
        assert!(holds(&leaf(Operator::StartsWith, json!({"path": "/API"})), &request));
        assert!(holds(&leaf(Operator::EndsWith, json!({"path": ".JSON"})), &request));
        assert!(!holds(&leaf(Operator::EndsWith, json!({"path": ".xml"})), &request));
    }

    #[test]
    fn test_matches_is_case_insensitive_flag_not_lowercased() {
        let request = body("ABC-123");
        assert!(holds(&leaf(Operator::Matches, json!({"body": r"^abc\W\d+$"})), &request));
        assert!(!holds(
            &leaf_with(
                Operator::Matches,
                json!({"body": "^abc"}),
                json!({"caseSensitive": true})
            ),
            &request
        ));
    }

    #[test]
    fn test_matches_invalid_regex_is_config_error() {
        let options = PredicateOptions::default();
        let fields = json!({"body": "(["});
        let err = CompiledLeaf::compile(Operator::Matches, fields.as_object().unwrap(), &options)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRegex { .. }));
    }

    #[test]
    fn test_exists_semantics() {
        assert!(holds(&leaf(Operator::Exists, json!({"body": {"key": true}})), &body(r#"{"key": []}"#)));
        assert!(!holds(&leaf(Operator::Exists, json!({"body": {"key": true}})), &body("{}")));
        assert!(holds(&leaf(Operator::Exists, json!({"body": {"key": false}})), &body("{}")));
        assert!(!holds(&leaf(Operator::Exists, json!({"body": true})), &body("")));
        assert!(holds(&leaf(Operator::Exists, json!({"body": false})), &body("")));
        assert!(holds(&leaf(Operator::Exists, json!({"missing": false})), &body("x")));
        assert!(!holds(&leaf(Operator::Exists, json!({"missing": true})), &body("x")));
    }

    #[test]
    fn test_absent_field_is_false() {
        let request = body("x");
        assert!(!holds(&leaf(Operator::Equals, json!({"missing": ""})), &request));
        assert!(!holds(&leaf(Operator::Matches, json!({"missing": ".*"})), &request));
    }

    #[test]
    fn test_xml_body_navigation() {
        let request = body("<order><id>42</id><line sku=\"A\"/><line sku=\"B\"/></order>");
        assert!(holds(&leaf(Operator::Equals, json!({"body": {"order": {"id": "42"}}})), &request));
        assert!(holds(
            &leaf(Operator::Equals, json!({"body": {"order": {"line": {"@sku": "b"}}}})),
            &request
        ));
    }

    #[test]
    fn test_jsonpath_selector() {
        let request = body(r#"{"books": [{"title": "Dune"}, {"title": "Emma"}]}"#);
        let predicate = leaf_with(
            Operator::Equals,
            json!({"body": "dune"}),
            json!({"jsonpath": {"selector": "$.books[0].title"}}),
        );
        assert!(holds(&predicate, &request));

        let predicate = leaf_with(
            Operator::Equals,
            json!({"body": "emma"}),
            json!({"jsonpath": {"selector": "$.books[*].title"}}),
        );
        assert!(holds(&predicate, &request));

        let predicate = leaf_with(
            Operator::Exists,
            json!({"body": false}),
            json!({"jsonpath": {"selector": "$.magazines"}}),
        );
        assert!(holds(&predicate, &request));
    }

    #[test]
    fn test_jsonpath_over_structured_field() {
        let request = CanonicalRequest::new().with_field(
            "body",
            json!({"books": [{"title": "Dune"}, {"title": "Emma"}]}),
        );
        let predicate = leaf_with(
            Operator::Equals,
            json!({"body": "emma"}),
            json!({"jsonpath": {"selector": "$.books[1].title"}}),
        );
        assert!(holds(&predicate, &request));

        let predicate = leaf_with(
            Operator::Exists,
            json!({"body": false}),
            json!({"jsonpath": {"selector": "$.magazines"}}),
        );
        assert!(holds(&predicate, &request));
    }

    #[test]
    fn test_namespaced_xpath_selector() {
        let request = body(r#"<shelf xmlns:b="urn:books"><b:title>Dune</b:title></shelf>"#);
        let predicate = leaf_with(
            Operator::Equals,
            json!({"body": "dune"}),
            json!({"xpath": {"selector": "//b:title", "ns": {"b": "urn:books"}}}),
        );
        assert!(holds(&predicate, &request));
    }

    #[test]
    fn test_xpath_selector() {
        let request = body("<books><book><title>Dune</title></book></books>");
        let predicate = leaf_with(
            Operator::StartsWith,
            json!({"body": "du"}),
            json!({"xpath": {"selector": "//title"}}),
        );
        assert!(holds(&predicate, &request));
    }
}
