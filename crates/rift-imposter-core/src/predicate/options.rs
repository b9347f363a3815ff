//! Predicate parameters that modify how a leaf operator compares values.

use super::field_value::KeyMatch;
use super::string_matcher::CompiledExcept;
use super::xml::CompiledXPath;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json_path::JsonPath;

/// Options accepted alongside a leaf operator.
///
/// `caseSensitive` defaults to false. `keyCaseSensitive` falls back to
/// `caseSensitive` when omitted.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredicateOptions {
    #[serde(default, skip_serializing_if = "is_false")]
    pub case_sensitive: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_case_sensitive: Option<bool>,

    /// Regex whose matches are removed from values before comparison
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub except: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonpath: Option<JsonPathSelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpath: Option<XPathSelector>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// `{ "selector": "$.store.book[0].title" }`
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct JsonPathSelector {
    pub selector: String,
}

/// `{ "selector": "//book/title", "ns": { "prefix": "uri" } }`
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct XPathSelector {
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ns: Option<serde_json::Map<String, serde_json::Value>>,
}

impl PredicateOptions {
    pub fn key_match(&self) -> KeyMatch {
        KeyMatch::from_case_sensitive(self.key_case_sensitive.unwrap_or(self.case_sensitive))
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    pub fn compile(&self) -> Result<CompiledOptions, ConfigError> {
        let except = if self.except.is_empty() {
            None
        } else {
            Some(CompiledExcept::compile(&self.except, self.case_sensitive).map_err(
                |source| ConfigError::InvalidRegex {
                    pattern: self.except.clone(),
                    source,
                },
            )?)
        };

        let selector = match (&self.jsonpath, &self.xpath) {
            (Some(json), _) => {
                let path = JsonPath::parse(&json.selector).map_err(|e| {
                    ConfigError::InvalidJsonPath {
                        selector: json.selector.clone(),
                        reason: e.to_string(),
                    }
                })?;
                Some(CompiledSelector::JsonPath(path))
            }
            (None, Some(xpath)) => Some(CompiledSelector::XPath(CompiledXPath::compile(
                &xpath.selector,
                xpath.ns.as_ref(),
            )?)),
            (None, None) => None,
        };

        Ok(CompiledOptions {
            case_sensitive: self.case_sensitive,
            key_match: self.key_match(),
            except,
            selector,
        })
    }
}

/// Body selector compiled once at construction.
#[derive(Debug, Clone)]
pub enum CompiledSelector {
    JsonPath(JsonPath),
    XPath(CompiledXPath),
}

/// Runtime form of [`PredicateOptions`].
#[derive(Debug, Clone, Default)]
pub struct CompiledOptions {
    pub case_sensitive: bool,
    pub key_match: KeyMatch,
    pub except: Option<CompiledExcept>,
    pub selector: Option<CompiledSelector>,
}
