//! Predicate definitions as authored in imposter configuration.
//!
//! A predicate is a JSON object with exactly one operator key. Leaf operators
//! take a field specification plus optional parameters:
//!
//! ```json
//! { "equals": { "path": "/users", "query": { "id": "1" } }, "caseSensitive": true }
//! ```
//!
//! Composite operators nest other predicates:
//!
//! ```json
//! { "or": [ { "equals": { "method": "GET" } }, { "not": { "exists": { "body": true } } } ] }
//! ```

use super::options::PredicateOptions;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Leaf comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    Equals,
    DeepEquals,
    Contains,
    StartsWith,
    EndsWith,
    Matches,
    Exists,
}

impl Operator {
    pub const ALL: [Operator; 7] = [
        Operator::Equals,
        Operator::DeepEquals,
        Operator::Contains,
        Operator::StartsWith,
        Operator::EndsWith,
        Operator::Matches,
        Operator::Exists,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::DeepEquals => "deepEquals",
            Operator::Contains => "contains",
            Operator::StartsWith => "startsWith",
            Operator::EndsWith => "endsWith",
            Operator::Matches => "matches",
            Operator::Exists => "exists",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == key)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const OPTION_KEYS: [&str; 5] = ["caseSensitive", "keyCaseSensitive", "except", "jsonpath", "xpath"];

/// One authored predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Predicate {
    Leaf {
        operator: Operator,
        fields: Map<String, Value>,
        options: PredicateOptions,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Inject(String),
}

impl Predicate {
    /// Convenience constructor for a leaf with default options.
    pub fn leaf(operator: Operator, fields: Value) -> Result<Self, ConfigError> {
        match fields {
            Value::Object(fields) => Ok(Predicate::Leaf {
                operator,
                fields,
                options: PredicateOptions::default(),
            }),
            other => Err(ConfigError::InvalidPredicate(format!(
                "{operator} expects an object of fields, got {other}"
            ))),
        }
    }

    pub fn from_json(value: &Value) -> Result<Self, ConfigError> {
        Self::try_from(value.clone())
    }

    pub fn to_json(&self) -> Value {
        Value::from(self.clone())
    }
}

impl TryFrom<Value> for Predicate {
    type Error = ConfigError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let mut object = match value {
            Value::Object(object) => object,
            other => {
                return Err(ConfigError::InvalidPredicate(format!(
                    "predicate must be an object, got {other}"
                )))
            }
        };

        let mut options = Map::new();
        for key in OPTION_KEYS {
            if let Some(option) = object.remove(key) {
                options.insert(key.to_string(), option);
            }
        }

        let mut keys = object.keys();
        let operator = match (keys.next(), keys.next()) {
            (Some(key), None) => key.clone(),
            (None, _) => {
                return Err(ConfigError::InvalidPredicate(
                    "predicate has no operator".to_string(),
                ))
            }
            (Some(first), Some(second)) => {
                return Err(ConfigError::InvalidPredicate(format!(
                    "predicate has more than one operator ({first}, {second})"
                )))
            }
        };
        let body = object.remove(&operator).unwrap_or(Value::Null);

        let composite = matches!(operator.as_str(), "and" | "or" | "not" | "inject");
        if composite && !options.is_empty() {
            return Err(ConfigError::InvalidPredicate(format!(
                "{operator} does not accept predicate parameters"
            )));
        }

        match operator.as_str() {
            "and" | "or" => {
                let Value::Array(items) = body else {
                    return Err(ConfigError::InvalidPredicate(format!(
                        "{operator} expects an array of predicates"
                    )));
                };
                let children = items
                    .into_iter()
                    .map(Predicate::try_from)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(if operator == "and" {
                    Predicate::And(children)
                } else {
                    Predicate::Or(children)
                })
            }
            "not" => Ok(Predicate::Not(Box::new(Predicate::try_from(body)?))),
            "inject" => match body {
                Value::String(source) => Ok(Predicate::Inject(source)),
                other => Err(ConfigError::InvalidInject(format!(
                    "inject expects a script string, got {other}"
                ))),
            },
            key => {
                let operator = Operator::from_key(key)
                    .ok_or_else(|| ConfigError::UnknownOperator(key.to_string()))?;
                let Value::Object(fields) = body else {
                    return Err(ConfigError::InvalidPredicate(format!(
                        "{operator} expects an object of fields"
                    )));
                };
                let options: PredicateOptions = serde_json::from_value(Value::Object(options))
                    .map_err(|e| ConfigError::InvalidPredicate(e.to_string()))?;
                Ok(Predicate::Leaf {
                    operator,
                    fields,
                    options,
                })
            }
        }
    }
}

impl From<Predicate> for Value {
    fn from(predicate: Predicate) -> Self {
        let mut object = Map::new();
        match predicate {
            Predicate::Leaf {
                operator,
                fields,
                options,
            } => {
                object.insert(operator.as_str().to_string(), Value::Object(fields));
                if let Ok(Value::Object(options)) = serde_json::to_value(options) {
                    object.extend(options);
                }
            }
            Predicate::And(children) => {
                object.insert(
                    "and".to_string(),
                    Value::Array(children.into_iter().map(Value::from).collect()),
                );
            }
            Predicate::Or(children) => {
                object.insert(
                    "or".to_string(),
                    Value::Array(children.into_iter().map(Value::from).collect()),
                );
            }
            Predicate::Not(child) => {
                object.insert("not".to_string(), Value::from(*child));
            }
            Predicate::Inject(source) => {
                object.insert("inject".to_string(), Value::String(source));
            }
        }
        Value::Object(object)
    }
}
