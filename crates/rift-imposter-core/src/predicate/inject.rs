//! Inject predicates: user-supplied scripts deciding whether a request matches.
//!
//! Script execution is a capability handed to the stub store at construction.
//! Stores built without an injector reject inject predicates up front.

use crate::error::ConfigError;
use crate::request::CanonicalRequest;
use rhai::{Dynamic, Engine, Map, Scope, AST};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Failure while running a prepared script.
#[derive(Debug, thiserror::Error)]
pub enum InjectError {
    #[error("Script execution error: {0}")]
    Execution(String),
    #[error("Inject predicate must return a boolean, got {0}")]
    NotBoolean(String),
}

/// Compiles inject sources into runnable predicates.
pub trait PredicateInjector: Send + Sync + fmt::Debug {
    fn prepare(&self, source: &str) -> Result<Arc<dyn InjectedPredicate>, ConfigError>;
}

/// A compiled inject script.
pub trait InjectedPredicate: Send + Sync + fmt::Debug {
    fn evaluate(&self, request: &CanonicalRequest) -> Result<bool, InjectError>;
}

/// Rhai-backed injector. The script sees the canonical request as the map
/// `request` and must evaluate to a bool:
///
/// ```rhai
/// request.method == "POST" && request.body.len() > 0
/// ```
#[derive(Clone)]
pub struct RhaiPredicateInjector {
    engine: Arc<Engine>,
}

impl fmt::Debug for RhaiPredicateInjector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RhaiPredicateInjector").finish_non_exhaustive()
    }
}

impl RhaiPredicateInjector {
    pub fn new() -> Self {
        let mut engine = Engine::new();
        engine.set_max_operations(100_000);
        Self {
            engine: Arc::new(engine),
        }
    }
}

impl Default for RhaiPredicateInjector {
    fn default() -> Self {
        Self::new()
    }
}

impl PredicateInjector for RhaiPredicateInjector {
    fn prepare(&self, source: &str) -> Result<Arc<dyn InjectedPredicate>, ConfigError> {
        let ast = self
            .engine
            .compile(source)
            .map_err(|e| ConfigError::InvalidInject(format!("Failed to compile script: {e}")))?;
        Ok(Arc::new(RhaiPredicate {
            engine: Arc::clone(&self.engine),
            ast: Arc::new(ast),
        }))
    }
}

struct RhaiPredicate {
    engine: Arc<Engine>,
    ast: Arc<AST>,
}

impl fmt::Debug for RhaiPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RhaiPredicate").finish_non_exhaustive()
    }
}

impl InjectedPredicate for RhaiPredicate {
    fn evaluate(&self, request: &CanonicalRequest) -> Result<bool, InjectError> {
        let mut scope = Scope::new();
        scope.push("request", json_to_dynamic(request.to_value()));

        let result: Dynamic = self
            .engine
            .eval_ast_with_scope(&mut scope, &self.ast)
            .map_err(|e| InjectError::Execution(e.to_string()))?;

        result
            .as_bool()
            .map_err(|type_name| InjectError::NotBoolean(type_name.to_string()))
    }
}

fn json_to_dynamic(value: Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else if let Some(f) = n.as_f64() {
                Dynamic::from(f)
            } else {
                Dynamic::UNIT
            }
        }
        Value::String(s) => Dynamic::from(s),
        Value::Array(arr) => {
            let items: Vec<Dynamic> = arr.into_iter().map(json_to_dynamic).collect();
            Dynamic::from(items)
        }
        Value::Object(obj) => {
            let mut map = Map::new();
            for (k, v) in obj {
                map.insert(k.into(), json_to_dynamic(v));
            }
            Dynamic::from(map)
        }
    }
}
