//! Logical composition of predicates: and, or, not, inject.

use super::definition::Predicate;
use super::evaluator::{CompiledLeaf, EvaluationScope};
use super::inject::{InjectedPredicate, PredicateInjector};
use crate::error::ConfigError;
use std::sync::Arc;
use tracing::{debug, warn};

/// Compiled predicate for efficient runtime evaluation.
#[derive(Debug, Clone)]
pub enum CompiledPredicate {
    Leaf(CompiledLeaf),
    And(Vec<CompiledPredicate>),
    Or(Vec<CompiledPredicate>),
    Not(Box<CompiledPredicate>),
    Inject(Arc<dyn InjectedPredicate>),
}

impl CompiledPredicate {
    pub fn compile(
        predicate: &Predicate,
        injector: Option<&dyn PredicateInjector>,
    ) -> Result<Self, ConfigError> {
        match predicate {
            Predicate::Leaf {
                operator,
                fields,
                options,
            } => Ok(CompiledPredicate::Leaf(CompiledLeaf::compile(
                *operator, fields, options,
            )?)),
            Predicate::And(children) => Ok(CompiledPredicate::And(compile_all(children, injector)?)),
            Predicate::Or(children) => Ok(CompiledPredicate::Or(compile_all(children, injector)?)),
            Predicate::Not(child) => Ok(CompiledPredicate::Not(Box::new(Self::compile(
                child, injector,
            )?))),
            Predicate::Inject(source) => {
                let injector = injector.ok_or(ConfigError::InjectionDisabled)?;
                Ok(CompiledPredicate::Inject(injector.prepare(source)?))
            }
        }
    }

    /// Short-circuits in authored order.
    pub fn evaluate(&self, scope: &EvaluationScope<'_>) -> bool {
        match self {
            CompiledPredicate::Leaf(leaf) => leaf.evaluate(scope),
            CompiledPredicate::And(children) => children.iter().all(|c| c.evaluate(scope)),
            CompiledPredicate::Or(children) => children.iter().any(|c| c.evaluate(scope)),
            CompiledPredicate::Not(child) => !child.evaluate(scope),
            CompiledPredicate::Inject(script) => match script.evaluate(scope.request) {
                Ok(result) => {
                    debug!(matched = result, "inject predicate evaluated");
                    result
                }
                Err(e) => {
                    warn!(error = %e, "inject predicate failed, treating as no match");
                    false
                }
            },
        }
    }
}

fn compile_all(
    children: &[Predicate],
    injector: Option<&dyn PredicateInjector>,
) -> Result<Vec<CompiledPredicate>, ConfigError> {
    children
        .iter()
        .map(|child| CompiledPredicate::compile(child, injector))
        .collect()
}

/// A stub's predicates: an implicit AND. An empty tree matches everything.
#[derive(Debug, Clone, Default)]
pub struct PredicateTree {
    predicates: Vec<CompiledPredicate>,
}

impl PredicateTree {
    pub fn compile(
        predicates: &[Predicate],
        injector: Option<&dyn PredicateInjector>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            predicates: compile_all(predicates, injector)?,
        })
    }

    pub fn evaluate(&self, scope: &EvaluationScope<'_>) -> bool {
        self.predicates.iter().all(|p| p.evaluate(scope))
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::inject::RhaiPredicateInjector;
    use crate::request::CanonicalRequest;
    use serde_json::{json, Value};

    fn tree(predicates: Value) -> PredicateTree {
        let predicates: Vec<Predicate> = serde_json::from_value(predicates).unwrap();
        let injector = RhaiPredicateInjector::new();
        PredicateTree::compile(&predicates, Some(&injector)).unwrap()
    }

    fn get_users() -> CanonicalRequest {
        CanonicalRequest::http("GET", "/users").build()
    }

    #[test]
    fn test_empty_tree_matches_everything() {
        let tree = tree(json!([]));
        assert!(tree.is_empty());
        assert!(tree.evaluate(&EvaluationScope::new(&get_users())));
    }

    #[test]
    fn test_implicit_and() {
        let request = get_users();
        let scope = EvaluationScope::new(&request);
        assert!(tree(json!([
            {"equals": {"method": "GET"}},
            {"startsWith": {"path": "/us"}}
        ]))
        .evaluate(&scope));
        assert!(!tree(json!([
            {"equals": {"method": "GET"}},
            {"equals": {"path": "/orders"}}
        ]))
        .evaluate(&scope));
    }

    #[test]
    fn test_or_and_not() {
        let request = get_users();
        let scope = EvaluationScope::new(&request);
        assert!(tree(json!([{"or": [
            {"equals": {"method": "POST"}},
            {"equals": {"path": "/users"}}
        ]}]))
        .evaluate(&scope));
        assert!(tree(json!([{"not": {"equals": {"method": "POST"}}}])).evaluate(&scope));
        assert!(!tree(json!([{"and": [
            {"equals": {"method": "GET"}},
            {"not": {"exists": {"path": true}}}
        ]}]))
        .evaluate(&scope));
    }

    #[test]
    fn test_inject_uses_injector() {
        let request = get_users();
        let scope = EvaluationScope::new(&request);
        assert!(tree(json!([{"inject": "request.path == \"/users\""}])).evaluate(&scope));
        assert!(!tree(json!([{"inject": "request.path == \"/orders\""}])).evaluate(&scope));
    }

    #[test]
    fn test_failing_inject_is_false() {
        let request = get_users();
        let scope = EvaluationScope::new(&request);
        assert!(!tree(json!([{"inject": "no_such_function(request)"}])).evaluate(&scope));
        assert!(tree(json!([{"not": {"inject": "42"}}])).evaluate(&scope));
    }

    #[test]
    fn test_inject_without_injector_is_rejected() {
        let predicates: Vec<Predicate> =
            serde_json::from_value(json!([{"inject": "true"}])).unwrap();
        let err = PredicateTree::compile(&predicates, None).unwrap_err();
        assert!(matches!(err, ConfigError::InjectionDisabled));
    }
}
