//! Mountebank-compatible predicate system for request matching.
//!
//! Supports every Mountebank leaf operator (equals, deepEquals, contains,
//! startsWith, endsWith, matches, exists), the logical operators (and, or,
//! not), script-backed inject predicates, and the predicate parameters
//! (caseSensitive, keyCaseSensitive, except, jsonpath, xpath).
//!
//! # Module Structure
//!
//! - `definition` - Authored predicate shape, (de)serialized through JSON
//! - `options` - Predicate parameters and their compiled form
//! - `field_value` - Field lookup, key policy, lazy JSON/XML interpretation
//! - `xml` - XML to JSON conversion and XPath selection
//! - `string_matcher` - Scalar comparison, except stripping, case folding
//! - `evaluator` - Leaf compilation and evaluation
//! - `deep_equals` - Structural equality with multiset arrays
//! - `logical` - and / or / not / inject and the per-stub `PredicateTree`
//! - `inject` - Script injector capability and the Rhai implementation

mod deep_equals;
mod definition;
mod evaluator;
mod field_value;
mod inject;
mod logical;
mod options;
mod string_matcher;
mod xml;

pub use definition::{Operator, Predicate};
pub use evaluator::{CompiledLeaf, EvaluationScope};
pub use field_value::{interpret, lookup_entry, lookup_key, resolve, InterpretationCache, KeyMatch};
pub use inject::{InjectError, InjectedPredicate, PredicateInjector, RhaiPredicateInjector};
pub use logical::{CompiledPredicate, PredicateTree};
pub use options::{JsonPathSelector, PredicateOptions, XPathSelector};
pub use xml::{xml_to_value, CompiledXPath};
