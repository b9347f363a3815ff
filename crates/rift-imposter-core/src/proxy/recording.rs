//! Turning a proxied exchange into a recorded stub.
//!
//! Predicate generators pick which request fields the recorded stub matches
//! on. Without generators, every request field except connection metadata
//! and headers is matched with `deepEquals`.

use crate::predicate::{interpret, Operator, Predicate, PredicateOptions};
use crate::request::{fields, CanonicalRequest};
use crate::stub::{LiteralResponse, PredicateGenerator, ResponseSpec, StubDefinition};
use serde_json::{Map, Value};

/// Fields left out of the default generated predicate.
const UNMATCHED_BY_DEFAULT: [&str; 3] = [fields::REQUEST_FROM, fields::IP, fields::HEADERS];

/// Predicates a recorded stub uses to recognise `request` again.
pub fn generate_predicates(
    request: &CanonicalRequest,
    generators: &[PredicateGenerator],
) -> Vec<Predicate> {
    if generators.is_empty() {
        return default_predicates(request);
    }

    generators
        .iter()
        .filter_map(|generator| {
            let selected = select_fields(request.fields(), &generator.matches);
            if selected.is_empty() {
                return None;
            }
            Some(Predicate::Leaf {
                operator: generator.predicate_operator.unwrap_or(Operator::DeepEquals),
                fields: selected,
                options: generator.options.clone(),
            })
        })
        .collect()
}

fn default_predicates(request: &CanonicalRequest) -> Vec<Predicate> {
    let fields: Map<String, Value> = request
        .fields()
        .iter()
        .filter(|(name, _)| !UNMATCHED_BY_DEFAULT.contains(&name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    if fields.is_empty() {
        return Vec::new();
    }
    vec![Predicate::Leaf {
        operator: Operator::DeepEquals,
        fields,
        options: PredicateOptions::default(),
    }]
}

/// Copy the parts of `actual` named by a `matches` selection.
///
/// `true` takes the whole value; a nested object selects sub-keys, reading
/// into JSON or XML text when needed. Names match ignoring ASCII case.
fn select_fields(actual: &Map<String, Value>, selection: &Map<String, Value>) -> Map<String, Value> {
    let mut selected = Map::new();
    for (name, wanted) in selection {
        let Some((key, value)) = actual
            .iter()
            .find(|(k, _)| *k == name)
            .or_else(|| actual.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)))
        else {
            continue;
        };
        match wanted {
            Value::Bool(true) => {
                selected.insert(key.clone(), value.clone());
            }
            Value::Object(nested) => {
                let sub = match value {
                    Value::Object(map) => select_fields(map, nested),
                    Value::String(text) => match interpret(text) {
                        Some(Value::Object(map)) => select_fields(&map, nested),
                        _ => Map::new(),
                    },
                    _ => Map::new(),
                };
                if !sub.is_empty() {
                    selected.insert(key.clone(), Value::Object(sub));
                }
            }
            _ => {}
        }
    }
    selected
}

/// Stub recorded from one proxied exchange.
pub fn recorded_stub(predicates: Vec<Predicate>, response: LiteralResponse) -> StubDefinition {
    StubDefinition::new(predicates, vec![ResponseSpec::literal(response)])
}
