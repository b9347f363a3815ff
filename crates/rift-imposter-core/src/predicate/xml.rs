//! XML support: converting documents into navigable JSON and XPath selection.

use crate::error::ConfigError;
use serde_json::{Map, Value};
use sxd_document::dom::{ChildOfElement, ChildOfRoot, Element};
use sxd_document::parser;
use sxd_xpath::{Context, Factory, Value as XPathValue};

/// Convert an XML document into nested objects.
///
/// The root element becomes the single top-level key. Leaf elements map to
/// their text, attributes appear as `@name`, text mixed with child elements
/// as `#text`, and repeated child elements collect into an array.
/// Returns `None` when the text is not well-formed XML.
pub fn xml_to_value(text: &str) -> Option<Value> {
    if !text.trim_start().starts_with('<') {
        return None;
    }
    let package = parser::parse(text).ok()?;
    let document = package.as_document();
    let root = document
        .root()
        .children()
        .into_iter()
        .find_map(|child| match child {
            ChildOfRoot::Element(element) => Some(element),
            _ => None,
        })?;

    let mut map = Map::new();
    map.insert(root.name().local_part().to_string(), element_to_value(root));
    Some(Value::Object(map))
}

fn element_to_value(element: Element<'_>) -> Value {
    let mut map = Map::new();
    for attribute in element.attributes() {
        map.insert(
            format!("@{}", attribute.name().local_part()),
            Value::String(attribute.value().to_string()),
        );
    }

    let mut text = String::new();
    for child in element.children() {
        match child {
            ChildOfElement::Element(child) => {
                let name = child.name().local_part().to_string();
                let value = element_to_value(child);
                match map.get_mut(&name) {
                    Some(Value::Array(items)) => items.push(value),
                    Some(existing) => {
                        let first = existing.take();
                        *existing = Value::Array(vec![first, value]);
                    }
                    None => {
                        map.insert(name, value);
                    }
                }
            }
            ChildOfElement::Text(t) => text.push_str(t.text()),
            _ => {}
        }
    }

    if map.is_empty() {
        return Value::String(text);
    }
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        map.insert("#text".to_string(), Value::String(trimmed.to_string()));
    }
    Value::Object(map)
}

/// An XPath selector validated at construction, with its namespace prefixes.
///
/// `sxd_xpath::XPath` is not `Send`, so only the validated source is kept and
/// the expression is rebuilt per evaluation.
#[derive(Debug, Clone)]
pub struct CompiledXPath {
    selector: String,
    namespaces: Vec<(String, String)>,
}

impl CompiledXPath {
    pub fn compile(
        selector: &str,
        ns: Option<&Map<String, Value>>,
    ) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidXPath {
            selector: selector.to_string(),
            reason,
        };
        match Factory::new().build(selector) {
            Ok(Some(_)) => {}
            Ok(None) => return Err(invalid("empty expression".to_string())),
            Err(e) => return Err(invalid(e.to_string())),
        }

        let namespaces = ns
            .into_iter()
            .flatten()
            .map(|(prefix, uri)| match uri {
                Value::String(uri) => Ok((prefix.clone(), uri.clone())),
                other => Err(invalid(format!(
                    "namespace '{prefix}' must map to a URI string, got {other}"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            selector: selector.to_string(),
            namespaces,
        })
    }

    /// Evaluate against an XML body.
    ///
    /// A single selected node yields its string value, several nodes an array
    /// of string values in document order. Nothing selected, or a body that
    /// is not XML, yields `None`.
    pub fn select(&self, body: &str) -> Option<Value> {
        let package = parser::parse(body).ok()?;
        let document = package.as_document();
        let xpath = Factory::new().build(&self.selector).ok().flatten()?;

        let mut context = Context::new();
        for (prefix, uri) in &self.namespaces {
            context.set_namespace(prefix, uri);
        }

        match xpath.evaluate(&context, document.root()) {
            Ok(XPathValue::String(s)) => Some(Value::String(s)),
            Ok(XPathValue::Number(n)) => {
                if n.fract() == 0.0 {
                    Some(Value::String(format!("{}", n as i64)))
                } else {
                    Some(Value::String(n.to_string()))
                }
            }
            Ok(XPathValue::Boolean(b)) => Some(Value::String(b.to_string())),
            Ok(XPathValue::Nodeset(nodes)) => {
                let mut values: Vec<Value> = nodes
                    .document_order()
                    .into_iter()
                    .map(|node| Value::String(node.string_value()))
                    .collect();
                match values.len() {
                    0 => None,
                    1 => values.pop(),
                    _ => Some(Value::Array(values)),
                }
            }
            Err(e) => {
                tracing::warn!(selector = %self.selector, error = %e, "xpath evaluation failed");
                None
            }
        }
    }
}
