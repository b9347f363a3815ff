//! Canonical request record handed to the matching engine by a transport.
//!
//! A canonical request is a flat mapping from field name to a raw JSON value.
//! HTTP-shaped transports produce `requestFrom`, `ip`, `method`, `path`,
//! `query`, `headers`, `body` (and `form` for urlencoded bodies); other
//! protocols supply whatever fields they natively produce.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field names used by HTTP-shaped requests.
pub mod fields {
    pub const REQUEST_FROM: &str = "requestFrom";
    pub const IP: &str = "ip";
    pub const METHOD: &str = "method";
    pub const PATH: &str = "path";
    pub const QUERY: &str = "query";
    pub const HEADERS: &str = "headers";
    pub const BODY: &str = "body";
    pub const FORM: &str = "form";
}

/// Immutable, protocol-agnostic request record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalRequest {
    fields: Map<String, Value>,
}

impl CanonicalRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Add or overwrite a field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Start building an HTTP-shaped request.
    pub fn http(method: &str, path: &str) -> HttpRequestBuilder {
        HttpRequestBuilder::new(method, path)
    }

    /// Raw value of a field, looked up by exact name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Convenience accessor for string-valued fields.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

impl From<Map<String, Value>> for CanonicalRequest {
    fn from(fields: Map<String, Value>) -> Self {
        Self::from_fields(fields)
    }
}

/// Builder that normalizes raw HTTP parts into a [`CanonicalRequest`].
#[derive(Debug, Clone)]
pub struct HttpRequestBuilder {
    method: String,
    path: String,
    query: Option<String>,
    headers: Vec<(String, String)>,
    body: Option<String>,
    request_from: Option<String>,
}

impl HttpRequestBuilder {
    fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            query: None,
            headers: Vec::new(),
            body: None,
            request_from: None,
        }
    }

    /// Raw query string, without the leading `?`.
    pub fn query(mut self, query: &str) -> Self {
        self.query = Some(query.trim_start_matches('?').to_string());
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: &str) -> Self {
        self.body = Some(body.to_string());
        self
    }

    /// Peer address in `ip:port` form.
    pub fn request_from(mut self, addr: &str) -> Self {
        self.request_from = Some(addr.to_string());
        self
    }

    pub fn build(self) -> CanonicalRequest {
        let mut fields = Map::new();

        if let Some(from) = &self.request_from {
            fields.insert(fields::REQUEST_FROM.into(), Value::String(from.clone()));
            fields.insert(fields::IP.into(), Value::String(ip_of(from).to_string()));
        }
        fields.insert(fields::METHOD.into(), Value::String(self.method));
        fields.insert(fields::PATH.into(), Value::String(self.path));
        fields.insert(
            fields::QUERY.into(),
            Value::Object(parse_query_string(self.query.as_deref().unwrap_or(""))),
        );

        let mut headers = Map::new();
        for (name, value) in &self.headers {
            headers.insert(name.clone(), Value::String(value.clone()));
        }

        let body = self.body.unwrap_or_default();
        let is_form = self.headers.iter().any(|(name, value)| {
            name.eq_ignore_ascii_case("content-type")
                && value.contains("application/x-www-form-urlencoded")
        });
        if is_form {
            fields.insert(fields::FORM.into(), Value::Object(parse_query_string(&body)));
        }

        fields.insert(fields::HEADERS.into(), Value::Object(headers));
        fields.insert(fields::BODY.into(), Value::String(body));

        CanonicalRequest { fields }
    }
}

/// Strip the port from an `ip:port` peer address (IPv6 aware).
fn ip_of(addr: &str) -> &str {
    if let Some(rest) = addr.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match addr.rsplit_once(':') {
        Some((ip, port)) if !ip.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => ip,
        _ => addr,
    }
}

/// Parse a urlencoded string into an object, URL-decoding keys and values.
///
/// Repeated keys collect into an array in order of appearance.
pub fn parse_query_string(query: &str) -> Map<String, Value> {
    let mut params = Map::new();
    for pair in query.split('&').filter(|s| !s.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode_component(key);
        let value = Value::String(decode_component(value));

        match params.get_mut(&key) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                params.insert(key, value);
            }
        }
    }
    params
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}
