//! Stub and response definitions, and the runtime stub record.

use super::cycler::ResponseCycler;
use crate::error::ConfigError;
use crate::predicate::{Operator, Predicate, PredicateInjector, PredicateOptions, PredicateTree};
use crate::request::CanonicalRequest;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ============================================================================
// Identity
// ============================================================================

/// Store-assigned stub identity. Stable across replace and append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StubId(pub u64);

impl fmt::Display for StubId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Responses
// ============================================================================

fn default_status_code() -> u16 {
    200
}

/// Canned response. Protocol-specific fields other than status, headers and
/// body are carried through untouched in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiteralResponse {
    #[serde(default = "default_status_code")]
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for LiteralResponse {
    fn default() -> Self {
        Self {
            status_code: default_status_code(),
            headers: HashMap::new(),
            body: None,
            extra: Map::new(),
        }
    }
}

impl LiteralResponse {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Value>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Body as wire text: strings verbatim, structured bodies as JSON.
    pub fn body_text(&self) -> String {
        match &self.body {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}

/// How a proxy response records what it saw upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProxyMode {
    /// Record once, then replay the recording
    #[default]
    ProxyOnce,
    /// Always proxy, appending every answer to the recording
    ProxyAlways,
    /// Proxy without recording
    ProxyTransparent,
}

impl ProxyMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ProxyMode::ProxyOnce => "proxyOnce",
            ProxyMode::ProxyAlways => "proxyAlways",
            ProxyMode::ProxyTransparent => "proxyTransparent",
        }
    }
}

impl fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Describes which request fields a recorded stub's predicates cover.
///
/// ```json
/// { "matches": { "path": true, "query": { "id": true } }, "caseSensitive": true }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredicateGenerator {
    pub matches: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate_operator: Option<Operator>,
    #[serde(flatten)]
    pub options: PredicateOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyTarget {
    /// Upstream origin, e.g. `http://localhost:8080`
    pub to: String,
    #[serde(default)]
    pub mode: ProxyMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub predicate_generators: Vec<PredicateGenerator>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub inject_headers: HashMap<String, String>,
}

impl ProxyTarget {
    pub fn new(to: impl Into<String>, mode: ProxyMode) -> Self {
        Self {
            to: to.into(),
            mode,
            predicate_generators: Vec::new(),
            inject_headers: HashMap::new(),
        }
    }
}

/// One entry of a stub's response list.
///
/// Authored as `{"is": {...}, "repeat": n}` or `{"proxy": {...}}`. An empty
/// object is an empty literal response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum ResponseSpec {
    Literal {
        response: LiteralResponse,
        repeat: Option<u32>,
    },
    Proxy(ProxyTarget),
}

impl ResponseSpec {
    pub fn literal(response: LiteralResponse) -> Self {
        ResponseSpec::Literal {
            response,
            repeat: None,
        }
    }

    pub fn proxy(target: ProxyTarget) -> Self {
        ResponseSpec::Proxy(target)
    }

    pub fn repeat(&self) -> Option<u32> {
        match self {
            ResponseSpec::Literal { repeat, .. } => *repeat,
            ResponseSpec::Proxy(_) => None,
        }
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self, ResponseSpec::Proxy(_))
    }
}

impl TryFrom<Value> for ResponseSpec {
    type Error = ConfigError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let mut object = match value {
            Value::Object(object) => object,
            other => {
                return Err(ConfigError::InvalidResponse(format!(
                    "response must be an object, got {other}"
                )))
            }
        };

        let repeat = take_repeat(&mut object)?;

        if let Some(proxy) = object.remove("proxy") {
            let target: ProxyTarget = serde_json::from_value(proxy)
                .map_err(|e| ConfigError::InvalidResponse(format!("proxy: {e}")))?;
            return Ok(ResponseSpec::Proxy(target));
        }

        let response = match object.remove("is") {
            Some(is) => serde_json::from_value(is)
                .map_err(|e| ConfigError::InvalidResponse(format!("is: {e}")))?,
            None => match object.keys().next() {
                Some(kind) => {
                    return Err(ConfigError::InvalidResponse(format!(
                        "unsupported response type '{kind}'"
                    )))
                }
                None => LiteralResponse::default(),
            },
        };
        Ok(ResponseSpec::Literal { response, repeat })
    }
}

/// `repeat` at the response level, or the older `_behaviors.repeat` form.
fn take_repeat(object: &mut Map<String, Value>) -> Result<Option<u32>, ConfigError> {
    let raw = match object.remove("repeat") {
        Some(repeat) => Some(repeat),
        None => object
            .remove("_behaviors")
            .and_then(|mut behaviors| behaviors.get_mut("repeat").map(Value::take)),
    };
    match raw {
        None => Ok(None),
        Some(value) => value
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n > 0)
            .map(Some)
            .ok_or_else(|| {
                ConfigError::InvalidResponse(format!("repeat must be a positive integer, got {value}"))
            }),
    }
}

impl From<ResponseSpec> for Value {
    fn from(spec: ResponseSpec) -> Self {
        let mut object = Map::new();
        match spec {
            ResponseSpec::Literal { response, repeat } => {
                object.insert(
                    "is".to_string(),
                    serde_json::to_value(response).unwrap_or(Value::Null),
                );
                if let Some(repeat) = repeat {
                    object.insert("repeat".to_string(), Value::from(repeat));
                }
            }
            ResponseSpec::Proxy(target) => {
                object.insert(
                    "proxy".to_string(),
                    serde_json::to_value(target).unwrap_or(Value::Null),
                );
            }
        }
        Value::Object(object)
    }
}

// ============================================================================
// Stubs
// ============================================================================

/// A stub as authored: predicates plus responses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StubDefinition {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub predicates: Vec<Predicate>,
    #[serde(default)]
    pub responses: Vec<ResponseSpec>,
    /// Requests this stub answered. Filled in by non-replayable exports only;
    /// dropped when the definition is loaded into a store.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<MatchRecord>,
}

impl StubDefinition {
    pub fn new(predicates: Vec<Predicate>, responses: Vec<ResponseSpec>) -> Self {
        Self {
            predicates,
            responses,
            matches: Vec::new(),
        }
    }

    pub fn has_proxy(&self) -> bool {
        self.responses.iter().any(ResponseSpec::is_proxy)
    }
}

/// Which stub answered a request, kept when `recordMatches` is on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRecord {
    pub timestamp: DateTime<Utc>,
    pub request: CanonicalRequest,
    pub response: LiteralResponse,
}

/// Mutable per-stub state, shared across replace and append so the cursor
/// and statistics survive administrative edits.
#[derive(Debug, Default)]
pub struct StubState {
    pub(crate) cursor: ResponseCycler,
    matches: AtomicU64,
    match_log: Mutex<Vec<MatchRecord>>,
}

impl StubState {
    pub(crate) fn count_match(&self) {
        self.matches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn matches(&self) -> u64 {
        self.matches.load(Ordering::Relaxed)
    }

    pub fn record_match(&self, request: &CanonicalRequest, response: &LiteralResponse) {
        self.match_log.lock().push(MatchRecord {
            timestamp: Utc::now(),
            request: request.clone(),
            response: response.clone(),
        });
    }

    pub fn match_log(&self) -> Vec<MatchRecord> {
        self.match_log.lock().clone()
    }

    /// Forget statistics and the match log; the cursor keeps its position.
    pub fn clear_statistics(&self) {
        self.matches.store(0, Ordering::Relaxed);
        self.match_log.lock().clear();
    }
}

/// A stub owned by a store: compiled predicates, responses and state.
#[derive(Debug)]
pub struct Stub {
    id: StubId,
    definition: StubDefinition,
    predicates: PredicateTree,
    state: Arc<StubState>,
}

impl Stub {
    pub(crate) fn compile(
        id: StubId,
        mut definition: StubDefinition,
        injector: Option<&dyn PredicateInjector>,
    ) -> Result<Self, ConfigError> {
        definition.matches.clear();
        let predicates = PredicateTree::compile(&definition.predicates, injector)?;
        Ok(Self {
            id,
            definition,
            predicates,
            state: Arc::new(StubState::default()),
        })
    }

    /// Same identity and state, different definition.
    pub(crate) fn with_state(mut self, state: Arc<StubState>) -> Self {
        self.state = state;
        self
    }

    /// Copy of this stub with extra responses appended.
    pub(crate) fn with_appended(&self, responses: Vec<ResponseSpec>) -> Self {
        let mut definition = self.definition.clone();
        definition.responses.extend(responses);
        Self {
            id: self.id,
            definition,
            predicates: self.predicates.clone(),
            state: Arc::clone(&self.state),
        }
    }

    pub fn id(&self) -> StubId {
        self.id
    }

    pub fn definition(&self) -> &StubDefinition {
        &self.definition
    }

    pub fn responses(&self) -> &[ResponseSpec] {
        &self.definition.responses
    }

    pub fn predicates(&self) -> &PredicateTree {
        &self.predicates
    }

    pub fn state(&self) -> &Arc<StubState> {
        &self.state
    }

    pub fn matches(&self) -> u64 {
        self.state.matches()
    }
}

/// Per-stub counters reported by `StubStore::stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StubStats {
    pub id: StubId,
    pub matches: u64,
    pub response_count: usize,
    pub next_response: usize,
}
