//! Type definitions for imposters: the authored definition, recorded
//! requests, export options and errors.

use crate::error::StoreError;
use crate::request::CanonicalRequest;
use crate::stub::{LiteralResponse, StubDefinition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_protocol() -> String {
    "http".to_string()
}

/// An imposter as authored in JSON or YAML, and as produced by export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImposterDefinition {
    pub port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub record_requests: bool,
    /// Record which stub matched each request
    #[serde(default)]
    pub record_matches: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_response: Option<LiteralResponse>,
    #[serde(default)]
    pub stubs: Vec<StubDefinition>,

    // Present in non-replayable exports only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_requests: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requests: Vec<RecordedRequest>,
}

impl ImposterDefinition {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            protocol: default_protocol(),
            name: None,
            record_requests: false,
            record_matches: false,
            default_response: None,
            stubs: Vec::new(),
            number_of_requests: None,
            requests: Vec::new(),
        }
    }

    pub fn with_stub(mut self, stub: StubDefinition) -> Self {
        self.stubs.push(stub);
        self
    }
}

/// A request seen by an imposter with `recordRequests` enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedRequest {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub request: CanonicalRequest,
}

/// Export flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOptions {
    /// Drop the request log, request count and match statistics
    #[serde(default)]
    pub replayable: bool,
    /// Drop proxy responses and any stub left without responses
    #[serde(default)]
    pub remove_proxies: bool,
}

impl ExportOptions {
    pub fn replayable() -> Self {
        Self {
            replayable: true,
            remove_proxies: false,
        }
    }

    pub fn with_remove_proxies(mut self) -> Self {
        self.remove_proxies = true;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImposterError {
    #[error("Port {0} is already in use")]
    PortInUse(u16),
    #[error("Imposter not found on port {0}")]
    NotFound(u16),
    #[error("Imposter on port {0} is closed")]
    Closed(u16),
    #[error("Invalid imposter definition: {0}")]
    InvalidDefinition(#[from] StoreError),
}
