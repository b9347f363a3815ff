//! Error types for the matching engine.
//!
//! Configuration problems surface synchronously when a stub is built and never
//! reach resolution. A resolution miss is not an error (it yields the default
//! response); upstream failures are reported distinctly so the transport can
//! pick a protocol-appropriate failure.

use crate::stub::StubId;

/// Malformed predicate or response definition.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown predicate operator: {0}")]
    UnknownOperator(String),
    #[error("Invalid predicate: {0}")]
    InvalidPredicate(String),
    #[error("Invalid regex '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("Invalid jsonpath selector '{selector}': {reason}")]
    InvalidJsonPath { selector: String, reason: String },
    #[error("Invalid xpath selector '{selector}': {reason}")]
    InvalidXPath { selector: String, reason: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Inject predicates require an injector; injection is disabled")]
    InjectionDisabled,
    #[error("Invalid inject source: {0}")]
    InvalidInject(String),
}

/// Administrative stub mutation failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Stub {0} not found")]
    StubNotFound(StubId),
    #[error("Stub index {0} out of bounds")]
    IndexOutOfBounds(usize),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Failures surfaced by response resolution.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The proxied call failed or timed out. Nothing was recorded.
    #[error("Upstream {target} unavailable: {reason}")]
    UpstreamUnavailable { target: String, reason: String },
    #[error("Proxy response selected but no proxy broker is configured")]
    NoProxyBroker,
}
