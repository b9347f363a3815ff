//! Rift imposter core: Mountebank-compatible request matching and stub
//! resolution, independent of any transport.
//!
//! A transport turns each inbound message into a [`CanonicalRequest`] and
//! hands it to an [`Imposter`]. The imposter finds the first stub whose
//! predicates hold, serves its next response, and for proxy responses
//! delegates to a [`ProxyBroker`] and records what came back.
//!
//! ## Module Structure
//!
//! - `request`: Canonical request record and HTTP normalization
//! - `predicate`: Predicate definitions, compilation and evaluation
//! - `stub`: Stub definitions, response cycling and the stub store
//! - `proxy`: Proxy broker capability and recording
//! - `resolver`: Request to response resolution
//! - `imposter`: Imposters, export and the port registry
//! - `config`: Engine configuration loading
//! - `metrics`: Prometheus metrics
//! - `error`: Error types

pub mod config;
pub mod error;
pub mod imposter;
pub mod metrics;
pub mod predicate;
pub mod proxy;
pub mod request;
pub mod resolver;
pub mod stub;

pub use config::EngineConfig;
pub use error::{ConfigError, ResolveError, StoreError};
pub use imposter::{
    ExportOptions, HandleError, Imposter, ImposterDefinition, ImposterError, ImposterRegistry,
};
pub use predicate::{EvaluationScope, Predicate, PredicateTree};
pub use proxy::{BrokerError, HttpProxyBroker, ProxyBroker};
pub use request::CanonicalRequest;
pub use resolver::{Outcome, Resolution, ResolverSettings, ResponseResolver};
pub use stub::{LiteralResponse, ResponseSpec, StubCommand, StubDefinition, StubId, StubStore};
