//! Proxy delegation.
//!
//! Resolution hands proxied requests to a [`ProxyBroker`], an injected
//! capability that performs the downstream call for the imposter's protocol.
//! Recording what came back is handled by [`recording`].
//!
//! # Module Structure
//!
//! - `http_broker` - reqwest-backed broker for HTTP imposters
//! - `recording` - Predicate generation and recorded stub construction

mod http_broker;
pub mod recording;

pub use http_broker::HttpProxyBroker;

use crate::request::CanonicalRequest;
use crate::stub::{LiteralResponse, ProxyTarget};
use async_trait::async_trait;

/// Downstream call failure.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Failed to reach {target}: {reason}")]
    Unreachable { target: String, reason: String },
    #[error("Cannot forward request: {0}")]
    InvalidRequest(String),
}

/// Performs the network call behind a proxy response.
#[async_trait]
pub trait ProxyBroker: Send + Sync {
    async fn forward(
        &self,
        request: &CanonicalRequest,
        target: &ProxyTarget,
    ) -> Result<LiteralResponse, BrokerError>;
}
