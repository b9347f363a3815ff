//! Core Imposter struct: one stub store, its resolver and request log.

use super::types::{ExportOptions, ImposterDefinition, ImposterError, RecordedRequest};
use crate::error::ResolveError;
use crate::predicate::PredicateInjector;
use crate::proxy::ProxyBroker;
use crate::request::CanonicalRequest;
use crate::resolver::{Resolution, ResolverSettings, ResponseResolver};
use crate::stub::{LiteralResponse, StubDefinition, StubStore};
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Failure while handling a request on an imposter.
#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    #[error(transparent)]
    Imposter(#[from] ImposterError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// A single virtual service with isolated stubs and state.
pub struct Imposter {
    port: u16,
    protocol: String,
    name: Option<String>,
    record_requests: bool,
    resolver: ResponseResolver,
    recorded_requests: RwLock<Vec<RecordedRequest>>,
    request_count: AtomicU64,
    closed: AtomicBool,
}

impl Imposter {
    /// Build an imposter, compiling every stub. Any invalid stub rejects the
    /// whole definition.
    pub fn from_definition(
        definition: ImposterDefinition,
        broker: Option<Arc<dyn ProxyBroker>>,
        injector: Option<Arc<dyn PredicateInjector>>,
        proxy_timeout: Duration,
    ) -> Result<Self, ImposterError> {
        let store = match injector {
            Some(injector) => StubStore::with_injector(injector),
            None => StubStore::new(),
        };
        store.replace_all(definition.stubs)?;

        let settings = ResolverSettings {
            proxy_timeout,
            default_response: definition.default_response.unwrap_or_default(),
            record_matches: definition.record_matches,
        };
        let mut resolver = ResponseResolver::new(Arc::new(store), settings);
        if let Some(broker) = broker {
            resolver = resolver.with_broker(broker);
        }

        info!(
            port = definition.port,
            protocol = %definition.protocol,
            stubs = resolver.store().len(),
            "imposter created"
        );
        Ok(Self {
            port: definition.port,
            protocol: definition.protocol,
            name: definition.name,
            record_requests: definition.record_requests,
            resolver,
            recorded_requests: RwLock::new(Vec::new()),
            request_count: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn stubs(&self) -> &Arc<StubStore> {
        self.resolver.store()
    }

    /// Resolve one inbound request.
    ///
    /// Requests arriving after [`close`](Self::close) are rejected; requests
    /// already in flight finish against the snapshot they started with.
    pub async fn handle(&self, request: &CanonicalRequest) -> Result<Resolution, HandleError> {
        if self.is_closed() {
            return Err(ImposterError::Closed(self.port).into());
        }
        self.increment_request_count();
        self.record_request(request);

        let resolution = self.resolver.resolve(request).await?;
        debug!(port = self.port, outcome = ?resolution.outcome, "request resolved");
        Ok(resolution)
    }

    fn record_request(&self, request: &CanonicalRequest) {
        if self.record_requests {
            self.recorded_requests.write().push(RecordedRequest {
                timestamp: Utc::now(),
                request: request.clone(),
            });
        }
    }

    fn increment_request_count(&self) -> u64 {
        self.request_count.fetch_add(1, Ordering::SeqCst)
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.recorded_requests.read().clone()
    }

    /// Clear the request log and reset the request count.
    pub fn clear_requests(&self) {
        self.recorded_requests.write().clear();
        self.request_count.store(0, Ordering::SeqCst);
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(port = self.port, "imposter closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Current definition, including recorded stubs.
    pub fn export(&self, options: ExportOptions) -> ImposterDefinition {
        let settings = self.resolver.settings();
        let stubs = self
            .stubs()
            .list()
            .iter()
            .filter_map(|stub| {
                let mut definition = stub.definition().clone();
                if options.remove_proxies {
                    definition.responses.retain(|r| !r.is_proxy());
                    if definition.responses.is_empty() {
                        return None;
                    }
                }
                if !options.replayable {
                    definition.matches = stub.state().match_log();
                }
                Some(definition)
            })
            .collect::<Vec<StubDefinition>>();

        let default_response = Some(settings.default_response.clone())
            .filter(|response| *response != LiteralResponse::default());

        let (number_of_requests, requests) = if options.replayable {
            (None, Vec::new())
        } else {
            (Some(self.request_count()), self.requests())
        };

        ImposterDefinition {
            port: self.port,
            protocol: self.protocol.clone(),
            name: self.name.clone(),
            record_requests: self.record_requests,
            record_matches: settings.record_matches,
            default_response,
            stubs,
            number_of_requests,
            requests,
        }
    }
}

impl std::fmt::Debug for Imposter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Imposter")
            .field("port", &self.port)
            .field("protocol", &self.protocol)
            .field("name", &self.name)
            .field("stubs", &self.stubs().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
