//! Response resolution for a single imposter.
//!
//! [`ResponseResolver`] finds the first matching stub, serves literal
//! responses directly and delegates proxy responses to a [`ProxyBroker`],
//! recording the upstream answer according to the proxy mode.

use crate::error::ResolveError;
use crate::metrics;
use crate::predicate::EvaluationScope;
use crate::proxy::recording::{generate_predicates, recorded_stub};
use crate::proxy::ProxyBroker;
use crate::request::CanonicalRequest;
use crate::stub::{
    LiteralResponse, ProxyMode, ProxyTarget, ResponseSpec, StoreChange, StubCommand, StubId,
    StubMatch, StubStore,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Upstream calls slower than this are abandoned.
pub const DEFAULT_PROXY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub proxy_timeout: Duration,
    /// Served when no stub matches
    pub default_response: LiteralResponse,
    /// Keep a per-stub log of the requests each stub answered
    pub record_matches: bool,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            proxy_timeout: DEFAULT_PROXY_TIMEOUT,
            default_response: LiteralResponse::default(),
            record_matches: false,
        }
    }
}

/// How a response was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Outcome {
    #[serde(rename_all = "camelCase")]
    Matched {
        stub_id: StubId,
        response_index: usize,
    },
    #[serde(rename_all = "camelCase")]
    Proxied {
        stub_id: StubId,
        mode: ProxyMode,
        /// Stub inserted or appended to by recording
        recorded: Option<StubId>,
    },
    Default,
}

impl Outcome {
    fn label(&self) -> &'static str {
        match self {
            Outcome::Matched { .. } => "matched",
            Outcome::Proxied { .. } => "proxied",
            Outcome::Default => "default",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub response: LiteralResponse,
    pub outcome: Outcome,
}

pub struct ResponseResolver {
    store: Arc<StubStore>,
    broker: Option<Arc<dyn ProxyBroker>>,
    settings: ResolverSettings,
}

impl ResponseResolver {
    pub fn new(store: Arc<StubStore>, settings: ResolverSettings) -> Self {
        Self {
            store,
            broker: None,
            settings,
        }
    }

    pub fn with_broker(mut self, broker: Arc<dyn ProxyBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn store(&self) -> &Arc<StubStore> {
        &self.store
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// Resolve `request` to a response.
    ///
    /// A miss is not an error: it yields the default response. Errors are
    /// reserved for proxy responses that could not reach their upstream.
    pub async fn resolve(&self, request: &CanonicalRequest) -> Result<Resolution, ResolveError> {
        // The scope and its parse cache never live across an await point.
        let selected = {
            let scope = EvaluationScope::new(request);
            self.store.resolve(&scope)
        };

        let result = match selected {
            None => {
                debug!("no stub matched, serving default response");
                Ok(Resolution {
                    response: self.settings.default_response.clone(),
                    outcome: Outcome::Default,
                })
            }
            Some(StubMatch {
                stub,
                response_index,
                response,
            }) => {
                let resolution = match response {
                    ResponseSpec::Literal { response, .. } => Ok(Resolution {
                        response,
                        outcome: Outcome::Matched {
                            stub_id: stub.id(),
                            response_index,
                        },
                    }),
                    ResponseSpec::Proxy(target) => self.proxy(request, stub.id(), &target).await,
                };
                if let Ok(resolution) = &resolution {
                    if self.settings.record_matches {
                        stub.state().record_match(request, &resolution.response);
                    }
                }
                resolution
            }
        };

        match &result {
            Ok(resolution) => metrics::record_resolution(resolution.outcome.label()),
            Err(_) => metrics::record_resolution("error"),
        }
        result
    }

    async fn proxy(
        &self,
        request: &CanonicalRequest,
        stub_id: StubId,
        target: &ProxyTarget,
    ) -> Result<Resolution, ResolveError> {
        let broker = self.broker.as_ref().ok_or(ResolveError::NoProxyBroker)?;
        let mode = target.mode.as_str();

        let start = Instant::now();
        let forwarded =
            tokio::time::timeout(self.settings.proxy_timeout, broker.forward(request, target))
                .await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        let response = match forwarded {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(upstream = %target.to, mode, error = %e, "proxy call failed");
                metrics::record_proxy_call(mode, "unavailable", latency_ms);
                return Err(ResolveError::UpstreamUnavailable {
                    target: target.to.clone(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                warn!(
                    upstream = %target.to,
                    mode,
                    timeout_ms = self.settings.proxy_timeout.as_millis() as u64,
                    "proxy call timed out"
                );
                metrics::record_proxy_call(mode, "timeout", latency_ms);
                return Err(ResolveError::UpstreamUnavailable {
                    target: target.to.clone(),
                    reason: format!(
                        "timed out after {}ms",
                        self.settings.proxy_timeout.as_millis()
                    ),
                });
            }
        };
        metrics::record_proxy_call(mode, "ok", latency_ms);

        let recorded = self.record(request, stub_id, target, &response);
        Ok(Resolution {
            response,
            outcome: Outcome::Proxied {
                stub_id,
                mode: target.mode,
                recorded,
            },
        })
    }

    /// Store what came back from upstream. A recording failure is logged and
    /// the proxied response is still served.
    fn record(
        &self,
        request: &CanonicalRequest,
        proxy_stub: StubId,
        target: &ProxyTarget,
        response: &LiteralResponse,
    ) -> Option<StubId> {
        let mode = target.mode.as_str();
        let definition = || {
            recorded_stub(
                generate_predicates(request, &target.predicate_generators),
                response.clone(),
            )
        };
        let command = match target.mode {
            ProxyMode::ProxyOnce => StubCommand::RecordStub {
                before: proxy_stub,
                definition: definition(),
            },
            ProxyMode::ProxyAlways => StubCommand::AppendResponse {
                after: proxy_stub,
                definition: definition(),
            },
            ProxyMode::ProxyTransparent => return None,
        };

        match self.store.apply(command) {
            Ok(change) => {
                let kind = match change {
                    StoreChange::Appended(_) => "appended",
                    _ => "inserted",
                };
                metrics::record_recording(mode, kind);
                info!(proxy_stub = %proxy_stub, mode, change = kind, "recorded proxy response");
                change.stub_id()
            }
            Err(e) => {
                metrics::record_recording(mode, "failed");
                warn!(proxy_stub = %proxy_stub, mode, error = %e, "failed to record proxy response");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::BrokerError;
    use crate::stub::StubDefinition;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    #[derive(Default)]
    struct CountingBroker {
        calls: AtomicUsize,
        delay: Option<Duration>,
        fail: bool,
    }

    #[async_trait]
    impl ProxyBroker for CountingBroker {
        async fn forward(
            &self,
            request: &CanonicalRequest,
            target: &ProxyTarget,
        ) -> Result<LiteralResponse, BrokerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(BrokerError::Unreachable {
                    target: target.to.clone(),
                    reason: "connection refused".to_string(),
                });
            }
            let path = request.field_str("path").unwrap_or_default();
            Ok(LiteralResponse::new(200).with_body(format!("{path} #{call}")))
        }
    }

    fn definition(value: Value) -> StubDefinition {
        serde_json::from_value(value).unwrap()
    }

    fn proxy_resolver(mode: &str, broker: Arc<CountingBroker>) -> ResponseResolver {
        let store = Arc::new(StubStore::new());
        store
            .add(
                definition(json!({"responses": [{"proxy": {"to": "http://origin", "mode": mode}}]})),
                None,
            )
            .unwrap();
        ResponseResolver::new(store, ResolverSettings::default()).with_broker(broker)
    }

    #[tokio::test]
    async fn test_miss_serves_default_response() {
        let settings = ResolverSettings {
            default_response: LiteralResponse::new(404),
            ..Default::default()
        };
        let resolver = ResponseResolver::new(Arc::new(StubStore::new()), settings);
        let resolution = resolver
            .resolve(&CanonicalRequest::http("GET", "/").build())
            .await
            .unwrap();
        assert_eq!(resolution.outcome, Outcome::Default);
        assert_eq!(resolution.response.status_code, 404);
    }

    #[tokio::test]
    async fn test_literal_match_records_when_enabled() {
        let store = Arc::new(StubStore::new());
        let id = store
            .add(
                definition(json!({"responses": [{"is": {"statusCode": 201}}]})),
                None,
            )
            .unwrap();
        let settings = ResolverSettings {
            record_matches: true,
            ..Default::default()
        };
        let resolver = ResponseResolver::new(Arc::clone(&store), settings);
        let resolution = resolver
            .resolve(&CanonicalRequest::http("GET", "/x").build())
            .await
            .unwrap();

        assert_eq!(
            resolution.outcome,
            Outcome::Matched {
                stub_id: id,
                response_index: 0
            }
        );
        let log = store.get(id).unwrap().state().match_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].response.status_code, 201);
    }

    #[tokio::test]
    async fn test_proxy_without_broker_is_error() {
        let store = Arc::new(StubStore::new());
        store
            .add(
                definition(json!({"responses": [{"proxy": {"to": "http://origin"}}]})),
                None,
            )
            .unwrap();
        let resolver = ResponseResolver::new(store, ResolverSettings::default());
        let err = resolver
            .resolve(&CanonicalRequest::http("GET", "/").build())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NoProxyBroker));
    }

    #[tokio::test]
    async fn test_proxy_once_replays_recording() {
        let broker = Arc::new(CountingBroker::default());
        let resolver = proxy_resolver("proxyOnce", Arc::clone(&broker));
        let request = CanonicalRequest::http("GET", "/users").build();

        let first = resolver.resolve(&request).await.unwrap();
        let Outcome::Proxied { recorded, .. } = first.outcome else {
            panic!("expected proxied outcome, got {:?}", first.outcome);
        };
        assert!(recorded.is_some());

        let second = resolver.resolve(&request).await.unwrap();
        assert!(matches!(second.outcome, Outcome::Matched { stub_id, .. } if Some(stub_id) == recorded));
        assert_eq!(second.response.body_text(), "/users #0");
        assert_eq!(broker.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transparent_records_nothing() {
        let broker = Arc::new(CountingBroker::default());
        let resolver = proxy_resolver("proxyTransparent", Arc::clone(&broker));
        let request = CanonicalRequest::http("GET", "/users").build();

        resolver.resolve(&request).await.unwrap();
        resolver.resolve(&request).await.unwrap();
        assert_eq!(broker.calls.load(Ordering::SeqCst), 2);
        assert_eq!(resolver.store().len(), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_timeout_is_upstream_unavailable() {
        let broker = Arc::new(CountingBroker {
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        let store = Arc::new(StubStore::new());
        store
            .add(
                definition(json!({"responses": [{"proxy": {"to": "http://slow"}}]})),
                None,
            )
            .unwrap();
        let settings = ResolverSettings {
            proxy_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let resolver = ResponseResolver::new(Arc::clone(&store), settings).with_broker(broker);
        let timeouts = || {
            metrics::PROXY_CALLS_TOTAL
                .with_label_values(&["proxyOnce", "timeout"])
                .get()
        };
        let before = timeouts();

        let err = resolver
            .resolve(&CanonicalRequest::http("GET", "/").build())
            .await
            .unwrap_err();
        assert!(timeouts() - before >= 1.0);
        match err {
            ResolveError::UpstreamUnavailable { target, reason } => {
                assert_eq!(target, "http://slow");
                assert!(reason.contains("timed out"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(store.len(), 1);
        assert!(logs_contain("proxy call timed out"));
    }

    #[tokio::test]
    async fn test_broker_failure_records_nothing() {
        let broker = Arc::new(CountingBroker {
            fail: true,
            ..Default::default()
        });
        let resolver = proxy_resolver("proxyOnce", broker);
        let err = resolver
            .resolve(&CanonicalRequest::http("GET", "/").build())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::UpstreamUnavailable { .. }));
        assert_eq!(resolver.store().len(), 1);
    }
}
