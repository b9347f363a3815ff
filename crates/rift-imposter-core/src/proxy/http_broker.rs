//! HTTP proxy broker built on reqwest.

use super::{BrokerError, ProxyBroker};
use crate::request::{fields, CanonicalRequest};
use crate::stub::{LiteralResponse, ProxyTarget};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Headers never copied to the upstream request.
const HOP_HEADERS: [&str; 2] = ["host", "content-length"];

/// Forwards HTTP-shaped canonical requests to `target.to`.
#[derive(Debug, Clone)]
pub struct HttpProxyBroker {
    client: reqwest::Client,
}

impl HttpProxyBroker {
    pub fn new(timeout: Duration) -> Result<Self, BrokerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BrokerError::InvalidRequest(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProxyBroker for HttpProxyBroker {
    async fn forward(
        &self,
        request: &CanonicalRequest,
        target: &ProxyTarget,
    ) -> Result<LiteralResponse, BrokerError> {
        let url = target_url(request, target);
        let method = request.field_str(fields::METHOD).unwrap_or("GET");
        let method = Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|e| BrokerError::InvalidRequest(format!("method '{method}': {e}")))?;

        let mut outbound = self.client.request(method, &url);
        for (name, value) in forwarded_headers(request, target) {
            outbound = outbound.header(name, value);
        }
        if let Some(body) = request.field_str(fields::BODY).filter(|b| !b.is_empty()) {
            outbound = outbound.body(body.to_string());
        }

        let start = Instant::now();
        let unreachable = |e: reqwest::Error| BrokerError::Unreachable {
            target: target.to.clone(),
            reason: e.to_string(),
        };
        let response = outbound.send().await.map_err(unreachable)?;

        let status_code = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();
        let body = response.text().await.map_err(unreachable)?;
        debug!(
            url = %url,
            status = status_code,
            latency_ms = start.elapsed().as_millis() as u64,
            "proxied request"
        );

        Ok(LiteralResponse {
            status_code,
            headers,
            body: Some(Value::String(body)),
            extra: Map::new(),
        })
    }
}

/// `to` + request path + encoded query.
fn target_url(request: &CanonicalRequest, target: &ProxyTarget) -> String {
    let path = request.field_str(fields::PATH).unwrap_or("/");
    let query = request
        .field(fields::QUERY)
        .and_then(Value::as_object)
        .map(encode_query)
        .unwrap_or_default();
    let base = target.to.trim_end_matches('/');
    if query.is_empty() {
        format!("{base}{path}")
    } else {
        format!("{base}{path}?{query}")
    }
}

fn encode_query(query: &Map<String, Value>) -> String {
    let mut pairs = Vec::new();
    for (key, value) in query {
        let values: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            single => vec![single],
        };
        for value in values {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            pairs.push(format!(
                "{}={}",
                urlencoding::encode(key),
                urlencoding::encode(&text)
            ));
        }
    }
    pairs.join("&")
}

/// Request headers minus hop headers, plus the target's injected headers.
fn forwarded_headers(request: &CanonicalRequest, target: &ProxyTarget) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = request
        .field(fields::HEADERS)
        .and_then(Value::as_object)
        .into_iter()
        .flatten()
        .filter(|(name, _)| !HOP_HEADERS.contains(&name.to_lowercase().as_str()))
        .filter_map(|(name, value)| value.as_str().map(|v| (name.clone(), v.to_string())))
        .collect();
    headers.extend(
        target
            .inject_headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    headers
}
