//! Prometheus metrics for the matching engine.
//!
//! Tracks resolution outcomes, proxy calls and recording activity.
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

lazy_static! {
    /// Resolutions by outcome: matched|proxied|default|error
    pub static ref RESOLUTIONS_TOTAL: CounterVec = register_counter_vec!(
        "rift_resolutions_total",
        "Total number of requests resolved against stubs",
        &["outcome"]
    )
    .expect("rift_resolutions_total registers once");

    /// Proxy calls by mode and result: ok|unavailable|timeout
    pub static ref PROXY_CALLS_TOTAL: CounterVec = register_counter_vec!(
        "rift_proxy_calls_total",
        "Total number of proxied requests",
        &["mode", "result"]
    )
    .expect("rift_proxy_calls_total registers once");

    /// Upstream latency of proxied calls
    pub static ref PROXY_LATENCY_MS: HistogramVec = register_histogram_vec!(
        "rift_proxy_latency_ms",
        "Histogram of proxied call latency in milliseconds",
        &["mode"],
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .expect("rift_proxy_latency_ms registers once");

    /// Stubs recorded or appended by proxies
    pub static ref RECORDINGS_TOTAL: CounterVec = register_counter_vec!(
        "rift_recordings_total",
        "Total number of proxy recordings applied to stub stores",
        &["mode", "change"]  // change: inserted|appended|failed
    )
    .expect("rift_recordings_total registers once");
}

/// Collect all registered metrics in Prometheus text format.
pub fn collect_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

pub fn record_resolution(outcome: &str) {
    RESOLUTIONS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_proxy_call(mode: &str, result: &str, latency_ms: f64) {
    PROXY_CALLS_TOTAL.with_label_values(&[mode, result]).inc();
    PROXY_LATENCY_MS
        .with_label_values(&[mode])
        .observe(latency_ms);
}

pub fn record_recording(mode: &str, change: &str) {
    RECORDINGS_TOTAL.with_label_values(&[mode, change]).inc();
}
