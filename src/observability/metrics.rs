//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, outcome
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_response_bytes_total` (counter): body bytes relayed to callers
//! - `proxy_rejections_total` (counter): requests stopped before forwarding, by kind
//! - `proxy_filter_failures_total` (counter): filter failures by filter and phase
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::time::Instant;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, outcome: &'static str, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("outcome", outcome.to_string()),
    ];
    counter!("proxy_requests_total", &labels).increment(1);
    histogram!("proxy_request_duration_seconds", &labels).record(start.elapsed().as_secs_f64());
}

pub fn record_bytes_sent(bytes: u64) {
    counter!("proxy_response_bytes_total").increment(bytes);
}

pub fn record_rejection(kind: &'static str) {
    counter!("proxy_rejections_total", "kind" => kind).increment(1);
}

pub fn record_filter_failure(filter: &str, phase: &'static str) {
    counter!(
        "proxy_filter_failures_total",
        "filter" => filter.to_string(),
        "phase" => phase
    )
    .increment(1);
}
