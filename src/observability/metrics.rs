//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define dispatch metrics (RPS, latency, rate limiting)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `switchyard_requests_total` (counter): requests by method, status, route
//! - `switchyard_request_duration_seconds` (histogram): dispatch latency
//! - `switchyard_rate_limited_total` (counter): rejected requests by key mode
//! - `switchyard_rate_limit_visitors` (gauge): clients tracked by the limiter
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Route label is the matched pattern, never the raw path
//! - Without an installed recorder every call is a no-op

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one dispatched request.
pub fn record_request(method: &str, status: u16, route: &str, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("route", route.to_string()),
    ];
    metrics::counter!("switchyard_requests_total", &labels).increment(1);
    metrics::histogram!("switchyard_request_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());
}

/// Record a request rejected by the rate limiter.
pub fn record_rate_limited(key_mode: &'static str) {
    metrics::counter!("switchyard_rate_limited_total", "key" => key_mode).increment(1);
}

/// Record the number of clients currently tracked by the rate limiter.
pub fn record_rate_limit_visitors(count: usize) {
    metrics::gauge!("switchyard_rate_limit_visitors").set(count as f64);
}
