//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by frontend, method, status
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_breaker_transitions_total` (counter): breaker state changes
//! - `proxy_buffer_retries_total` (counter): replayed attempts
//! - `proxy_change_events_total` (counter): applied topology changes
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   exporter the calls are no-ops
//! - The Prometheus exporter serves its own scrape listener

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Records one proxied request.
pub fn record_request(method: &str, status: u16, frontend: &str, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("frontend", frontend.to_string()),
    ];
    metrics::counter!("proxy_requests_total", &labels).increment(1);
    metrics::histogram!("proxy_request_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());
}
