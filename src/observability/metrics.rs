//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, host
//! - `proxy_request_duration_seconds` (histogram): latency by host
//! - `proxy_request_errors_total` (counter): per-request errors by kind
//! - `proxy_active_connections` (gauge): open client connections
//! - `proxy_route_reloads_total` (counter): reload attempts by outcome
//!
//! Recording goes through the `metrics` facade and is a no-op until
//! [`init_metrics`] installs the Prometheus exporter.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, host: &str, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("host", host.to_string()),
    ];
    counter!("proxy_requests_total", &labels).increment(1);
    histogram!("proxy_request_duration_seconds", "host" => host.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_error(kind: &'static str) {
    counter!("proxy_request_errors_total", "kind" => kind).increment(1);
}

pub fn record_connections(active: u64) {
    gauge!("proxy_active_connections").set(active as f64);
}

pub fn record_reload(outcome: &'static str) {
    counter!("proxy_route_reloads_total", "outcome" => outcome).increment(1);
}
