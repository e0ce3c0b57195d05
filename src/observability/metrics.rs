//! Metrics collection and exposition.
//!
//! # Metrics
//! - `edge_relay_requests_total` (counter): terminal decisions by action, status
//! - `edge_relay_redirects_total` (counter): upstream redirects by outcome
//! - `edge_relay_log_failures_total` (counter): access-log writes that failed
//! - `edge_relay_upstream_duration_seconds` (histogram): time to upstream headers
//!
//! The macros are no-ops until a recorder is installed, so recording is
//! always safe, also in tests.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(action: &str, status: u16) {
    metrics::counter!(
        "edge_relay_requests_total",
        "action" => action.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_redirect(outcome: &'static str) {
    metrics::counter!("edge_relay_redirects_total", "outcome" => outcome).increment(1);
}

pub fn record_log_failure() {
    metrics::counter!("edge_relay_log_failures_total").increment(1);
}

pub fn record_upstream_duration(start: Instant) {
    metrics::histogram!("edge_relay_upstream_duration_seconds")
        .record(start.elapsed().as_secs_f64());
}
