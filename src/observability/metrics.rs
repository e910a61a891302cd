//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define server metrics (requests, deliveries, handler errors, running states)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `jerry_http_requests_total` (counter): responses by method, status
//! - `jerry_http_request_duration_seconds` (histogram): dispatch latency
//! - `jerry_messages_delivered_total` (counter): deliveries by queue
//! - `jerry_handler_errors_total` (counter): failed or panicked handlers by kind
//! - `jerry_running_states` (gauge): running states held by the daemon
//!
//! # Design Decisions
//! - Recording without an installed exporter is a no-op
//! - Labels stay low-cardinality (no paths, no request ids)

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => tracing::info!(address = %addr, "Prometheus metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install Prometheus exporter"),
    }
}

pub fn record_request(method: &str, status: u16, started: Instant) {
    let labels = [("method", method.to_string()), ("status", status.to_string())];
    metrics::counter!("jerry_http_requests_total", &labels).increment(1);
    metrics::histogram!("jerry_http_request_duration_seconds", &labels).record(started.elapsed().as_secs_f64());
}

pub fn record_message_delivered(queue: &str) {
    metrics::counter!("jerry_messages_delivered_total", "queue" => queue.to_string()).increment(1);
}

pub fn record_handler_error(kind: &'static str) {
    metrics::counter!("jerry_handler_errors_total", "kind" => kind).increment(1);
}

pub fn set_running_states(count: usize) {
    metrics::gauge!("jerry_running_states").set(count as f64);
}
