//! Metrics collection and exposition.
//!
//! # Metrics
//! - `monitor_spans_finished_total` (counter): spans by operation, status
//! - `monitor_captures_total` (counter): captures by kind, accepted
//! - `monitor_sink_deliveries_total` (counter): remote deliveries by outcome
//! - `monitor_http_requests_total` (counter): monitored requests by method, status
//! - `monitor_http_request_duration_seconds` (histogram): monitored request latency
//!
//! # Design Decisions
//! - Labels are bounded: operation and status come from fixed vocabularies
//! - Without an installed recorder every call is a no-op

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

use crate::monitor::SpanStatus;

/// Start the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_span_finished(operation: &str, status: SpanStatus) {
    metrics::counter!(
        "monitor_spans_finished_total",
        "operation" => operation.to_string(),
        "status" => status.as_str()
    )
    .increment(1);
}

/// `kind` is "error" or "message".
pub fn record_capture(kind: &'static str, accepted: bool) {
    metrics::counter!(
        "monitor_captures_total",
        "kind" => kind,
        "accepted" => if accepted { "true" } else { "false" }
    )
    .increment(1);
}

pub fn record_sink_delivery(success: bool) {
    metrics::counter!(
        "monitor_sink_deliveries_total",
        "outcome" => if success { "delivered" } else { "dropped" }
    )
    .increment(1);
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    metrics::counter!(
        "monitor_http_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!(
        "monitor_http_request_duration_seconds",
        "method" => method.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}
