//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define server metrics (requests, latency, parse errors, connections)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `h1_wire_requests_total` (counter): requests by method, status
//! - `h1_wire_request_duration_seconds` (histogram): handling latency
//! - `h1_wire_active_connections` (gauge): current connection count
//! - `h1_wire_parse_errors_total` (counter): framing failures by kind
//! - `h1_wire_ws_frames_total` (counter): WebSocket frames by direction, opcode
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Labels are static strings or small bounded sets

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one completed request.
pub fn record_request(method: &str, status: u16, start: Instant) {
    ::metrics::counter!(
        "h1_wire_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    ::metrics::histogram!("h1_wire_request_duration_seconds")
        .record(start.elapsed().as_secs_f64());
}

/// Record a framing failure while reading a request.
pub fn record_parse_error(kind: &'static str) {
    ::metrics::counter!("h1_wire_parse_errors_total", "kind" => kind).increment(1);
}

/// Track the number of open connections.
pub fn set_active_connections(count: u64) {
    ::metrics::gauge!("h1_wire_active_connections").set(count as f64);
}

/// Record one WebSocket frame.
pub fn record_ws_frame(direction: &'static str, opcode: &'static str) {
    ::metrics::counter!(
        "h1_wire_ws_frames_total",
        "direction" => direction,
        "opcode" => opcode
    )
    .increment(1);
}
