//! Metrics collection and export for Parley.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use anyhow::Result;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use parley_core::ReplyOutcome;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "parley_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "parley_connections_active";
    pub const PACKETS_TOTAL: &str = "parley_packets_total";
    pub const BYTES_TOTAL: &str = "parley_bytes_total";
    pub const UNKNOWN_PACKETS_TOTAL: &str = "parley_unknown_packets_total";
    pub const REPLIES_TOTAL: &str = "parley_replies_total";
    pub const REQUEST_OUTCOMES_TOTAL: &str = "parley_request_outcomes_total";
    pub const ERRORS_TOTAL: &str = "parley_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::PACKETS_TOTAL, "Packets handled, by kind");
    metrics::describe_counter!(names::BYTES_TOTAL, "Frame bytes, by direction");
    metrics::describe_counter!(
        names::UNKNOWN_PACKETS_TOTAL,
        "Inbound frames that did not decode as packets"
    );
    metrics::describe_counter!(names::REPLIES_TOTAL, "Replies sent to clients");
    metrics::describe_counter!(
        names::REQUEST_OUTCOMES_TOTAL,
        "Server-originated requests, by outcome"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a packet by kind and direction.
pub fn record_packet(kind: &'static str, direction: &'static str) {
    counter!(names::PACKETS_TOTAL, "kind" => kind, "direction" => direction).increment(1);
}

/// Record frame bytes.
pub fn record_bytes(bytes: usize, direction: &'static str) {
    counter!(names::BYTES_TOTAL, "direction" => direction).increment(bytes as u64);
}

/// Record an undecodable frame.
pub fn record_unknown_packet() {
    counter!(names::UNKNOWN_PACKETS_TOTAL).increment(1);
}

/// Record a reply sent.
pub fn record_reply() {
    counter!(names::REPLIES_TOTAL).increment(1);
}

/// Record how a server-originated request ended.
pub fn record_request_outcome(outcome: &ReplyOutcome) {
    let label = match outcome {
        ReplyOutcome::Resolved(_) => "resolved",
        ReplyOutcome::TimedOut => "timed_out",
        ReplyOutcome::Cancelled => "cancelled",
    };
    counter!(names::REQUEST_OUTCOMES_TOTAL, "outcome" => label).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
