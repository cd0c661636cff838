//! Metrics collection and export for the discovery server.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const SESSIONS_TOTAL: &str = "discovery_sessions_total";
    pub const SESSIONS_ACTIVE: &str = "discovery_sessions_active";
    pub const MESSAGES_TOTAL: &str = "discovery_messages_total";
    pub const ACKNOWLEDGEMENTS_TOTAL: &str = "discovery_acknowledgements_total";
    pub const NOTIFICATIONS_TOTAL: &str = "discovery_notifications_total";
    pub const SESSION_FAILURES_TOTAL: &str = "discovery_session_failures_total";
    pub const ACCEPT_FAILURES_TOTAL: &str = "discovery_accept_failures_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::SESSIONS_TOTAL,
        "Total number of sessions since server start"
    );
    metrics::describe_gauge!(names::SESSIONS_ACTIVE, "Current number of live sessions");
    metrics::describe_counter!(
        names::MESSAGES_TOTAL,
        "Total number of client messages dispatched"
    );
    metrics::describe_counter!(
        names::ACKNOWLEDGEMENTS_TOTAL,
        "Total number of client messages acknowledged"
    );
    metrics::describe_counter!(
        names::NOTIFICATIONS_TOTAL,
        "Total number of notifications submitted to clients"
    );
    metrics::describe_counter!(
        names::SESSION_FAILURES_TOTAL,
        "Total number of sessions ended by a transport or handler failure"
    );
    metrics::describe_counter!(
        names::ACCEPT_FAILURES_TOTAL,
        "Total number of accept stream failures"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a dispatched client message.
pub fn record_message(kind: &'static str) {
    counter!(names::MESSAGES_TOTAL, "kind" => kind).increment(1);
}

/// Record an acknowledgement sent to a client.
pub fn record_acknowledgement() {
    counter!(names::ACKNOWLEDGEMENTS_TOTAL).increment(1);
}

/// Record a notification submitted to a client.
pub fn record_notification() {
    counter!(names::NOTIFICATIONS_TOTAL).increment(1);
}

/// Record a session ended by a failure of the given kind.
pub fn record_session_failure(kind: &'static str) {
    counter!(names::SESSION_FAILURES_TOTAL, "kind" => kind).increment(1);
}

/// Record a failure of the accept stream.
pub fn record_accept_failure() {
    counter!(names::ACCEPT_FAILURES_TOTAL).increment(1);
}

/// Metrics guard that records the end of a session on drop.
pub struct SessionMetricsGuard;

impl SessionMetricsGuard {
    /// Create a new metrics guard, recording a session start.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::SESSIONS_TOTAL).increment(1);
        gauge!(names::SESSIONS_ACTIVE).increment(1.0);
        Self
    }
}

impl Default for SessionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::SESSIONS_ACTIVE).decrement(1.0);
    }
}
