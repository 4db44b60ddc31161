//! Metrics collection and export for Beacon.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use beacon_core::{Outcome, RegistryStats};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "beacon_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "beacon_connections_active";
    pub const IDENTITIES_CONNECTED: &str = "beacon_identities_connected";
    pub const SIGNALS_TOTAL: &str = "beacon_signals_total";
    pub const SIGNAL_BYTES: &str = "beacon_signal_bytes_total";
    pub const HEARTBEATS_TOTAL: &str = "beacon_heartbeats_total";
    pub const ROUTING_LATENCY_SECONDS: &str = "beacon_routing_latency_seconds";
    pub const ERRORS_TOTAL: &str = "beacon_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of signaling sessions since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open signaling sessions"
    );
    metrics::describe_gauge!(
        names::IDENTITIES_CONNECTED,
        "Identities with at least one open session"
    );
    metrics::describe_counter!(
        names::SIGNALS_TOTAL,
        "Inbound signaling messages by routing outcome"
    );
    metrics::describe_counter!(names::SIGNAL_BYTES, "Signaling bytes by direction");
    metrics::describe_counter!(names::HEARTBEATS_TOTAL, "Heartbeats received");
    metrics::describe_histogram!(
        names::ROUTING_LATENCY_SECONDS,
        "Time from frame receipt to fan-out in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

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

/// Record a new session.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a closed session.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record the routing outcome of an inbound message.
pub fn record_signal(outcome: &Outcome) {
    counter!(names::SIGNALS_TOTAL, "outcome" => outcome.label()).increment(1);
}

/// Record signaling traffic.
pub fn record_bytes(bytes: usize, direction: &'static str) {
    counter!(names::SIGNAL_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record a heartbeat.
pub fn record_heartbeat() {
    counter!(names::HEARTBEATS_TOTAL).increment(1);
}

/// Record routing latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::ROUTING_LATENCY_SECONDS).record(seconds);
}

/// Update registry gauges.
pub fn set_registry_stats(stats: RegistryStats) {
    gauge!(names::IDENTITIES_CONNECTED).set(stats.identity_count as f64);
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

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::DropReason;

    #[test]
    fn test_metrics_guard() {
        // No recorder installed; must not panic.
        let _guard = ConnectionMetricsGuard::new();
    }

    #[test]
    fn test_record_without_recorder() {
        record_signal(&Outcome::Delivered { recipients: 2 });
        record_signal(&Outcome::Dropped(DropReason::UnresolvedTarget("9999".into())));
        record_bytes(128, "inbound");
        set_registry_stats(RegistryStats {
            identity_count: 1,
            session_count: 2,
        });
    }
}
