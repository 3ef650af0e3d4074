//! Prometheus metrics for exchange logging and panic recovery.
//!
//! Metrics are exposed via a dedicated HTTP listener when `METRICS_PORT` is
//! non-zero. Recording functions are no-ops until a recorder is installed.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `exchange_requests_total` - Logged exchanges (labels: method, status)
//! - `exchange_sink_failures_total` - Log sink errors and timeouts
//! - `incidents_reported_total` - Incidents queued for notification
//! - `incidents_suppressed_total` - Incidents dropped by the containment gate
//! - `incidents_dropped_total` - Incidents dropped because the queue was full
//! - `panics_recovered_total` - Handler panics caught (label: kind)
//!
//! ## Histograms
//! - `exchange_request_duration_seconds` - Exchange latency including body streaming

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const EXCHANGE_REQUESTS_TOTAL: &str = "exchange_requests_total";
    pub const EXCHANGE_REQUEST_DURATION_SECONDS: &str = "exchange_request_duration_seconds";
    pub const EXCHANGE_SINK_FAILURES_TOTAL: &str = "exchange_sink_failures_total";
    pub const INCIDENTS_REPORTED_TOTAL: &str = "incidents_reported_total";
    pub const INCIDENTS_SUPPRESSED_TOTAL: &str = "incidents_suppressed_total";
    pub const INCIDENTS_DROPPED_TOTAL: &str = "incidents_dropped_total";
    pub const PANICS_RECOVERED_TOTAL: &str = "panics_recovered_total";
}

/// Install the Prometheus exporter and describe all metrics.
///
/// # Errors
///
/// Returns a message if the exporter cannot be installed (address in use,
/// recorder already set).
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::EXCHANGE_REQUESTS_TOTAL,
        "Total number of HTTP exchanges handed to the log sink"
    );
    describe_counter!(
        names::EXCHANGE_SINK_FAILURES_TOTAL,
        "Total number of log sink deliveries that failed or timed out"
    );
    describe_counter!(
        names::INCIDENTS_REPORTED_TOTAL,
        "Total number of incidents queued for notification"
    );
    describe_counter!(
        names::INCIDENTS_SUPPRESSED_TOTAL,
        "Total number of incidents dropped by the containment gate"
    );
    describe_counter!(
        names::INCIDENTS_DROPPED_TOTAL,
        "Total number of incidents dropped because the notification queue was full"
    );
    describe_counter!(
        names::PANICS_RECOVERED_TOTAL,
        "Total number of handler panics recovered"
    );

    describe_histogram!(
        names::EXCHANGE_REQUEST_DURATION_SECONDS,
        "HTTP exchange duration in seconds, including response streaming"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

/// Record a logged exchange and its latency.
pub fn record_exchange(method: &str, status: u16, duration_secs: f64) {
    counter!(
        names::EXCHANGE_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(names::EXCHANGE_REQUEST_DURATION_SECONDS).record(duration_secs);
}

pub fn record_sink_failure() {
    counter!(names::EXCHANGE_SINK_FAILURES_TOTAL).increment(1);
}

pub fn record_incident_reported() {
    counter!(names::INCIDENTS_REPORTED_TOTAL).increment(1);
}

pub fn record_incident_suppressed() {
    counter!(names::INCIDENTS_SUPPRESSED_TOTAL).increment(1);
}

pub fn record_incident_dropped() {
    counter!(names::INCIDENTS_DROPPED_TOTAL).increment(1);
}

/// Record a recovered panic. `kind` is `internal` or `payload_too_large`.
pub fn record_panic_recovered(kind: &'static str) {
    counter!(names::PANICS_RECOVERED_TOTAL, "kind" => kind).increment(1);
}
