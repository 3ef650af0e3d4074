use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::incident::IncidentStats;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service health status: `healthy`, or `degraded` while incident
    /// notifications are suppressed
    pub status: String,
    /// Whether exchange logging is enabled
    pub log_request: bool,
    /// Incident pipeline counters
    pub incidents: IncidentStats,
    /// Seconds since startup
    pub uptime_seconds: u64,
    /// Service version
    pub version: String,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
}

/// Response of the echo endpoint.
#[derive(Debug, Serialize)]
pub struct EchoResponse {
    /// Human-readable outcome, copied into the exchange record
    pub message: String,
    /// The request payload as received
    pub data: serde_json::Value,
    /// Timestamp of handling
    pub timestamp: DateTime<Utc>,
}
