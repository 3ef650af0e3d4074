//! Health endpoint.
//!
//! `GET /health` always returns 200 with details in the body. The status is
//! `degraded` while the containment gate is suppressing incident
//! notifications, i.e. the service is panicking repeatedly.

use axum::Json;
use axum::extract::State;
use chrono::Utc;
use tracing::instrument;

use crate::incident::GateState;
use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "healthy",
///   "log_request": true,
///   "incidents": {"gate": "reporting", "admitted": 0, "suppressed": 0, ...},
///   "uptime_seconds": 3600,
///   "version": "0.1.0",
///   "timestamp": "2026-01-15T10:30:00Z"
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let incidents = state.incident_stats();

    Json(HealthResponse {
        status: match incidents.gate {
            GateState::Reporting => "healthy",
            GateState::Suppressed => "degraded",
        }
        .to_string(),
        log_request: state.config.log_request,
        incidents,
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    })
}
