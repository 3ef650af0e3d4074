//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response spans
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │ Exchange Logger  │ ← buffers request, tees response, sanitized record → LogSink
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │   Panic Guard    │ ← panic → 500 / 413 + incident
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │  Body Limit      │ ← extractor limit (413)
//! └────────┬─────────┘
//!          │
//!          ▼
//!      Handler
//! ```
//!
//! The guard sits inside the logger so that recovered failures are logged
//! with the status the client actually received.
//!
//! # Routes
//!
//! - `GET /health` - Health and incident counters
//! - `POST /echo` - Echo a JSON payload

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers;
use crate::middleware::{ExchangeLogLayer, PanicGuardLayer};
use crate::state::AppState;

/// Build the demonstration router with the full middleware stack.
pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/echo", post(handlers::echo))
        .with_state(state.clone());

    with_pipeline(router, &state)
}

/// Wrap an arbitrary router in the body limit, panic guard, exchange logger
/// and tracing layers.
pub fn with_pipeline(router: Router, state: &AppState) -> Router {
    let config = &state.config;

    info!(
        max_size_mb = config.max_request_body_size / (1024 * 1024),
        "Request body size limit configured"
    );
    if config.log_request {
        info!(
            safe_fields = state.sanitizer.safe_fields().len(),
            sink_timeout = ?config.log_sink_timeout,
            "Exchange logging enabled"
        );
    } else {
        info!("Exchange logging disabled (LOG_REQUEST=false)");
    }

    // Applied bottom to top: the last layer added runs first.
    router
        .layer(DefaultBodyLimit::max(config.max_request_body_size))
        .layer(PanicGuardLayer::new(state.panic_guard()))
        .layer(ExchangeLogLayer::new(state.exchange_logger()))
        .layer(TraceLayer::new_for_http())
}
