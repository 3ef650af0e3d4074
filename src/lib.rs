//! # Exchange Guard
//!
//! HTTP middleware that records every request/response exchange with
//! sensitive data redacted, and converts handler panics into controlled
//! failure responses plus rate-limited incident notifications.
//!
//! - **Exchange logging**: Request and response bodies are captured, decoded
//!   when JSON, sanitized, and handed to a [`LogSink`](sink::LogSink)
//! - **Redaction**: Credential fields are removed; emails, card numbers,
//!   phone numbers, and base64 data URIs are masked
//! - **Panic recovery**: Panics become `500 (panic) <cause>` (or 413 for
//!   oversized bodies) and an [`Incident`](incident::Incident)
//! - **Containment**: A sliding-window gate and a bounded queue keep crash
//!   loops from flooding the [`Notifier`](sink::Notifier)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middleware (Trace → ExchangeLogger → PanicGuard → Limit)   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (any axum Router)                                 │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │  PayloadSanitizer → LogSink  │  IncidentReporter → Notifier │
//! └──────────────────────────────┴──────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use exchange_guard::{AppState, Config, build_router};
//! use exchange_guard::sink::{TracingLogSink, TracingNotifier};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config, Arc::new(TracingLogSink), Arc::new(TracingNotifier))?;
//!     let app = build_router(state);
//!
//!     // Start the server...
//!     Ok(())
//! }
//! ```
//!
//! ## Wrapping an existing router
//!
//! ```rust,ignore
//! let app = exchange_guard::routes::with_pipeline(my_router, &state);
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod incident;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod sanitize;
pub mod sink;
pub mod state;
pub mod utils;
pub mod value;

// Re-exports for convenience
pub use config::{Config, LogFormat};
pub use error::{AppError, AppResult};
pub use routes::{build_router, with_pipeline};
pub use sanitize::{PayloadSanitizer, SafeFields};
pub use state::AppState;
pub use value::StructuredValue;
