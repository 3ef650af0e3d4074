//! Shared application state.
//!
//! Holds the immutable pipeline components built once at startup:
//!
//! - **Configuration**: Runtime configuration access
//! - **Sanitizer**: Safe-field set and redaction rules, read-only after construction
//! - **Log sink**: Destination of exchange records
//! - **Incident reporter**: Containment gate and notification worker
//!
//! # Structured Concurrency
//!
//! The incident worker is managed using `tokio_util::task::TaskTracker` and
//! `CancellationToken`. Call `shutdown()` to stop it before application exit.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::config::Config;
use crate::error::AppResult;
use crate::incident::{ContainmentGate, IncidentReporter, IncidentStats};
use crate::middleware::{ExchangeLogger, PanicGuard};
use crate::sanitize::PayloadSanitizer;
use crate::sink::{LogSink, Notifier};

/// Shared application state for Axum handlers and middleware.
///
/// Cloned per request; all components are behind `Arc`.
///
/// # Lifecycle
///
/// Must be created inside a Tokio runtime (the incident worker is spawned
/// immediately). Call `shutdown()` before dropping:
///
/// ```rust,ignore
/// let state = AppState::new(config, Arc::new(TracingLogSink), Arc::new(TracingNotifier))?;
/// // ... serve ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Payload sanitizer shared by every exchange
    pub sanitizer: Arc<PayloadSanitizer>,
    /// Destination of exchange records
    pub sink: Arc<dyn LogSink>,
    /// Incident gate and notification worker
    pub reporter: Arc<IncidentReporter>,
    /// Timestamp when the application started
    pub started_at: Instant,
    /// Tracks spawned background tasks for graceful shutdown
    task_tracker: TaskTracker,
    /// Cancellation token for signaling background tasks to stop
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Build state with the default sanitizer for `config.safe_fields`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Sanitizer` if the safe-field list or a built-in
    /// pattern is invalid.
    pub fn new(
        config: Config,
        sink: Arc<dyn LogSink>,
        notifier: Arc<dyn Notifier>,
    ) -> AppResult<Self> {
        let sanitizer = PayloadSanitizer::new(config.safe_fields()?)?;
        Ok(Self::with_sanitizer(config, sanitizer, sink, notifier))
    }

    /// Build state around an already-constructed sanitizer.
    pub fn with_sanitizer(
        config: Config,
        sanitizer: PayloadSanitizer,
        sink: Arc<dyn LogSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let task_tracker = TaskTracker::new();
        let cancellation_token = CancellationToken::new();

        let reporter = IncidentReporter::spawn(
            notifier,
            ContainmentGate::new(config.gate_config()),
            config.incident_queue_capacity,
            &task_tracker,
            cancellation_token.clone(),
        );

        Self {
            config: Arc::new(config),
            sanitizer: Arc::new(sanitizer),
            sink,
            reporter: Arc::new(reporter),
            started_at: Instant::now(),
            task_tracker,
            cancellation_token,
        }
    }

    /// Exchange logger configured from this state.
    pub fn exchange_logger(&self) -> Arc<ExchangeLogger> {
        Arc::new(ExchangeLogger::new(
            self.sanitizer.clone(),
            self.sink.clone(),
            self.config.exchange_log_settings(),
        ))
    }

    /// Panic guard reporting into this state's incident reporter.
    pub fn panic_guard(&self) -> Arc<PanicGuard> {
        Arc::new(PanicGuard::new(
            self.reporter.clone(),
            self.config.panic_guard_settings(),
        ))
    }

    pub fn incident_stats(&self) -> IncidentStats {
        self.reporter.stats()
    }

    /// Gracefully shutdown all background tasks.
    ///
    /// This method:
    /// 1. Signals all tasks to stop via cancellation token
    /// 2. Closes the task tracker (prevents new tasks)
    /// 3. Waits for all tasks to complete
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
