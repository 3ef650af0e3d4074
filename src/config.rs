//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//!
//! # Exchange Logging
//!
//! - `LOG_REQUEST`: Capture and log request/response exchanges (default: false)
//! - `SAFE_FIELDS`: Comma-separated payload keys never logged (default: built-in list)
//! - `MAX_REQUEST_BODY_SIZE`: Largest request body buffered, in bytes (default: 10MB)
//! - `LOG_SINK_TIMEOUT_MS`: Upper bound on one log sink delivery (default: 2000)
//!
//! # Panic Recovery
//!
//! - `PANIC_PRINT_STACK`: Log parsed stacks on recovery (default: true)
//! - `PANIC_STACK_MAX_FRAMES`: Frames kept per incident (default: 32)
//! - `INCIDENT_THRESHOLD` / `INCIDENT_WINDOW_SECS` / `INCIDENT_COOLDOWN_SECS`:
//!   containment gate policy (default: 3 per 60s, 60s cool-down)
//! - `INCIDENT_QUEUE_CAPACITY`: Notification queue depth (default: 64)
//! - `INCIDENT_WEBHOOK_URL`: Webhook for incident messages (default: local log only)

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::incident::GateConfig;
use crate::middleware::{ExchangeLogSettings, PanicGuardSettings};
use crate::sanitize::{DEFAULT_SAFE_FIELDS, SafeFields};

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}' (expected pretty or json)")),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// let sanitizer = PayloadSanitizer::new(config.safe_fields()?)?;
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    // =========================================================================
    // Exchange Logging Configuration
    // =========================================================================
    /// Capture and log request/response exchanges (default: false)
    pub log_request: bool,

    /// Payload keys stripped before logging
    pub safe_fields: Vec<String>,

    /// Maximum request body size in bytes (default: 10MB)
    pub max_request_body_size: usize,

    /// Upper bound on a single log sink delivery (default: 2s)
    pub log_sink_timeout: Duration,

    // =========================================================================
    // Panic Recovery Configuration
    // =========================================================================
    /// Log the parsed stack on recovery (default: true)
    pub panic_print_stack: bool,

    /// Frames kept per incident (default: 32)
    pub panic_stack_max_frames: usize,

    /// Incidents admitted per window before suppression (default: 3)
    pub incident_threshold: u32,

    /// Sliding window for the containment gate (default: 60s)
    pub incident_window: Duration,

    /// Suppression period once the gate trips (default: 60s)
    pub incident_cooldown: Duration,

    /// Notification queue depth (default: 64)
    pub incident_queue_capacity: usize,

    /// Webhook receiving incident messages; `None` logs them locally
    pub incident_webhook_url: Option<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Log output format (default: pretty)
    pub log_format: LogFormat,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any value fails to parse or the
    /// resulting configuration is inconsistent.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 3000)?,

            // Exchange logging
            log_request: Self::parse_env("LOG_REQUEST", false)?,
            safe_fields: Self::parse_safe_fields(),
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 10 * 1024 * 1024)?,
            log_sink_timeout: Duration::from_millis(Self::parse_env("LOG_SINK_TIMEOUT_MS", 2000)?),

            // Panic recovery
            panic_print_stack: Self::parse_env("PANIC_PRINT_STACK", true)?,
            panic_stack_max_frames: Self::parse_env("PANIC_STACK_MAX_FRAMES", 32)?,
            incident_threshold: Self::parse_env("INCIDENT_THRESHOLD", 3)?,
            incident_window: Duration::from_secs(Self::parse_env("INCIDENT_WINDOW_SECS", 60)?),
            incident_cooldown: Duration::from_secs(Self::parse_env("INCIDENT_COOLDOWN_SECS", 60)?),
            incident_queue_capacity: Self::parse_env("INCIDENT_QUEUE_CAPACITY", 64)?,
            incident_webhook_url: env::var("INCIDENT_WEBHOOK_URL")
                .ok()
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty()),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_format: Self::parse_env("LOG_FORMAT", LogFormat::Pretty)?,
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.log_sink_timeout.is_zero() {
            return Err(AppError::ConfigError(
                "LOG_SINK_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }

        if self.incident_threshold == 0 {
            return Err(AppError::ConfigError(
                "INCIDENT_THRESHOLD must be greater than 0".to_string(),
            ));
        }

        if self.incident_window.is_zero() {
            return Err(AppError::ConfigError(
                "INCIDENT_WINDOW_SECS must be greater than 0".to_string(),
            ));
        }

        if self.incident_queue_capacity == 0 {
            return Err(AppError::ConfigError(
                "INCIDENT_QUEUE_CAPACITY must be greater than 0".to_string(),
            ));
        }

        if let Some(url) = &self.incident_webhook_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(AppError::ConfigError(format!(
                "INCIDENT_WEBHOOK_URL must be an http(s) URL, got '{url}'"
            )));
        }

        self.safe_fields()
            .map_err(|e| AppError::ConfigError(format!("Invalid SAFE_FIELDS: {e}")))?;

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validated safe-field set.
    ///
    /// # Errors
    ///
    /// Returns the sanitizer's validation error for empty or duplicate names.
    pub fn safe_fields(&self) -> Result<SafeFields, crate::sanitize::SanitizerError> {
        SafeFields::new(&self.safe_fields)
    }

    pub fn exchange_log_settings(&self) -> ExchangeLogSettings {
        ExchangeLogSettings {
            enabled: self.log_request,
            max_body_size: self.max_request_body_size,
            sink_timeout: self.log_sink_timeout,
        }
    }

    pub fn panic_guard_settings(&self) -> PanicGuardSettings {
        PanicGuardSettings {
            print_stack: self.panic_print_stack,
            max_frames: self.panic_stack_max_frames,
        }
    }

    pub fn gate_config(&self) -> GateConfig {
        GateConfig::new(
            self.incident_threshold,
            self.incident_window,
            self.incident_cooldown,
        )
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        if self.metrics_enabled() {
            Some(std::net::SocketAddr::from((
                [0, 0, 0, 0],
                self.metrics_port,
            )))
        } else {
            None
        }
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse the safe-field list. Empty entries are kept so that validation
    /// can reject them.
    fn parse_safe_fields() -> Vec<String> {
        match env::var("SAFE_FIELDS") {
            Ok(list) if !list.trim().is_empty() => {
                list.split(',').map(|s| s.trim().to_string()).collect()
            }
            _ => default_safe_fields(),
        }
    }
}

fn default_safe_fields() -> Vec<String> {
    DEFAULT_SAFE_FIELDS.iter().map(|s| s.to_string()).collect()
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 3000,
            // Exchange logging
            log_request: false,
            safe_fields: default_safe_fields(),
            max_request_body_size: 10 * 1024 * 1024, // 10MB
            log_sink_timeout: Duration::from_secs(2),
            // Panic recovery
            panic_print_stack: true,
            panic_stack_max_frames: 32,
            incident_threshold: 3,
            incident_window: Duration::from_secs(60),
            incident_cooldown: Duration::from_secs(60),
            incident_queue_capacity: 64,
            incident_webhook_url: None,
            // Observability
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_port: 9090,
        }
    }
}
