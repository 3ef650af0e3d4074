//! Boundaries to the external log sink and incident notifier.
//!
//! The pipeline only defines what it hands over. Persistence of exchange
//! records and delivery of incident messages belong to the implementations
//! plugged in here. Failures are reported back as [`SinkError`] and are never
//! surfaced to HTTP clients.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::value::StructuredValue;

/// Errors from sink and notifier implementations.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP delivery failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Sanitized payloads attached to an exchange record.
///
/// Serialized as `{"header": …, "request": …, "response": …}` with absent
/// parts omitted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoggedBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<StructuredValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<StructuredValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<StructuredValue>,
}

/// One completed HTTP exchange, ready for the log sink.
#[derive(Debug, Clone)]
pub struct ExchangeRecord {
    pub status_code: u16,
    pub method: String,
    /// Request target including the query string.
    pub path: String,
    pub remote_ip: String,
    pub referer: String,
    pub user_agent: String,
    pub latency: Duration,
    /// Top-level `"message"` of the JSON response, empty when absent.
    pub message: String,
    pub sanitized_body: LoggedBody,
}

impl ExchangeRecord {
    pub fn latency_millis(&self) -> u64 {
        u64::try_from(self.latency.as_millis()).unwrap_or(u64::MAX)
    }

    /// Sanitized body as a JSON document.
    pub fn body_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.sanitized_body).unwrap_or(serde_json::Value::Null)
    }
}

/// Receives one record per completed exchange.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn log_request(&self, record: ExchangeRecord) -> Result<(), SinkError>;
}

/// Receives formatted incident messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `message`, returning a delivery identifier.
    async fn notify(&self, message: String) -> Result<String, SinkError>;
}

/// Writes exchange records as structured `tracing` events on target `exchange`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

#[async_trait]
impl LogSink for TracingLogSink {
    async fn log_request(&self, record: ExchangeRecord) -> Result<(), SinkError> {
        let body = record.body_json();
        info!(
            target: "exchange",
            status = record.status_code,
            method = %record.method,
            endpoint = %record.path,
            remote_ip = %record.remote_ip,
            referer = %record.referer,
            user_agent = %record.user_agent,
            latency_ms = record.latency_millis(),
            message = %record.message,
            body = %body,
            "HTTP exchange"
        );
        Ok(())
    }
}

/// Writes incident messages to the local log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, message: String) -> Result<String, SinkError> {
        let id = uuid::Uuid::new_v4().to_string();
        warn!(target: "incident", notification_id = %id, "{message}");
        Ok(id)
    }
}

/// Posts incident messages as `{"text": message}` to a webhook (chat bots,
/// alerting gateways).
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    /// Default per-delivery timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// # Errors
    ///
    /// Returns [`SinkError::Http`] if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(Self::DEFAULT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    text: &'a str,
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, message: String) -> Result<String, SinkError> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookPayload { text: &message })
            .send()
            .await?
            .error_for_status()?;

        let id = response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| response.status().as_str().to_string());
        Ok(id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> ExchangeRecord {
        ExchangeRecord {
            status_code: 201,
            method: "POST".to_string(),
            path: "/orders?x=1".to_string(),
            remote_ip: "10.0.0.1".to_string(),
            referer: String::new(),
            user_agent: "test".to_string(),
            latency: Duration::from_micros(2_500),
            message: "created".to_string(),
            sanitized_body: LoggedBody {
                header: None,
                request: Some(StructuredValue::from(json!({"sku": "a"}))),
                response: None,
            },
        }
    }

    #[test]
    fn test_body_json_omits_absent_parts() {
        assert_eq!(record().body_json(), json!({"request": {"sku": "a"}}));
    }

    #[test]
    fn test_empty_body_json() {
        let mut record = record();
        record.sanitized_body = LoggedBody::default();
        assert_eq!(record.body_json(), json!({}));
    }

    #[test]
    fn test_latency_millis() {
        assert_eq!(record().latency_millis(), 2);
    }

    #[tokio::test]
    async fn test_tracing_sink_accepts_record() {
        assert!(TracingLogSink.log_request(record()).await.is_ok());
    }

    #[tokio::test]
    async fn test_tracing_notifier_returns_id() {
        let id = TracingNotifier.notify("boom".to_string()).await.unwrap();
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_webhook_notifier_builds() {
        assert!(WebhookNotifier::new("http://127.0.0.1:9/hook").is_ok());
    }
}
