//! Request/response capture and logging middleware.
//!
//! # Flow
//!
//! ```text
//! Request ──► buffer body (Limited) ──► rebuild request ──► inner service
//!                                                               │
//! Client ◄── RecordingBody (tee) ◄──────────────────────────────┘
//!                  │ end of stream / drop
//!                  ▼
//!        decode JSON → sanitize → ExchangeRecord → LogSink (bounded, detached)
//! ```
//!
//! Nothing in this path changes what the client receives, except when the
//! request body itself cannot be read (413 for oversized bodies, 400 for
//! broken streams). Malformed JSON and sink failures are swallowed.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{HeaderMap, Request, Response, StatusCode, header};
use axum::response::IntoResponse;
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use tower::{Layer, Service};
use tracing::{Instrument, debug, error, warn};

use super::ip::resolve_client_ip;
use super::recorder::{CaptureEnd, RecordingBody, ResponseRecorder};
use crate::metrics;
use crate::sanitize::PayloadSanitizer;
use crate::sink::{ExchangeRecord, LogSink, LoggedBody, SinkError};
use crate::value::StructuredValue;

/// Runtime knobs for [`ExchangeLogger`].
#[derive(Debug, Clone)]
pub struct ExchangeLogSettings {
    /// When `false` the layer is a pass-through.
    pub enabled: bool,
    /// Largest request body that is buffered; larger bodies get 413.
    pub max_body_size: usize,
    /// Upper bound on a single sink delivery.
    pub sink_timeout: Duration,
}

impl Default for ExchangeLogSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_body_size: 10 * 1024 * 1024,
            sink_timeout: Duration::from_secs(2),
        }
    }
}

/// Request attributes captured before the request is handed downstream.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub method: String,
    pub path: String,
    pub host: String,
    pub remote_ip: String,
    pub referer: String,
    pub user_agent: String,
    pub headers: HeaderMap,
}

impl RequestMeta {
    pub fn from_request<B>(req: &Request<B>) -> Self {
        let header_str = |name: header::HeaderName| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };

        let host = req
            .uri()
            .authority()
            .map(|a| a.as_str().to_string())
            .unwrap_or_else(|| header_str(header::HOST));

        Self {
            method: req.method().as_str().to_string(),
            path: req
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string()),
            host,
            remote_ip: resolve_client_ip(req).into_owned(),
            referer: header_str(header::REFERER),
            user_agent: header_str(header::USER_AGENT),
            headers: req.headers().clone(),
        }
    }

    fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

/// Builds and delivers exchange records.
pub struct ExchangeLogger {
    sanitizer: Arc<PayloadSanitizer>,
    sink: Arc<dyn LogSink>,
    settings: ExchangeLogSettings,
}

impl ExchangeLogger {
    pub fn new(
        sanitizer: Arc<PayloadSanitizer>,
        sink: Arc<dyn LogSink>,
        settings: ExchangeLogSettings,
    ) -> Self {
        Self {
            sanitizer,
            sink,
            settings,
        }
    }

    pub fn settings(&self) -> &ExchangeLogSettings {
        &self.settings
    }

    /// Assemble the record for a finished exchange.
    ///
    /// `request_body` is `None` when the body could not be read completely.
    pub fn build_record(
        &self,
        meta: &RequestMeta,
        request_body: Option<&[u8]>,
        recorder: &ResponseRecorder,
        latency: Duration,
    ) -> ExchangeRecord {
        let header = Some(
            self.sanitizer
                .sanitized(&StructuredValue::from_headers(&meta.headers)),
        );

        let request = request_body
            .filter(|_| is_json(meta.content_type()))
            .and_then(|bytes| self.decode(bytes, "request"));

        let response = if is_json(recorder.content_type()) {
            self.decode(recorder.captured_body(), "response")
        } else {
            None
        };

        let message = response
            .as_ref()
            .and_then(|r| r.get_str("message"))
            .unwrap_or_default()
            .to_string();

        ExchangeRecord {
            status_code: recorder.status_code().map(|s| s.as_u16()).unwrap_or(0),
            method: meta.method.clone(),
            path: meta.path.clone(),
            remote_ip: meta.remote_ip.clone(),
            referer: meta.referer.clone(),
            user_agent: meta.user_agent.clone(),
            latency,
            message,
            sanitized_body: LoggedBody {
                header,
                request,
                response,
            },
        }
    }

    /// Hand a record to the sink, bounded by the configured timeout.
    ///
    /// Failures are logged locally and otherwise ignored.
    pub async fn deliver(&self, record: ExchangeRecord) {
        metrics::record_exchange(
            &record.method,
            record.status_code,
            record.latency.as_secs_f64(),
        );

        if let Err(e) = self.send_to_sink(record).await {
            metrics::record_sink_failure();
            warn!(error = %e, "Log sink did not accept exchange record");
        }
    }

    async fn send_to_sink(&self, record: ExchangeRecord) -> Result<(), SinkError> {
        let timeout = self.settings.sink_timeout;
        tokio::time::timeout(timeout, self.sink.log_request(record))
            .await
            .unwrap_or_else(|_| Err(SinkError::Timeout(timeout)))
    }

    fn decode(&self, bytes: &[u8], part: &'static str) -> Option<StructuredValue> {
        if bytes.is_empty() {
            return None;
        }
        match StructuredValue::from_json_slice(bytes) {
            Ok(mut value) => {
                self.sanitizer.sanitize(&mut value);
                Some(value)
            }
            Err(e) => {
                debug!(part, error = %e, "Body is not valid JSON, omitting from exchange record");
                None
            }
        }
    }
}

/// Whether a content type's media-type essence is `application/json`.
fn is_json(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.split(';').next())
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case("application/json"))
}

/// Local diagnostic line for non-2xx exchanges.
///
/// Format: `<status> | (<ip>) <host> | <method> <path> :: <message>`.
pub fn report_failure(record: &ExchangeRecord, host: &str) {
    let status = record.status_code;
    if (200..300).contains(&status) || record.path.len() <= 1 {
        return;
    }

    let mut line = format!(
        "{status} | ({}) {host} | {} {}",
        record.remote_ip, record.method, record.path
    );
    if !record.message.is_empty() {
        line.push_str(" :: ");
        line.push_str(&record.message);
    }

    match status {
        401 | 403 => warn!("{line} (The client does not have access rights to the content)"),
        404 => warn!("{line} (The server can not find the requested resource)"),
        429 => warn!("{line} (The user has sent too many requests in a given amount of time)"),
        400..=499 => warn!("{line}"),
        500..=599 => {
            error!("{line} (The server has encountered a situation it does not know how to handle)")
        }
        _ => {}
    }
}

/// Tower layer installing [`ExchangeLogger`] around a service.
#[derive(Clone)]
pub struct ExchangeLogLayer {
    logger: Arc<ExchangeLogger>,
}

impl ExchangeLogLayer {
    pub fn new(logger: Arc<ExchangeLogger>) -> Self {
        Self { logger }
    }
}

impl<S> Layer<S> for ExchangeLogLayer {
    type Service = ExchangeLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ExchangeLogService {
            inner,
            logger: self.logger.clone(),
        }
    }
}

/// Service produced by [`ExchangeLogLayer`].
#[derive(Clone)]
pub struct ExchangeLogService<S> {
    inner: S,
    logger: Arc<ExchangeLogger>,
}

impl<S> Service<Request<Body>> for ExchangeLogService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();
        if !self.logger.settings.enabled {
            return Box::pin(async move { inner.call(req).await });
        }

        let logger = self.logger.clone();

        Box::pin(async move {
            let started = Instant::now();
            let meta = RequestMeta::from_request(&req);
            let (parts, body) = req.into_parts();

            let request_body = match read_body(body, logger.settings.max_body_size).await {
                Ok(bytes) => bytes,
                Err(status) => {
                    let response = (status, status.canonical_reason().unwrap_or_default())
                        .into_response();
                    let mut recorder = ResponseRecorder::new();
                    recorder.set_status(status);
                    let record = logger.build_record(&meta, None, &recorder, started.elapsed());
                    report_failure(&record, &meta.host);
                    spawn_delivery(logger, record);
                    return Ok(response);
                }
            };

            let req = Request::from_parts(parts, Body::from(request_body.clone()));
            let response = inner.call(req).await?;

            let (parts, body) = response.into_parts();
            let mut recorder = ResponseRecorder::new();
            recorder.set_status(parts.status);
            recorder.set_headers(&parts.headers);
            let (body, captured) = RecordingBody::new(body, recorder);

            tokio::spawn(
                async move {
                    let Ok((recorder, end)) = captured.await else {
                        return;
                    };
                    if end != CaptureEnd::Complete {
                        debug!(?end, "Response body not fully delivered, logging partial capture");
                    }
                    let record = logger.build_record(
                        &meta,
                        Some(&request_body),
                        &recorder,
                        started.elapsed(),
                    );
                    report_failure(&record, &meta.host);
                    logger.deliver(record).await;
                }
                .in_current_span(),
            );

            Ok(Response::from_parts(parts, Body::new(body)))
        })
    }
}

fn spawn_delivery(logger: Arc<ExchangeLogger>, record: ExchangeRecord) {
    tokio::spawn(async move { logger.deliver(record).await }.in_current_span());
}

/// Buffer the request body, mapping read failures to the status sent back.
async fn read_body(body: Body, limit: usize) -> Result<Bytes, StatusCode> {
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            warn!(limit, "Request body exceeds capture limit");
            Err(StatusCode::PAYLOAD_TOO_LARGE)
        }
        Err(e) => {
            warn!(error = %e, "Failed to read request body");
            Err(StatusCode::BAD_REQUEST)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::sanitize::{PhoneValidator, SafeFields};
    use async_trait::async_trait;
    use axum::http::HeaderValue;
    use serde_json::json;
    use tokio::sync::Mutex;

    struct NoPhones;

    impl PhoneValidator for NoPhones {
        fn is_phone_number(&self, _candidate: &str) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct MemorySink {
        records: Mutex<Vec<ExchangeRecord>>,
    }

    #[async_trait]
    impl LogSink for MemorySink {
        async fn log_request(&self, record: ExchangeRecord) -> Result<(), SinkError> {
            self.records.lock().await.push(record);
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl LogSink for FailingSink {
        async fn log_request(&self, _record: ExchangeRecord) -> Result<(), SinkError> {
            Err(SinkError::Unavailable("down".to_string()))
        }
    }

    struct SlowSink;

    #[async_trait]
    impl LogSink for SlowSink {
        async fn log_request(&self, _record: ExchangeRecord) -> Result<(), SinkError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    fn logger(sink: Arc<dyn LogSink>) -> ExchangeLogger {
        let sanitizer =
            PayloadSanitizer::with_phone_validator(SafeFields::default(), Arc::new(NoPhones))
                .unwrap();
        ExchangeLogger::new(Arc::new(sanitizer), sink, ExchangeLogSettings::default())
    }

    fn json_request(body: &str) -> (RequestMeta, Vec<u8>) {
        let req = Request::builder()
            .method("POST")
            .uri("/orders?draft=true")
            .header("content-type", "application/json; charset=utf-8")
            .header("authorization", "Bearer secret")
            .header("user-agent", "curl/8.0")
            .header("referer", "https://shop.example.com/")
            .header("x-forwarded-for", "198.51.100.7")
            .body(Body::empty())
            .unwrap();
        (RequestMeta::from_request(&req), body.as_bytes().to_vec())
    }

    fn json_response(status: StatusCode, body: &str) -> ResponseRecorder {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        let mut recorder = ResponseRecorder::new();
        recorder.set_status(status);
        recorder.set_headers(&headers);
        recorder.write(body.as_bytes());
        recorder
    }

    #[test]
    fn test_is_json() {
        assert!(is_json(Some("application/json")));
        assert!(is_json(Some("Application/JSON; charset=utf-8")));
        assert!(!is_json(Some("text/plain")));
        assert!(!is_json(Some("application/jsonp")));
        assert!(!is_json(None));
    }

    #[test]
    fn test_build_record_sanitizes_all_parts() {
        let logger = logger(Arc::new(MemorySink::default()));
        let (meta, body) = json_request(r#"{"email":"john.doe@example.com","token":"t"}"#);
        let recorder = json_response(
            StatusCode::CREATED,
            r#"{"message":"created","card":"4111111111111111"}"#,
        );

        let record = logger.build_record(&meta, Some(&body), &recorder, Duration::from_millis(12));

        assert_eq!(record.status_code, 201);
        assert_eq!(record.method, "POST");
        assert_eq!(record.path, "/orders?draft=true");
        assert_eq!(record.remote_ip, "198.51.100.7");
        assert_eq!(record.referer, "https://shop.example.com/");
        assert_eq!(record.user_agent, "curl/8.0");
        assert_eq!(record.message, "created");
        assert_eq!(record.latency_millis(), 12);

        let body = record.body_json();
        assert_eq!(body["request"], json!({"email": "j*hn.d**@example.com"}));
        assert_eq!(
            body["response"],
            json!({"message": "created", "card": "411*************"})
        );
        assert!(body["header"].get("authorization").is_none());
        assert_eq!(body["header"]["user-agent"], json!(["curl/8.0"]));
    }

    #[test]
    fn test_malformed_json_is_omitted() {
        let logger = logger(Arc::new(MemorySink::default()));
        let (meta, body) = json_request("{broken");
        let recorder = json_response(StatusCode::OK, "not json either");

        let record = logger.build_record(&meta, Some(&body), &recorder, Duration::ZERO);
        let body = record.body_json();

        assert!(body.get("request").is_none());
        assert!(body.get("response").is_none());
        assert!(body.get("header").is_some());
        assert_eq!(record.message, "");
    }

    #[test]
    fn test_non_json_bodies_are_not_decoded() {
        let logger = logger(Arc::new(MemorySink::default()));
        let req = Request::builder()
            .method("POST")
            .uri("/upload")
            .header("content-type", "text/plain")
            .body(Body::empty())
            .unwrap();
        let meta = RequestMeta::from_request(&req);
        let mut recorder = ResponseRecorder::new();
        recorder.write(br#"{"message":"plain"}"#);

        let record = logger.build_record(&meta, Some(br#"{"a":1}"#), &recorder, Duration::ZERO);
        let body = record.body_json();

        assert!(body.get("request").is_none());
        assert!(body.get("response").is_none());
        assert_eq!(record.status_code, 200);
    }

    #[test]
    fn test_missing_request_body_is_omitted() {
        let logger = logger(Arc::new(MemorySink::default()));
        let (meta, _) = json_request("{}");
        let mut recorder = ResponseRecorder::new();
        recorder.set_status(StatusCode::PAYLOAD_TOO_LARGE);

        let record = logger.build_record(&meta, None, &recorder, Duration::ZERO);

        assert_eq!(record.status_code, 413);
        assert!(record.body_json().get("request").is_none());
    }

    #[tokio::test]
    async fn test_deliver_reaches_sink() {
        let sink = Arc::new(MemorySink::default());
        let logger = logger(sink.clone());
        let (meta, body) = json_request("{}");
        let record = logger.build_record(
            &meta,
            Some(&body),
            &json_response(StatusCode::OK, "{}"),
            Duration::ZERO,
        );

        logger.deliver(record).await;

        assert_eq!(sink.records.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_deliver_swallows_sink_errors() {
        let logger = logger(Arc::new(FailingSink));
        let (meta, _) = json_request("{}");
        let record = logger.build_record(&meta, None, &ResponseRecorder::new(), Duration::ZERO);

        logger.deliver(record).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliver_is_bounded_by_timeout() {
        let logger = logger(Arc::new(SlowSink));
        let (meta, _) = json_request("{}");
        let record = logger.build_record(&meta, None, &ResponseRecorder::new(), Duration::ZERO);

        let started = tokio::time::Instant::now();
        logger.deliver(record).await;

        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_sink_reports_timeout_error() {
        let logger = logger(Arc::new(SlowSink));
        let (meta, _) = json_request("{}");
        let record = logger.build_record(&meta, None, &ResponseRecorder::new(), Duration::ZERO);

        let err = logger.send_to_sink(record).await.unwrap_err();
        assert!(matches!(err, SinkError::Timeout(d) if d == Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn test_read_body_limit() {
        let body = Body::from(vec![b'x'; 32]);
        assert_eq!(
            read_body(body, 16).await.unwrap_err(),
            StatusCode::PAYLOAD_TOO_LARGE
        );

        let body = Body::from("small");
        assert_eq!(&read_body(body, 16).await.unwrap()[..], b"small");
    }
}
