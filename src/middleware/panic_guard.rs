//! Panic recovery middleware.
//!
//! Converts a panic inside the wrapped service into a response and an
//! [`Incident`] for the reporter.
//!
//! # States
//!
//! ```text
//! Normal ──(panic during poll)──► Recovering ──(response built)──► Normal
//!                                     │
//!                                     ├─ PayloadTooLarge / UnexpectedEof ──► 413, no incident
//!                                     └─ anything else ──► 500 "(panic) <cause>" + IncidentReporter
//! ```
//!
//! # Stack capture
//!
//! [`install_panic_hook`] installs a process-wide hook once. While a guarded
//! future is being polled on the current thread the hook stores a backtrace
//! and the panic location in a thread-local slot instead of printing; outside
//! guarded polls the previous hook runs unchanged.
//!
//! Panics raised while the response body is streamed happen after the guard
//! has returned and are not caught here.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::{Arc, Once};
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::{debug, error, warn};

use crate::incident::{Incident, IncidentReporter, PanicCause, StackFrame};
use crate::metrics;

/// Panic payload signalling an oversized or truncated request body.
///
/// `std::panic::panic_any(PayloadTooLarge)` answers 413 without reporting an
/// incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadTooLarge;

impl std::fmt::Display for PayloadTooLarge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("payload too large")
    }
}

impl std::error::Error for PayloadTooLarge {}

/// Runtime knobs for [`PanicGuard`].
#[derive(Debug, Clone)]
pub struct PanicGuardSettings {
    /// Log the parsed stack alongside the recovery event.
    pub print_stack: bool,
    /// Frames kept per incident.
    pub max_frames: usize,
}

impl Default for PanicGuardSettings {
    fn default() -> Self {
        Self {
            print_stack: true,
            max_frames: 32,
        }
    }
}

thread_local! {
    static GUARD_DEPTH: Cell<usize> = const { Cell::new(0) };
    static CAPTURED: RefCell<Option<HookCapture>> = const { RefCell::new(None) };
}

struct HookCapture {
    backtrace: Backtrace,
    location: Option<String>,
}

static HOOK: Once = Once::new();

/// Install the capturing panic hook. Idempotent.
pub fn install_panic_hook() {
    HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if GUARD_DEPTH.with(Cell::get) == 0 {
                previous(info);
                return;
            }
            let capture = HookCapture {
                backtrace: Backtrace::force_capture(),
                location: info.location().map(|l| format!("{}:{}", l.file(), l.line())),
            };
            CAPTURED.with(|slot| *slot.borrow_mut() = Some(capture));
        }));
    });
}

/// Marks the current thread as polling a guarded future.
struct GuardScope;

impl GuardScope {
    fn enter() -> Self {
        GUARD_DEPTH.with(|d| d.set(d.get() + 1));
        Self
    }
}

impl Drop for GuardScope {
    fn drop(&mut self) {
        GUARD_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// A caught panic with whatever the hook recorded for it.
pub struct CaughtPanic {
    pub payload: Box<dyn Any + Send>,
    backtrace: Option<Backtrace>,
    location: Option<String>,
}

/// Future adapter that catches panics raised while polling `F`.
pub struct Guarded<F> {
    inner: Pin<Box<F>>,
}

impl<F: Future> Guarded<F> {
    pub fn new(inner: F) -> Self {
        Self {
            inner: Box::pin(inner),
        }
    }
}

impl<F: Future> Future for Guarded<F> {
    type Output = Result<F::Output, CaughtPanic>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let scope = GuardScope::enter();
        let inner = self.inner.as_mut();
        let polled = catch_unwind(AssertUnwindSafe(|| inner.poll(cx)));
        drop(scope);

        match polled {
            Ok(Poll::Ready(output)) => Poll::Ready(Ok(output)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(payload) => {
                let capture = CAPTURED.with(|slot| slot.borrow_mut().take());
                let (backtrace, location) = match capture {
                    Some(c) => (Some(c.backtrace), c.location),
                    None => (None, None),
                };
                Poll::Ready(Err(CaughtPanic {
                    payload,
                    backtrace,
                    location,
                }))
            }
        }
    }
}

/// Whether the payload signals an oversized or truncated request body.
pub fn is_payload_too_large(payload: &(dyn Any + Send)) -> bool {
    if payload.is::<PayloadTooLarge>() {
        return true;
    }
    if let Some(err) = payload.downcast_ref::<io::Error>() {
        return err.kind() == io::ErrorKind::UnexpectedEof;
    }
    if let Some(err) = payload.downcast_ref::<Box<dyn std::error::Error + Send + Sync>>() {
        return err.is::<PayloadTooLarge>()
            || err
                .downcast_ref::<io::Error>()
                .is_some_and(|e| e.kind() == io::ErrorKind::UnexpectedEof);
    }
    false
}

/// Classify a panic payload.
pub fn classify(payload: Box<dyn Any + Send>) -> PanicCause {
    let payload = match payload.downcast::<&'static str>() {
        Ok(msg) => return PanicCause::Message((*msg).to_string()),
        Err(p) => p,
    };
    let payload = match payload.downcast::<String>() {
        Ok(msg) => return PanicCause::Message(*msg),
        Err(p) => p,
    };
    let payload = match payload.downcast::<Box<dyn std::error::Error + Send + Sync>>() {
        Ok(err) => return PanicCause::Error(*err),
        Err(p) => p,
    };
    let payload = match payload.downcast::<io::Error>() {
        Ok(err) => return PanicCause::Error(err),
        Err(p) => p,
    };
    match payload.downcast::<anyhow::Error>() {
        Ok(err) => PanicCause::Error((*err).into()),
        Err(_) => PanicCause::Unknown,
    }
}

/// Parse the text form of a [`Backtrace`] into frames.
///
/// Leading frames belonging to the panic machinery (backtrace capture, this
/// module's hook, `std`/`core` panicking) are skipped; at most `max_frames`
/// frames are returned.
pub fn parse_backtrace(text: &str, max_frames: usize) -> Vec<StackFrame> {
    let mut frames: Vec<StackFrame> = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if let Some(location) = line.strip_prefix("at ") {
            if let Some(frame) = frames.last_mut()
                && frame.file.is_none()
            {
                let (file, line_no) = split_location(location);
                frame.file = Some(file);
                frame.line = line_no;
            }
            continue;
        }
        if let Some((index, symbol)) = line.split_once(": ")
            && !index.is_empty()
            && index.chars().all(|c| c.is_ascii_digit())
        {
            frames.push(frame_from_symbol(symbol));
        }
    }

    let first_app_frame = frames
        .iter()
        .position(|f| !is_machinery(f))
        .unwrap_or(frames.len());

    frames
        .into_iter()
        .skip(first_app_frame)
        .take(max_frames)
        .collect()
}

fn is_machinery(frame: &StackFrame) -> bool {
    let q = frame.qualifier.as_str();
    q.starts_with("std")
        || q.starts_with("core")
        || q.starts_with("alloc")
        || q.starts_with("__rust")
        || q.contains("panic_guard")
        || frame.function.contains("rust_begin_unwind")
        || frame.function.starts_with("__rust")
}

fn frame_from_symbol(symbol: &str) -> StackFrame {
    let mut symbol = strip_hash(symbol.trim());
    while let Some(stripped) = symbol.strip_suffix("::{{closure}}") {
        symbol = stripped;
    }
    let (qualifier, function) = match symbol.rsplit_once("::") {
        Some((q, f)) => (q.to_string(), f.to_string()),
        None => (String::new(), symbol.to_string()),
    };
    StackFrame {
        qualifier,
        function,
        file: None,
        line: None,
    }
}

/// Drop a trailing `::h<16 hex>` symbol hash.
fn strip_hash(symbol: &str) -> &str {
    match symbol.rsplit_once("::h") {
        Some((head, hash)) if hash.len() == 16 && hash.chars().all(|c| c.is_ascii_hexdigit()) => {
            head
        }
        _ => symbol,
    }
}

/// `path:line:col` → (`path`, line).
fn split_location(location: &str) -> (String, Option<u32>) {
    let mut parts = location.rsplitn(3, ':');
    let col = parts.next();
    let line = parts.next();
    let file = parts.next();
    match (file, line.and_then(|l| l.parse().ok()), col) {
        (Some(file), Some(line), Some(_)) => (file.to_string(), Some(line)),
        _ => (location.to_string(), None),
    }
}

/// Turns caught panics into responses and incidents.
pub struct PanicGuard {
    reporter: Arc<IncidentReporter>,
    settings: PanicGuardSettings,
}

impl PanicGuard {
    pub fn new(reporter: Arc<IncidentReporter>, settings: PanicGuardSettings) -> Self {
        install_panic_hook();
        Self { reporter, settings }
    }

    /// Build the client response for a caught panic and report it.
    pub fn recover(&self, caught: CaughtPanic) -> Response<Body> {
        if is_payload_too_large(&*caught.payload) {
            metrics::record_panic_recovered("payload_too_large");
            warn!(location = ?caught.location, "Request body too large or truncated");
            return (StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large").into_response();
        }

        metrics::record_panic_recovered("internal");
        let cause = classify(caught.payload);
        let body = format!("(panic) {cause}");

        let frames = caught
            .backtrace
            .map(|bt| parse_backtrace(&bt.to_string(), self.settings.max_frames))
            .unwrap_or_default();

        let incident = Incident::new(cause, frames);
        if self.settings.print_stack {
            error!(
                incident_id = %incident.id,
                location = ?caught.location,
                stack = %incident.text(),
                "Recovered from handler panic"
            );
        } else {
            error!(
                incident_id = %incident.id,
                location = ?caught.location,
                cause = %incident.cause,
                "Recovered from handler panic"
            );
        }

        let outcome = self.reporter.report(incident);
        debug!(?outcome, "Incident handed to reporter");

        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

/// Tower layer installing [`PanicGuard`] around a service.
#[derive(Clone)]
pub struct PanicGuardLayer {
    guard: Arc<PanicGuard>,
}

impl PanicGuardLayer {
    pub fn new(guard: Arc<PanicGuard>) -> Self {
        Self { guard }
    }
}

impl<S> Layer<S> for PanicGuardLayer {
    type Service = PanicGuardService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PanicGuardService {
            inner,
            guard: self.guard.clone(),
        }
    }
}

/// Service produced by [`PanicGuardLayer`].
#[derive(Clone)]
pub struct PanicGuardService<S> {
    inner: S,
    guard: Arc<PanicGuard>,
}

impl<S> Service<Request<Body>> for PanicGuardService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();
        let guard = self.guard.clone();

        Box::pin(async move {
            // The inner call runs on first poll so synchronous panics are caught too.
            match Guarded::new(async move { inner.call(req).await }).await {
                Ok(result) => result,
                Err(caught) => Ok(guard.recover(caught)),
            }
        })
    }
}
