//! HTTP middleware for exchange logging and panic recovery.
//!
//! - **Exchange Logger**: Buffers the request, tees the response, and hands a
//!   sanitized record to the log sink
//! - **Panic Guard**: Turns handler panics into responses and incidents
//! - **Response Recorder**: Body wrapper capturing what the client received
//! - **Client IP**: Proxy-header aware address resolution for records
//!
//! # Architecture
//!
//! ```text
//! Request → Exchange Logger → Panic Guard → Handler → Response
//!                 ↓                ↓
//!          LogSink (detached)  IncidentReporter (queued)
//! ```
//!
//! Neither layer changes a successful response; the only client-visible
//! effects are 500/413 on a recovered panic and 413/400 when the request
//! body cannot be buffered.

pub mod exchange_log;
pub mod ip;
pub mod panic_guard;
pub mod recorder;

pub use exchange_log::{
    ExchangeLogLayer, ExchangeLogService, ExchangeLogSettings, ExchangeLogger, RequestMeta,
};
pub use ip::resolve_client_ip;
pub use panic_guard::{
    PanicGuard, PanicGuardLayer, PanicGuardService, PanicGuardSettings, PayloadTooLarge,
    install_panic_hook,
};
pub use recorder::{CaptureEnd, RecordingBody, ResponseRecorder};
