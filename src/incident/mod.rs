//! Incidents raised by recovered handler panics.
//!
//! # Pipeline
//!
//! ```text
//! PanicGuard ──► Incident ──► ContainmentGate ──admit──► bounded queue ──► worker ──► Notifier
//!                                   │                         │
//!                                   └─ suppress (counted)     └─ full: drop (counted)
//! ```
//!
//! The request path only ever performs the gate check and a non-blocking
//! queue send.

mod gate;
mod reporter;

use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use gate::{ContainmentGate, GateConfig, GateState};
pub use reporter::{IncidentReporter, IncidentStats, ReportOutcome};

/// Characters escaped with a backslash in notification text.
const MARKDOWN_SPECIAL: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
    '\\',
];

/// One entry of a captured call stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// Module path of the function (`crate::module`), empty for free symbols.
    pub qualifier: String,
    pub function: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}\r\n  ", self.qualifier, self.function)?;
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{file}:{line}"),
            (Some(file), None) => write!(f, "{file}"),
            _ => write!(f, "<unknown>"),
        }
    }
}

/// What a panic carried, classified.
#[derive(Debug)]
pub enum PanicCause {
    /// A string payload (`panic!("...")`).
    Message(String),
    /// An error value payload (`std::panic::panic_any(err)`).
    Error(Box<dyn std::error::Error + Send + Sync>),
    /// Any other payload type.
    Unknown,
}

impl fmt::Display for PanicCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PanicCause::Message(msg) => f.write_str(msg),
            PanicCause::Error(err) => write!(f, "{err}"),
            PanicCause::Unknown => f.write_str("Unknown error"),
        }
    }
}

/// A recovered panic, ready for reporting.
#[derive(Debug)]
pub struct Incident {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub cause: PanicCause,
    pub stack_frames: Vec<StackFrame>,
}

impl Incident {
    pub fn new(cause: PanicCause, stack_frames: Vec<StackFrame>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            cause,
            stack_frames,
        }
    }

    /// Plain-text body: cause followed by one two-line entry per frame.
    pub fn text(&self) -> String {
        let mut text = format!("{}\r\n", self.cause);
        for frame in &self.stack_frames {
            text.push_str(&frame.to_string());
            text.push_str("\r\n");
        }
        text
    }

    /// Markdown notification message: an escaped, bold UTC timestamp followed
    /// by the escaped [`text`](Self::text) inside a fenced block.
    pub fn format_message(&self) -> String {
        format!(
            "*\\[{}\\]* \n\n```\n{}```\n",
            self.timestamp.format("%d/%m/%y %H:%M:%S UTC"),
            escape_markdown(&self.text())
        )
    }
}

/// Prefix every Markdown control character with a backslash.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if MARKDOWN_SPECIAL.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn frame() -> StackFrame {
        StackFrame {
            qualifier: "shop::handlers".to_string(),
            function: "create_order".to_string(),
            file: Some("src/handlers.rs".to_string()),
            line: Some(42),
        }
    }

    #[test]
    fn test_escape_markdown() {
        assert_eq!(escape_markdown("a_b*c"), "a\\_b\\*c");
        assert_eq!(escape_markdown("[x](y)"), "\\[x\\]\\(y\\)");
        assert_eq!(escape_markdown("1.2!"), "1\\.2\\!");
        assert_eq!(escape_markdown("C:\\tmp"), "C:\\\\tmp");
        assert_eq!(escape_markdown("plain text"), "plain text");
    }

    #[test]
    fn test_cause_display() {
        assert_eq!(PanicCause::Message("boom".into()).to_string(), "boom");
        let err: Box<dyn std::error::Error + Send + Sync> = "broken pipe".into();
        assert_eq!(PanicCause::Error(err).to_string(), "broken pipe");
        assert_eq!(PanicCause::Unknown.to_string(), "Unknown error");
    }

    #[test]
    fn test_frame_display() {
        assert_eq!(
            frame().to_string(),
            "shop::handlers:create_order\r\n  src/handlers.rs:42"
        );

        let unknown = StackFrame {
            file: None,
            line: None,
            ..frame()
        };
        assert_eq!(
            unknown.to_string(),
            "shop::handlers:create_order\r\n  <unknown>"
        );
    }

    #[test]
    fn test_incident_text() {
        let incident = Incident::new(PanicCause::Message("boom".into()), vec![frame()]);
        assert_eq!(
            incident.text(),
            "boom\r\nshop::handlers:create_order\r\n  src/handlers.rs:42\r\n"
        );
    }

    #[test]
    fn test_format_message() {
        let mut incident = Incident::new(PanicCause::Message("index out of range".into()), vec![]);
        incident.timestamp = Utc.with_ymd_and_hms(2026, 10, 17, 9, 15, 2).unwrap();

        assert_eq!(
            incident.format_message(),
            "*\\[17/10/26 09:15:02 UTC\\]* \n\n```\nindex out of range\r\n```\n"
        );
    }

    #[test]
    fn test_format_message_escapes_frames() {
        let incident = Incident::new(PanicCause::Unknown, vec![frame()]);
        let message = incident.format_message();

        assert!(message.contains("Unknown error\r\n"));
        assert!(message.contains("shop::handlers:create\\_order"));
        assert!(message.contains("src/handlers\\.rs:42"));
    }

    #[test]
    fn test_incident_ids_are_unique() {
        let a = Incident::new(PanicCause::Unknown, vec![]);
        let b = Incident::new(PanicCause::Unknown, vec![]);
        assert_ne!(a.id, b.id);
    }
}
