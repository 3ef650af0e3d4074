//! Response capture that never holds back the real response.
//!
//! [`ResponseRecorder`] keeps a copy of the status, content type, and body
//! bytes. [`RecordingBody`] wraps the outgoing body so every frame reaches the
//! client unchanged while its data is also written into the recorder.
//!
//! Capture doubles the memory held for a response body for the lifetime of
//! the request. Callers streaming unbounded bodies must cap them upstream.

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode, header};
use bytes::{Bytes, BytesMut};
use http_body::{Body as HttpBody, Frame, SizeHint};
use tokio::sync::oneshot;

/// Buffers what a handler sent to the client.
#[derive(Debug, Default)]
pub struct ResponseRecorder {
    status: Option<StatusCode>,
    content_type: Option<String>,
    body: BytesMut,
}

impl ResponseRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the response status. Repeated calls overwrite the previous code.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    /// Record the response content type from its headers.
    pub fn set_headers(&mut self, headers: &HeaderMap) {
        self.content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
    }

    /// Append written bytes. A write before any status implies `200 OK`.
    pub fn write(&mut self, data: &[u8]) {
        if self.status.is_none() {
            self.status = Some(StatusCode::OK);
        }
        self.body.extend_from_slice(data);
    }

    pub fn captured_body(&self) -> &[u8] {
        &self.body
    }

    pub fn status_code(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }
}

/// How the recorded body stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEnd {
    /// The body was fully delivered.
    Complete,
    /// The inner body yielded an error.
    Failed,
    /// The body was dropped before the end (client went away).
    Abandoned,
}

/// Body wrapper that forwards frames and records their data.
///
/// The recorder is handed back through a oneshot channel exactly once, when
/// the stream ends, fails, or is dropped.
pub struct RecordingBody {
    inner: Body,
    recorder: Option<ResponseRecorder>,
    done: Option<oneshot::Sender<(ResponseRecorder, CaptureEnd)>>,
}

impl RecordingBody {
    pub fn new(
        inner: Body,
        recorder: ResponseRecorder,
    ) -> (Self, oneshot::Receiver<(ResponseRecorder, CaptureEnd)>) {
        let (tx, rx) = oneshot::channel();
        let body = Self {
            inner,
            recorder: Some(recorder),
            done: Some(tx),
        };
        (body, rx)
    }

    fn finish(&mut self, end: CaptureEnd) {
        if let (Some(recorder), Some(done)) = (self.recorder.take(), self.done.take()) {
            // Receiver may be gone when logging was cancelled; nothing to do then.
            let _ = done.send((recorder, end));
        }
    }
}

impl HttpBody for RecordingBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let polled = Pin::new(&mut self.inner).poll_frame(cx);
        match polled {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(frame))) => {
                if let (Some(data), Some(recorder)) = (frame.data_ref(), self.recorder.as_mut()) {
                    recorder.write(data);
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                self.finish(CaptureEnd::Failed);
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.finish(CaptureEnd::Complete);
                Poll::Ready(None)
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for RecordingBody {
    fn drop(&mut self) {
        let end = if self.inner.is_end_stream() {
            CaptureEnd::Complete
        } else {
            CaptureEnd::Abandoned
        };
        self.finish(end);
    }
}
