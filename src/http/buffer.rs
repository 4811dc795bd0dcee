//! Rewritable response buffer.
//!
//! # Responsibilities
//! - Stage status, headers and body for the whole middleware chain
//! - Let outer middleware discard what inner handlers already wrote
//! - Commit everything to the real sink exactly once
//!
//! # Design Decisions
//! - Writes never touch the sink; only `finalize` does
//! - First `set_status` wins until the buffer is cleared
//! - `finalize` consumes the buffer, so a second commit cannot compile
//! - Connection-level capabilities (hijack, push) are forwarded to the sink

use std::fmt;
use std::io;

use axum::body::Body;
use axum::http::header::{AsHeaderName, HeaderName};
use axum::http::{HeaderMap, HeaderValue, Response, StatusCode};
use bytes::{Bytes, BytesMut};
use hyper::upgrade::OnUpgrade;
use tokio::sync::oneshot;

use super::error::SinkError;

/// The network-facing end of a response.
pub trait ResponseSink: Send {
    /// Commit the status line and headers.
    fn write_head(&mut self, status: StatusCode, headers: HeaderMap) -> Result<(), SinkError>;

    /// Write body bytes after the head.
    fn write_body(&mut self, body: Bytes) -> Result<(), SinkError>;

    /// Signal that the response is complete.
    fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Take over the underlying connection once the response has been sent.
    fn hijack(&mut self) -> Result<OnUpgrade, SinkError> {
        Err(SinkError::Unsupported)
    }

    /// Server push of an associated resource.
    fn push(&mut self, _target: &str) -> Result<(), SinkError> {
        Err(SinkError::Unsupported)
    }
}

/// In-memory staging area for one response.
pub struct ResponseBuffer {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: BytesMut,
    sink: Box<dyn ResponseSink>,
}

impl ResponseBuffer {
    pub fn new(sink: Box<dyn ResponseSink>) -> Self {
        Self {
            status: None,
            headers: HeaderMap::new(),
            body: BytesMut::new(),
            sink,
        }
    }

    /// Append bytes to the pending body.
    pub fn write(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }

    pub fn write_str(&mut self, s: &str) {
        self.write(s.as_bytes());
    }

    /// Record the pending status. Only the first call after creation or
    /// [`clear`](Self::clear) has an effect.
    pub fn set_status(&mut self, status: StatusCode) {
        if self.status.is_none() {
            self.status = Some(status);
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn header(&self, name: impl AsHeaderName) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    /// Set a header from a static value, replacing any previous values.
    pub fn set_header(&mut self, name: &'static str, value: &'static str) {
        self.headers.insert(name, HeaderValue::from_static(value));
    }

    pub fn insert_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    pub fn append_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.append(name, value);
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Swap the pending body for `body`, keeping status and headers.
    pub fn replace_body(&mut self, body: &[u8]) {
        self.body.clear();
        self.body.extend_from_slice(body);
    }

    /// Drop the pending body, status and every header.
    pub fn clear(&mut self) {
        self.body.clear();
        self.status = None;
        self.headers.clear();
    }

    pub fn hijack(&mut self) -> Result<OnUpgrade, SinkError> {
        self.sink.hijack()
    }

    pub fn push(&mut self, target: &str) -> Result<(), SinkError> {
        self.sink.push(target)
    }

    /// Commit status (200 when none was set), headers and body to the sink.
    pub fn finalize(self) -> Result<(), SinkError> {
        let Self { status, headers, body, mut sink } = self;
        sink.write_head(status.unwrap_or(StatusCode::OK), headers)?;
        sink.write_body(body.freeze())?;
        sink.finish()
    }
}

impl fmt::Debug for ResponseBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBuffer")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .finish()
    }
}

impl io::Write for ResponseBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Write for ResponseBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.body.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

/// Sink that assembles an `http::Response` and hands it over a channel.
///
/// The HTTP server dispatches into one of these and returns the collected
/// response to hyper.
pub struct ResponseCollector {
    head: Option<(StatusCode, HeaderMap)>,
    body: BytesMut,
    upgrade: Option<OnUpgrade>,
    hijacked: bool,
    tx: Option<oneshot::Sender<Response<Body>>>,
}

impl ResponseCollector {
    /// Create a collector and the receiver its response will be sent to.
    pub fn channel() -> (Self, oneshot::Receiver<Response<Body>>) {
        let (tx, rx) = oneshot::channel();
        let collector = Self {
            head: None,
            body: BytesMut::new(),
            upgrade: None,
            hijacked: false,
            tx: Some(tx),
        };
        (collector, rx)
    }

    /// Attach hyper's upgrade handle so handlers can hijack the connection.
    pub fn with_upgrade(mut self, upgrade: Option<OnUpgrade>) -> Self {
        self.upgrade = upgrade;
        self
    }
}

impl ResponseSink for ResponseCollector {
    fn write_head(&mut self, status: StatusCode, headers: HeaderMap) -> Result<(), SinkError> {
        self.head.get_or_insert((status, headers));
        Ok(())
    }

    fn write_body(&mut self, body: Bytes) -> Result<(), SinkError> {
        self.body.extend_from_slice(&body);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        let (status, headers) = self
            .head
            .take()
            .unwrap_or_else(|| (StatusCode::OK, HeaderMap::new()));
        let body = std::mem::take(&mut self.body).freeze();

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;

        if let Some(tx) = self.tx.take() {
            // Receiver is gone when the client disconnected mid-request.
            let _ = tx.send(response);
        }
        Ok(())
    }

    fn hijack(&mut self) -> Result<OnUpgrade, SinkError> {
        if self.hijacked {
            return Err(SinkError::AlreadyHijacked);
        }
        let upgrade = self.upgrade.take().ok_or(SinkError::Unsupported)?;
        self.hijacked = true;
        Ok(upgrade)
    }
}
