//! Response sinks.
//!
//! Handlers never build the outgoing response directly; they write status,
//! headers and body bytes into the request's current [`ResponseWriter`]. The
//! pipeline owner starts every request with a [`ResponseRecorder`] and may
//! wrap it in decorators (the cache's capturing writer is one) for the rest
//! of the request.

use async_trait::async_trait;
use bytes::BytesMut;
use thiserror::Error;
use tracing::debug;

use super::{Headers, Response, StatusCode};

/// Failures reported by a sink when body bytes cannot be delivered.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("response sink is closed")]
    Closed,

    #[error("failed to encode response body: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The output side of a request.
///
/// Mirrors what a handler can do to a live HTTP response: mutate headers,
/// choose a status, and write body bytes. Once the first body byte has been
/// written the status is committed and later [`write_header`] calls are
/// ignored.
///
/// Decorators implement this trait by owning the sink they wrap and
/// delegating to it.
///
/// [`write_header`]: ResponseWriter::write_header
#[async_trait]
pub trait ResponseWriter: Send + Sync {
    fn headers(&self) -> &Headers;

    fn headers_mut(&mut self) -> &mut Headers;

    /// Sets the status code, unless the response has already been written.
    fn write_header(&mut self, status: StatusCode);

    /// Writes body bytes, committing the status and headers first.
    ///
    /// # Errors
    ///
    /// Returns a [`WriteError`] when the sink can no longer accept data.
    async fn write(&mut self, data: &[u8]) -> Result<usize, WriteError>;

    /// Writes a UTF-8 string as body bytes.
    async fn write_str(&mut self, data: &str) -> Result<usize, WriteError> {
        self.write(data.as_bytes()).await
    }

    /// The status that is (or will be) sent.
    fn status(&self) -> StatusCode;

    /// Whether the status has been committed by a body write.
    fn written(&self) -> bool;

    /// Signals that request handling finished normally.
    ///
    /// Sinks without end-of-response work keep the default no-op.
    async fn complete(&mut self) {}

    /// Consumes the sink and produces what the client receives.
    fn into_response(self: Box<Self>) -> Response;
}

/// The in-memory "real" sink every request starts with.
///
/// Accumulates the response exactly as a client would observe it.
/// [`close`](Self::close) simulates a dropped connection: subsequent writes
/// fail with [`WriteError::Closed`].
///
/// ```
/// use rttp_cache::http::{ResponseRecorder, ResponseWriter, StatusCode};
///
/// # tokio_test_block(async {
/// let mut recorder = ResponseRecorder::new();
/// recorder.write_header(StatusCode::NoContent);
/// recorder.write(b"foo").await.unwrap();
/// recorder.write_header(StatusCode::Ok); // ignored, already written
///
/// assert_eq!(recorder.status(), StatusCode::NoContent);
/// assert!(recorder.written());
/// assert_eq!(Box::new(recorder).into_response().text(), "foo");
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Debug)]
pub struct ResponseRecorder {
    status: StatusCode,
    headers: Headers,
    body: BytesMut,
    written: bool,
    closed: bool,
}

impl ResponseRecorder {
    pub fn new() -> Self {
        Self {
            status: StatusCode::Ok,
            headers: Headers::new(),
            body: BytesMut::new(),
            written: false,
            closed: false,
        }
    }

    /// Rejects every later write.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Body bytes written so far.
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

impl Default for ResponseRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResponseWriter for ResponseRecorder {
    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    fn write_header(&mut self, status: StatusCode) {
        if self.written {
            debug!(
                current = self.status.as_u16(),
                ignored = status.as_u16(),
                "status already written"
            );
            return;
        }
        self.status = status;
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        if self.closed {
            return Err(WriteError::Closed);
        }
        self.written = true;
        self.body.extend_from_slice(data);
        Ok(data.len())
    }

    fn status(&self) -> StatusCode {
        self.status
    }

    fn written(&self) -> bool {
        self.written
    }

    fn into_response(self: Box<Self>) -> Response {
        let this = *self;
        Response::from_parts(this.status, this.headers, this.body.freeze())
    }
}
