//! Finished HTTP responses.
//!
//! A [`Response`] is what a request produces once handling is over: the real
//! sink ([`ResponseRecorder`](super::ResponseRecorder)) turns into one, and
//! handlers can build one up front and [`send`](crate::context::Context::send)
//! it through the current sink.

use std::borrow::Cow;

use bytes::Bytes;

use super::{Headers, StatusCode};

/// A complete HTTP response.
///
/// # Examples
///
/// ```
/// use rttp_cache::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// assert_eq!(response.status(), StatusCode::Ok);
/// assert_eq!(response.headers().get("content-type"), Some("application/json"));
/// assert_eq!(response.text(), r#"{"status":"ok"}"#);
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Assembles a response from already-collected parts.
    pub fn from_parts(status: StatusCode, headers: Headers, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the response body from a string.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Bytes::from(body.into());
        self
    }

    /// Sets the response body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body_ref(&self) -> &Bytes {
        &self.body
    }

    /// The body decoded as UTF-8, lossily.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Splits the response into status, headers and body.
    pub fn into_parts(self) -> (StatusCode, Headers, Bytes) {
        (self.status, self.headers, self.body)
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_parts() {
        let r = Response::new(StatusCode::Created)
            .header("X-Request-Id", "abc-123")
            .body_bytes(&b"\x00\x01"[..]);
        let (status, headers, body) = r.into_parts();
        assert_eq!(status, StatusCode::Created);
        assert_eq!(headers.get("x-request-id"), Some("abc-123"));
        assert_eq!(body.as_ref(), b"\x00\x01");
    }

    #[test]
    fn default_is_empty_ok() {
        let r = Response::default();
        assert_eq!(r.status(), StatusCode::Ok);
        assert!(r.body_ref().is_empty());
        assert!(r.headers().is_empty());
    }
}
