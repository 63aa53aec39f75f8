//! The intercepting sink installed on a cache miss.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde::Deserialize;
use tracing::{debug, warn};

use super::captured::{self, CapturedResponse};
use super::key::CacheKey;
use crate::http::{Headers, Response, ResponseWriter, StatusCode, WriteError};
use crate::store::{CacheStore, Expiration};

/// When a [`CachedWriter`] persists what it captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// After every body write, read the stored capture, append the new
    /// bytes and store it again with the current status and headers.
    PerWrite,
    /// Buffer the body and store once, when the request completes normally.
    #[default]
    OnCompletion,
}

/// Decorates the live sink: everything is forwarded unchanged, and
/// successful (`< 300`) responses are recorded under `key`.
///
/// Once the inner sink rejects a write the client has an incomplete body,
/// so nothing more is recorded for this response.
pub struct CachedWriter {
    inner: Box<dyn ResponseWriter>,
    store: Arc<dyn CacheStore>,
    key: CacheKey,
    expires: Expiration,
    mode: CaptureMode,
    buffer: BytesMut,
    wrote_any: bool,
    failed: bool,
    completed: bool,
}

impl CachedWriter {
    pub fn new(
        inner: Box<dyn ResponseWriter>,
        store: Arc<dyn CacheStore>,
        key: CacheKey,
        expires: Expiration,
        mode: CaptureMode,
    ) -> Self {
        Self {
            inner,
            store,
            key,
            expires,
            mode,
            buffer: BytesMut::new(),
            wrote_any: false,
            failed: false,
            completed: false,
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    async fn persist(&self, captured: &CapturedResponse) {
        match captured::save(self.store.as_ref(), self.key.as_str(), captured, self.expires).await
        {
            Ok(()) => debug!(
                key = %self.key,
                status = captured.status().as_u16(),
                bytes = captured.body().len(),
                "response cached"
            ),
            Err(err) => warn!(key = %self.key, error = %err, "failed to cache response"),
        }
    }

    async fn append_and_persist(&self, status: StatusCode, headers: Headers, data: &[u8]) {
        let body = match captured::load(self.store.as_ref(), self.key.as_str()).await {
            Ok(previous) => {
                let mut body = BytesMut::from(previous.body().as_ref());
                body.extend_from_slice(data);
                body.freeze()
            }
            Err(_) => Bytes::copy_from_slice(data),
        };
        let captured = CapturedResponse::capture(status, &headers, body);
        self.persist(&captured).await;
    }
}

#[async_trait]
impl ResponseWriter for CachedWriter {
    fn headers(&self) -> &Headers {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut Headers {
        self.inner.headers_mut()
    }

    fn write_header(&mut self, status: StatusCode) {
        self.inner.write_header(status);
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        let written = match self.inner.write(data).await {
            Ok(written) => written,
            Err(err) => {
                self.failed = true;
                self.buffer.clear();
                return Err(err);
            }
        };
        if self.failed {
            return Ok(written);
        }
        self.wrote_any = true;

        match self.mode {
            CaptureMode::OnCompletion => self.buffer.extend_from_slice(data),
            CaptureMode::PerWrite => {
                let status = self.inner.status();
                if status.is_cacheable() {
                    let headers = self.inner.headers().clone();
                    self.append_and_persist(status, headers, data).await;
                }
            }
        }
        Ok(written)
    }

    fn status(&self) -> StatusCode {
        self.inner.status()
    }

    fn written(&self) -> bool {
        self.inner.written()
    }

    async fn complete(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;
        self.inner.complete().await;

        if self.mode != CaptureMode::OnCompletion || !self.wrote_any {
            return;
        }
        if self.failed {
            debug!(key = %self.key, "response truncated by a failed write, not cached");
            return;
        }
        let status = self.inner.status();
        if !status.is_cacheable() {
            debug!(key = %self.key, status = status.as_u16(), "response not cacheable");
            return;
        }
        let body = std::mem::take(&mut self.buffer).freeze();
        let captured = CapturedResponse::capture(status, self.inner.headers(), body);
        self.persist(&captured).await;
    }

    fn into_response(self: Box<Self>) -> Response {
        self.inner.into_response()
    }
}
