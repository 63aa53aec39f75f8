//! Per-request state carried through the middleware chain.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    mem,
};

use serde::Serialize;

use crate::http::{Request, Response, ResponseRecorder, ResponseWriter, StatusCode, WriteError};

/// Type-erased request extensions map, used to inject per-request state
/// into handlers without requiring handlers to know about each other's types.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, replacing any previous value of the same type.
    pub fn insert<T>(&mut self, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.map.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }
}

/// State for one request as it travels through the middleware chain.
///
/// The context owns the current [`ResponseWriter`]. Middleware may swap it
/// for a decorator with [`replace_writer`](Self::replace_writer); the swap
/// holds for the remainder of the request.
///
/// Calling [`abort`](Self::abort) stops the chain: no later middleware or
/// handler runs, and middleware that already ran can observe the abort via
/// [`is_aborted`](Self::is_aborted) once control returns to them.
pub struct Context {
    request: Request,
    extensions: Extensions,
    writer: Box<dyn ResponseWriter>,
    aborted: bool,
}

impl Context {
    /// Creates a context writing into a fresh [`ResponseRecorder`].
    pub fn new(request: Request) -> Self {
        Self::with_writer(request, Box::new(ResponseRecorder::new()))
    }

    pub fn with_writer(request: Request, writer: Box<dyn ResponseWriter>) -> Self {
        Self {
            request,
            extensions: Extensions::new(),
            writer,
            aborted: false,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    pub fn writer(&self) -> &dyn ResponseWriter {
        self.writer.as_ref()
    }

    pub fn writer_mut(&mut self) -> &mut dyn ResponseWriter {
        self.writer.as_mut()
    }

    /// Substitutes the output sink for the rest of the request.
    ///
    /// `wrap` receives the current sink and returns its replacement, which
    /// normally owns and delegates to the old one.
    pub fn replace_writer<F>(&mut self, wrap: F)
    where
        F: FnOnce(Box<dyn ResponseWriter>) -> Box<dyn ResponseWriter>,
    {
        let current = mem::replace(&mut self.writer, Box::new(ResponseRecorder::new()));
        self.writer = wrap(current);
    }

    /// Marks the request as terminated early.
    pub fn abort(&mut self) {
        self.aborted = true;
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Writes a `text/plain` response.
    pub async fn string(
        &mut self,
        status: StatusCode,
        body: impl AsRef<str>,
    ) -> Result<(), WriteError> {
        self.writer
            .headers_mut()
            .set("Content-Type", "text/plain; charset=utf-8");
        self.writer.write_header(status);
        self.writer.write_str(body.as_ref()).await?;
        Ok(())
    }

    /// Serializes `value` and writes it as an `application/json` response.
    pub async fn json<T>(&mut self, status: StatusCode, value: &T) -> Result<(), WriteError>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(value)?;
        self.writer
            .headers_mut()
            .set("Content-Type", "application/json; charset=utf-8");
        self.writer.write_header(status);
        self.writer.write(&body).await?;
        Ok(())
    }

    /// Aborts the request, then writes `value` as JSON.
    pub async fn abort_with_json<T>(
        &mut self,
        status: StatusCode,
        value: &T,
    ) -> Result<(), WriteError>
    where
        T: Serialize + ?Sized,
    {
        self.abort();
        self.json(status, value).await
    }

    /// Writes a prebuilt [`Response`] through the current sink.
    pub async fn send(&mut self, response: Response) -> Result<(), WriteError> {
        let (status, headers, body) = response.into_parts();
        for (name, value) in headers.iter() {
            self.writer.headers_mut().insert(name, value);
        }
        self.writer.write_header(status);
        self.writer.write(&body).await?;
        Ok(())
    }

    /// Ends the request and returns what the client receives.
    pub fn into_response(self) -> Response {
        self.writer.into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Tenant(&'static str);

    #[test]
    fn extensions_are_type_keyed() {
        let mut ext = Extensions::new();
        ext.insert(Tenant("acme"));
        ext.insert(7u32);
        assert_eq!(ext.get::<Tenant>(), Some(&Tenant("acme")));
        assert_eq!(ext.remove::<u32>(), Some(7));
        assert!(ext.get::<u32>().is_none());
    }

    #[tokio::test]
    async fn string_sets_content_type() {
        let mut ctx = Context::new(Request::get("/"));
        ctx.string(StatusCode::Accepted, "queued").await.unwrap();
        let response = ctx.into_response();
        assert_eq!(response.status(), StatusCode::Accepted);
        assert_eq!(
            response.headers().get("content-type"),
            Some("text/plain; charset=utf-8")
        );
        assert_eq!(response.text(), "queued");
    }

    #[tokio::test]
    async fn abort_with_json_flags_context() {
        let mut ctx = Context::new(Request::get("/"));
        ctx.abort_with_json(StatusCode::Ok, &serde_json::json!({"time": 1}))
            .await
            .unwrap();
        assert!(ctx.is_aborted());
        assert_eq!(ctx.into_response().text(), r#"{"time":1}"#);
    }

    #[tokio::test]
    async fn replace_writer_wraps_current_sink() {
        let mut ctx = Context::new(Request::get("/"));
        ctx.writer_mut().headers_mut().insert("X-Before", "1");
        ctx.replace_writer(|inner| inner);
        assert_eq!(ctx.writer().headers().get("x-before"), Some("1"));
    }

    #[tokio::test]
    async fn send_copies_prebuilt_response() {
        let mut ctx = Context::new(Request::get("/"));
        let prebuilt = Response::new(StatusCode::Created)
            .header("Location", "/items/1")
            .body("made");
        ctx.send(prebuilt).await.unwrap();
        let response = ctx.into_response();
        assert_eq!(response.status(), StatusCode::Created);
        assert_eq!(response.headers().get("location"), Some("/items/1"));
        assert_eq!(response.text(), "made");
    }
}
