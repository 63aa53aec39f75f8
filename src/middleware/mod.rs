//! Middleware pipeline: composable before/after request handler logic.
//!
//! Each middleware wraps the next layer, enabling request inspection,
//! short-circuit responses, and output-sink substitution without coupling
//! handlers to infrastructure concerns.
//!
//! ## Core types
//!
//! - [`Middleware`]: trait implemented by all middleware.
//! - [`Next`]: cursor into the remaining chain; call [`Next::run`] to
//!   advance to the next layer.
//! - [`MiddlewareHandler`]: type-erased, cheaply-cloneable middleware function.
//! - [`from_middleware`]: converts a [`Middleware`] into a [`MiddlewareHandler`].
//! - [`LoggerMiddleware`]: built-in request/response logger.

use std::{future::Future, pin::Pin, sync::Arc};
use tokio::time::Instant;

use crate::{StatusCode, context::Context, router::Handler};

/// The boxed future every middleware and handler resolves to.
///
/// The [`Context`] comes back out so the caller regains ownership of the
/// request's sink after the downstream chain has finished with it.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Context> + Send>>;

/// A type-erased, reference-counted middleware function.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rttp_cache::{context::Context, middleware::{HandlerFuture, MiddlewareHandler, Next}};
///
/// let handler: MiddlewareHandler = Arc::new(|ctx: Context, next: Next| -> HandlerFuture {
///     Box::pin(async move { next.run(ctx).await })
/// });
/// ```
pub type MiddlewareHandler = Arc<dyn Fn(Context, Next) -> HandlerFuture + Send + Sync + 'static>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// A cursor into the remaining middleware chain for a single request.
///
/// The chain ends in an optional endpoint handler. `Next` is consumed on each
/// call to [`run`](Self::run), so a middleware can forward at most once.
pub struct Next {
    middlewares: Vec<MiddlewareHandler>,
    endpoint: Option<Handler>,
    // Tracks which middleware to invoke on the next `run` call.
    index: usize,
}

impl Next {
    /// Creates a cursor positioned at the start of `middlewares`, finishing
    /// with `endpoint`.
    pub fn new(middlewares: Vec<MiddlewareHandler>, endpoint: Option<Handler>) -> Self {
        Self {
            middlewares,
            endpoint,
            index: 0,
        }
    }

    /// Invokes the next middleware (or the endpoint) and returns the context.
    ///
    /// Nothing further runs once the context is aborted. When the chain is
    /// exhausted without an endpoint a `500` is written as a fallback.
    pub async fn run(mut self, mut ctx: Context) -> Context {
        if ctx.is_aborted() {
            return ctx;
        }

        if self.index < self.middlewares.len() {
            let handler = self.middlewares[self.index].clone();
            self.index += 1;
            return handler(ctx, self).await;
        }

        match self.endpoint.take() {
            Some(endpoint) => endpoint(ctx).await,
            None => {
                if let Err(e) = ctx
                    .string(
                        StatusCode::InternalServerError,
                        "No response generated by middleware pipeline",
                    )
                    .await
                {
                    tracing::warn!(error = %e, "failed to write fallback response");
                }
                ctx
            }
        }
    }
}

/// The core trait for all middleware.
///
/// Implementors receive a [`Context`] and a [`Next`] cursor. They may:
///
/// - **Pass through**: `next.run(ctx).await`.
/// - **Short-circuit**: write to `ctx` and return it without calling `next`.
/// - **Intercept**: replace the context's writer, then pass through.
///
/// Implementations must be `Send + Sync` because middleware is shared across
/// Tokio tasks; state needed inside the returned future is cloned in.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> HandlerFuture;
}

/// Built-in middleware that logs each request's method, path, status, and
/// duration once the downstream chain returns.
///
/// ```text
/// METHOD /path - STATUS (duration)
/// ```
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> HandlerFuture {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().as_str().to_string();
            let path = ctx.request().path().to_string();

            let ctx = next.run(ctx).await;

            let status = ctx.writer().status().as_u16();
            tracing::info!(
                aborted = ctx.is_aborted(),
                "{} {} - {} ({:?})",
                method,
                path,
                status,
                start.elapsed()
            );

            ctx
        })
    }
}
