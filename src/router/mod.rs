//! Request routing: map an HTTP method and exact path to a handler, with
//! middleware layered globally or per route.
//!
//! Trailing slashes are normalized on both registered paths and incoming
//! requests, so `/users/` and `/users` are equivalent. Routes are matched in
//! registration order; the first match wins.
//!
//! For a matched route the middleware chain is: global layers (in the order
//! they were added), then the route's own middleware, then the handler.

use std::future::Future;
use std::sync::Arc;

use crate::context::Context;
use crate::middleware::{HandlerFuture, Middleware, MiddlewareHandler, Next, from_middleware};
use crate::{Method, Request, Response, StatusCode};

/// Type-erased async endpoint: takes the [`Context`], writes the response
/// into it, and hands it back.
pub type Handler = Arc<dyn Fn(Context) -> HandlerFuture + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Context) -> impl Future<Output = Context> + Send` that is also
/// `Send + Sync + 'static` implements this trait through the blanket impl.
pub trait IntoHandler: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> HandlerFuture;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Context> + Send + 'static,
{
    fn call(&self, ctx: Context) -> HandlerFuture {
        Box::pin((self)(ctx))
    }
}

struct Route {
    method: Method,
    path: String,
    middlewares: Vec<MiddlewareHandler>,
    handler: Handler,
}

/// HTTP request router.
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use rttp_cache::{Request, Router, StatusCode, cache::ResponseCache, context::Context};
///
/// # async fn example() {
/// let cache = ResponseCache::in_memory(Duration::from_secs(60));
/// let mut router = Router::new();
///
/// router.get_with("/ping", cache.page(Duration::from_secs(5)), |mut ctx: Context| async move {
///     let _ = ctx.string(StatusCode::Ok, "pong").await;
///     ctx
/// });
///
/// let response = router.route(Request::get("/ping")).await;
/// assert_eq!(response.text(), "pong");
/// # }
/// ```
#[derive(Default)]
pub struct Router {
    layers: Vec<MiddlewareHandler>,
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds middleware that runs for every matched route.
    pub fn layer<M>(&mut self, middleware: M)
    where
        M: Middleware + 'static,
    {
        self.layers.push(from_middleware(Arc::new(middleware)));
    }

    /// Registers a `GET` handler.
    pub fn get(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Get, path, Vec::new(), handler);
    }

    /// Registers a `GET` handler behind one route-specific middleware.
    pub fn get_with<M>(&mut self, path: &str, middleware: M, handler: impl IntoHandler)
    where
        M: Middleware + 'static,
    {
        let middlewares = vec![from_middleware(Arc::new(middleware))];
        self.add_route(Method::Get, path, middlewares, handler);
    }

    /// Registers a `POST` handler.
    pub fn post(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Post, path, Vec::new(), handler);
    }

    /// Registers a handler for any method with an explicit middleware list.
    pub fn add_route(
        &mut self,
        method: Method,
        path: &str,
        middlewares: Vec<MiddlewareHandler>,
        handler: impl IntoHandler,
    ) {
        let handler: Handler = Arc::new(move |ctx| handler.call(ctx));
        self.routes.push(Route {
            method,
            path: normalize(path).to_owned(),
            middlewares,
            handler,
        });
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Dispatches `request` through the matching route's chain.
    ///
    /// Returns `404 Not Found` when no route matches.
    pub async fn route(&self, request: Request) -> Response {
        let path = normalize(request.path());
        let Some(route) = self
            .routes
            .iter()
            .find(|r| &r.method == request.method() && r.path == path)
        else {
            return Response::new(StatusCode::NotFound);
        };

        let chain: Vec<MiddlewareHandler> = self
            .layers
            .iter()
            .chain(route.middlewares.iter())
            .cloned()
            .collect();

        let ctx = Next::new(chain, Some(route.handler.clone()))
            .run(Context::new(request))
            .await;
        ctx.into_response()
    }
}

fn normalize(path: &str) -> &str {
    if path != "/" && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ok(mut ctx: Context) -> Context {
        ctx.string(StatusCode::Ok, "ok").await.unwrap();
        ctx
    }

    struct Tag(&'static str);

    impl Middleware for Tag {
        fn handle(&self, mut ctx: Context, next: Next) -> HandlerFuture {
            let tag = self.0;
            Box::pin(async move {
                ctx.writer_mut().headers_mut().insert("X-Layer", tag);
                next.run(ctx).await
            })
        }
    }

    #[test]
    fn router_starts_empty() {
        let router = Router::new();
        assert!(router.is_empty());
        assert_eq!(router.len(), 0);
    }

    #[tokio::test]
    async fn unregistered_path_returns_404() {
        let mut router = Router::new();
        router.get("/hello", ok);
        let res = router.route(Request::get("/world")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
    }

    #[tokio::test]
    async fn method_must_match() {
        let mut router = Router::new();
        router.get("/hello", ok);
        let res = router.route(Request::new(Method::Post, "/hello")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
    }

    #[tokio::test]
    async fn trailing_slash_and_query_are_ignored_for_matching() {
        let mut router = Router::new();
        router.get("/hello/", ok);
        let res = router.route(Request::get("/hello?x=1")).await;
        assert_eq!(res.text(), "ok");
    }

    #[tokio::test]
    async fn layers_run_before_route_middleware() {
        let mut router = Router::new();
        router.layer(Tag("global"));
        router.get_with("/tagged", Tag("route"), ok);
        let res = router.route(Request::get("/tagged")).await;
        let tags: Vec<_> = res.headers().get_all("x-layer").collect();
        assert_eq!(tags, vec!["global", "route"]);
    }
}
