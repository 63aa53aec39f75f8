//! # rttp-cache
//!
//! HTTP response caching middleware for an async, in-process request
//! pipeline.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use rttp_cache::{Request, Router, StatusCode, cache::ResponseCache, context::Context};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
//! let cache = ResponseCache::in_memory(Duration::from_secs(60));
//! let mut router = Router::new();
//! router.get_with("/ping", cache.page(Duration::from_secs(5)), |mut ctx: Context| async move {
//!     let _ = ctx.string(StatusCode::Ok, "pong").await;
//!     ctx
//! });
//!
//! let first = router.route(Request::get("/ping")).await;
//! let second = router.route(Request::get("/ping")).await;
//! assert_eq!(first.text(), second.text());
//! # });
//! ```

// ── Pipeline ──────────────────────────────────────────────────────────────────
pub mod context;
pub mod http;
pub mod middleware;
pub mod router;

// ── Caching ───────────────────────────────────────────────────────────────────
pub mod cache;
pub mod store;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::ResponseCache;
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::Router;
