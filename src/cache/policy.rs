//! Cache middleware: lookup, replay on hit, intercept on miss.

use std::sync::Arc;

use tracing::{debug, warn};

use super::captured::CapturedResponse;
use super::guard::ConcurrencyGuard;
use super::key::QueryScope;
use super::writer::CachedWriter;
use super::ResponseCache;
use crate::context::Context;
use crate::http::Method;
use crate::middleware::{HandlerFuture, Middleware, Next};
use crate::store::{CacheStore, Expiration};

/// What distinguishes one page-cache variant from another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub scope: QueryScope,
    /// Whether a hit restores the captured headers.
    pub replay_headers: bool,
    /// Whether an aborted request deletes the entry for its key.
    pub invalidate_on_abort: bool,
}

impl CachePolicy {
    pub const STANDARD: Self = Self {
        scope: QueryScope::Full,
        replay_headers: true,
        invalidate_on_abort: true,
    };

    /// Keys on the path alone. Aborted requests are not invalidated.
    pub const WITHOUT_QUERY: Self = Self {
        scope: QueryScope::PathOnly,
        replay_headers: true,
        invalidate_on_abort: false,
    };

    /// Replays status and body only. Aborted requests are not invalidated,
    /// so an aborting handler's output can be served from the cache.
    pub const WITHOUT_HEADER: Self = Self {
        scope: QueryScope::Full,
        replay_headers: false,
        invalidate_on_abort: false,
    };
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// Route-level page cache middleware, built by [`ResponseCache::page`] and
/// its siblings.
///
/// A hit replays the entry and aborts the context, so nothing after this
/// middleware writes to the response.
pub struct CachePage {
    cache: ResponseCache,
    expires: Expiration,
    policy: CachePolicy,
    guard: Option<Arc<ConcurrencyGuard>>,
}

impl CachePage {
    pub fn new(cache: ResponseCache, expires: Expiration, policy: CachePolicy) -> Self {
        Self {
            cache,
            expires,
            policy,
            guard: None,
        }
    }

    /// Serializes every request through this middleware instance.
    pub fn guarded(mut self) -> Self {
        self.guard = Some(Arc::new(ConcurrencyGuard::new()));
        self
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    pub fn is_guarded(&self) -> bool {
        self.guard.is_some()
    }
}

impl Middleware for CachePage {
    fn handle(&self, mut ctx: Context, next: Next) -> HandlerFuture {
        let cache = self.cache.clone();
        let expires = self.expires;
        let policy = self.policy;
        let guard = self.guard.clone();

        Box::pin(async move {
            if *ctx.request().method() != Method::Get {
                return next.run(ctx).await;
            }

            let _permit = match &guard {
                Some(guard) => Some(guard.acquire().await),
                None => None,
            };

            let key = cache.key_for(ctx.request(), policy.scope);
            if let Some(captured) = cache.lookup(&key).await {
                debug!(key = %key, "cache hit");
                replay(&mut ctx, &captured, policy.replay_headers).await;
                ctx.abort();
                return ctx;
            }

            let store = cache.store().clone();
            let mode = cache.capture_mode();
            let writer_key = key.clone();
            ctx.replace_writer(move |inner| {
                Box::new(CachedWriter::new(inner, store, writer_key, expires, mode))
            });

            let mut ctx = next.run(ctx).await;

            if ctx.is_aborted() && policy.invalidate_on_abort {
                cache.invalidate(&key).await;
            } else {
                ctx.writer_mut().complete().await;
            }
            ctx
        })
    }
}

/// Site-wide layer: replays any cached entry for the request and otherwise
/// passes through without capturing anything.
pub struct SiteCache {
    cache: ResponseCache,
}

impl SiteCache {
    pub fn new(cache: ResponseCache) -> Self {
        Self { cache }
    }
}

impl Middleware for SiteCache {
    fn handle(&self, mut ctx: Context, next: Next) -> HandlerFuture {
        let cache = self.cache.clone();
        Box::pin(async move {
            if *ctx.request().method() != Method::Get {
                return next.run(ctx).await;
            }
            let key = cache.key_for(ctx.request(), QueryScope::Full);
            match cache.lookup(&key).await {
                Some(captured) => {
                    debug!(key = %key, "site cache hit");
                    replay(&mut ctx, &captured, true).await;
                    ctx.abort();
                    ctx
                }
                None => next.run(ctx).await,
            }
        })
    }
}

/// The cache's store, as found in request extensions after
/// [`ExposeStore`] has run.
#[derive(Clone)]
pub struct StoreHandle(pub Arc<dyn CacheStore>);

impl StoreHandle {
    pub fn store(&self) -> &dyn CacheStore {
        self.0.as_ref()
    }
}

/// Puts a [`StoreHandle`] into every request's extensions.
pub struct ExposeStore {
    store: Arc<dyn CacheStore>,
}

impl ExposeStore {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }
}

impl Middleware for ExposeStore {
    fn handle(&self, mut ctx: Context, next: Next) -> HandlerFuture {
        ctx.extensions_mut().insert(StoreHandle(self.store.clone()));
        Box::pin(next.run(ctx))
    }
}

async fn replay(ctx: &mut Context, captured: &CapturedResponse, with_headers: bool) {
    if let Err(err) = captured.replay(ctx.writer_mut(), with_headers).await {
        warn!(error = %err, "failed to replay cached response");
    }
}
