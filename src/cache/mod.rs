//! HTTP response caching.
//!
//! [`ResponseCache`] hands out middleware for the router. On a `GET` it derives
//! a [`CacheKey`] from the request and looks it up in the configured
//! [`CacheStore`]. A hit replays the stored [`CapturedResponse`] and skips the
//! handler. A miss installs a [`CachedWriter`] so the handler's successful
//! response is stored for the next request.
//!
//! | Middleware | Key | Replays headers | Drops entry on abort | Serialized |
//! |---|---|---|---|---|
//! | [`page`](ResponseCache::page) | path + query | yes | yes | no |
//! | [`page_atomic`](ResponseCache::page_atomic) | path + query | yes | yes | yes |
//! | [`page_without_query`](ResponseCache::page_without_query) | path | yes | no | no |
//! | [`page_without_header`](ResponseCache::page_without_header) | path + query | no | no | no |
//!
//! Store failures never fail a request: lookups degrade to a miss and
//! persistence errors are logged.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::http::Request;
use crate::store::{CacheStore, DEFAULT_JANITOR_INTERVAL, Expiration, InMemoryStore};

mod captured;
mod config;
mod error;
mod guard;
mod key;
mod policy;
mod writer;

pub use captured::{CapturedResponse, HeaderValues};
pub use config::{CacheConfig, StoreBackend};
pub use error::CacheError;
pub use guard::{ConcurrencyGuard, GuardPermit};
pub use key::{
    CacheKey, ExclusionSet, MAX_ESCAPED_LEN, PAGE_CACHE_PREFIX, QueryScope, create_key, derive_key,
    request_key,
};
pub use policy::{CachePage, CachePolicy, ExposeStore, SiteCache, StoreHandle};
pub use writer::{CachedWriter, CaptureMode};

struct Shared {
    store: Arc<dyn CacheStore>,
    exclusions: RwLock<ExclusionSet>,
    prefix: String,
    capture_mode: CaptureMode,
}

/// A response cache over one store. Cheap to clone; clones share the store
/// and the excluded query parameters.
#[derive(Clone)]
pub struct ResponseCache {
    shared: Arc<Shared>,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self::with_settings(store, PAGE_CACHE_PREFIX.to_owned(), CaptureMode::default())
    }

    /// A cache over a fresh [`InMemoryStore`].
    ///
    /// Inside a Tokio runtime the store's janitor purges expired entries every
    /// [`DEFAULT_JANITOR_INTERVAL`]; outside one, expired entries are only
    /// dropped when their key is touched again.
    pub fn in_memory(default_expiration: Duration) -> Self {
        Self::new(InMemoryStore::shared(
            default_expiration,
            DEFAULT_JANITOR_INTERVAL,
        ))
    }

    #[cfg(feature = "redis")]
    pub async fn redis(url: &str, default_expiration: Duration) -> Result<Self, CacheError> {
        let store = crate::store::RedisStore::connect(url, default_expiration).await?;
        Ok(Self::new(Arc::new(store)))
    }

    /// Applies `config` on top of an existing store; `config.backend` is
    /// ignored.
    pub fn with_config(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        let cache = Self::with_settings(store, config.key_prefix.clone(), config.capture_mode);
        cache.add_excluded_query_params(config.excluded_query_params.iter().cloned());
        cache
    }

    /// Builds the configured backend, then the cache on top of it.
    ///
    /// A memory backend gets a janitor every `janitor_interval_secs`
    /// ([`DEFAULT_JANITOR_INTERVAL`] when unset, none when zero).
    pub async fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
        let store: Arc<dyn CacheStore> = match &config.backend {
            StoreBackend::Memory {
                janitor_interval_secs,
            } => {
                let every = janitor_interval_secs
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_JANITOR_INTERVAL);
                InMemoryStore::shared(config.default_expiration(), every)
            }
            #[cfg(feature = "redis")]
            StoreBackend::Redis { url } => Arc::new(
                crate::store::RedisStore::connect(url, config.default_expiration()).await?,
            ),
        };
        debug!(backend = ?config.backend, mode = ?config.capture_mode, "response cache configured");
        Ok(Self::with_config(store, config))
    }

    fn with_settings(store: Arc<dyn CacheStore>, prefix: String, capture_mode: CaptureMode) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                exclusions: RwLock::new(ExclusionSet::new()),
                prefix,
                capture_mode,
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.shared.store
    }

    pub fn prefix(&self) -> &str {
        &self.shared.prefix
    }

    pub fn capture_mode(&self) -> CaptureMode {
        self.shared.capture_mode
    }

    /// Query parameters ignored when deriving keys, for every middleware of
    /// this cache (including ones created earlier).
    pub fn add_excluded_query_params<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shared.exclusions.write().extend(names);
    }

    pub fn excluded_query_params(&self) -> ExclusionSet {
        self.shared.exclusions.read().clone()
    }

    pub fn key_for(&self, request: &Request, scope: QueryScope) -> CacheKey {
        let exclusions = self.shared.exclusions.read();
        request_key(&self.shared.prefix, request, &exclusions, scope)
    }

    /// Caches successful `GET` responses for `ttl`.
    pub fn page(&self, ttl: impl Into<Expiration>) -> CachePage {
        CachePage::new(self.clone(), ttl.into(), CachePolicy::STANDARD)
    }

    /// Like [`page`](Self::page), but one request at a time.
    pub fn page_atomic(&self, ttl: impl Into<Expiration>) -> CachePage {
        self.page(ttl).guarded()
    }

    /// Keys on the path only, so every query string shares one entry.
    pub fn page_without_query(&self, ttl: impl Into<Expiration>) -> CachePage {
        CachePage::new(self.clone(), ttl.into(), CachePolicy::WITHOUT_QUERY)
    }

    /// Replays status and body but not headers.
    pub fn page_without_header(&self, ttl: impl Into<Expiration>) -> CachePage {
        CachePage::new(self.clone(), ttl.into(), CachePolicy::WITHOUT_HEADER)
    }

    /// Serves existing entries without populating new ones.
    pub fn site(&self) -> SiteCache {
        SiteCache::new(self.clone())
    }

    /// Exposes the store to handlers as a [`StoreHandle`] extension.
    pub fn store_middleware(&self) -> ExposeStore {
        ExposeStore::new(self.shared.store.clone())
    }

    pub(crate) async fn lookup(&self, key: &CacheKey) -> Option<CapturedResponse> {
        match captured::load(self.shared.store.as_ref(), key.as_str()).await {
            Ok(captured) => Some(captured),
            Err(err) if err.is_miss() => None,
            Err(err) => {
                warn!(key = %key, error = %err, "cache lookup failed, treating as miss");
                None
            }
        }
    }

    pub(crate) async fn invalidate(&self, key: &CacheKey) {
        match self.shared.store.delete(key.as_str()).await {
            Ok(()) => debug!(key = %key, "aborted response evicted"),
            Err(err) if err.is_miss() => {}
            Err(err) => warn!(key = %key, error = %err, "failed to evict aborted response"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusions_apply_to_existing_clones() {
        let cache = ResponseCache::in_memory(Duration::from_secs(60));
        let clone = cache.clone();
        cache.add_excluded_query_params(["name"]);

        let a = clone.key_for(&Request::get("/x?name=a"), QueryScope::Full);
        let b = clone.key_for(&Request::get("/x?name=b"), QueryScope::Full);
        assert_eq!(a, b);
        assert_eq!(clone.excluded_query_params().len(), 1);
    }

    #[tokio::test]
    async fn with_config_applies_settings() {
        let config = CacheConfig {
            key_prefix: "app".into(),
            capture_mode: CaptureMode::PerWrite,
            excluded_query_params: vec!["utm".into()],
            ..CacheConfig::default()
        };
        let cache = ResponseCache::from_config(&config).await.unwrap();
        assert_eq!(cache.prefix(), "app");
        assert_eq!(cache.capture_mode(), CaptureMode::PerWrite);
        let key = cache.key_for(&Request::get("/x?utm=1"), QueryScope::Full);
        assert_eq!(key.as_str(), "app:%2Fx");
    }

    #[tokio::test]
    async fn memory_backends_get_a_janitor_unless_disabled() {
        let cache = ResponseCache::in_memory(Duration::from_secs(60));
        assert_eq!(Arc::weak_count(cache.store()), 1);

        let configured = ResponseCache::from_config(&CacheConfig::default()).await.unwrap();
        assert_eq!(Arc::weak_count(configured.store()), 1);

        let disabled = CacheConfig {
            backend: StoreBackend::Memory {
                janitor_interval_secs: Some(0),
            },
            ..CacheConfig::default()
        };
        let disabled = ResponseCache::from_config(&disabled).await.unwrap();
        assert_eq!(Arc::weak_count(disabled.store()), 0);
    }

    #[tokio::test]
    async fn undecodable_entries_are_misses() {
        let cache = ResponseCache::in_memory(Duration::from_secs(60));
        let key = cache.key_for(&Request::get("/x"), QueryScope::Full);
        cache
            .store()
            .set(key.as_str(), bytes::Bytes::from_static(b"garbage"), Expiration::Default)
            .await
            .unwrap();
        assert!(cache.lookup(&key).await.is_none());
    }

    #[tokio::test]
    async fn invalidating_a_missing_key_is_quiet() {
        let cache = ResponseCache::in_memory(Duration::from_secs(60));
        let key = cache.key_for(&Request::get("/nothing"), QueryScope::Full);
        cache.invalidate(&key).await;
        assert!(cache.lookup(&key).await.is_none());
    }
}
