//! Serde-backed cache configuration.

use std::time::Duration;

use serde::Deserialize;

use super::error::CacheError;
use super::key::PAGE_CACHE_PREFIX;
use super::writer::CaptureMode;

/// Settings for building a [`ResponseCache`](super::ResponseCache).
///
/// ```
/// use rttp_cache::cache::{CacheConfig, CaptureMode, StoreBackend};
///
/// let config = CacheConfig::from_json(r#"{
///     "default_expiration_secs": 30,
///     "capture_mode": "per_write",
///     "excluded_query_params": ["utm_source"],
///     "backend": { "kind": "memory", "janitor_interval_secs": 10 }
/// }"#).unwrap();
///
/// assert_eq!(config.capture_mode, CaptureMode::PerWrite);
/// assert_eq!(config.backend, StoreBackend::Memory { janitor_interval_secs: Some(10) });
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// TTL used by the store for [`Expiration::Default`](crate::store::Expiration::Default).
    pub default_expiration_secs: u64,
    pub key_prefix: String,
    pub capture_mode: CaptureMode,
    pub excluded_query_params: Vec<String>,
    pub backend: StoreBackend,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_expiration_secs: 60,
            key_prefix: PAGE_CACHE_PREFIX.to_owned(),
            capture_mode: CaptureMode::default(),
            excluded_query_params: Vec::new(),
            backend: StoreBackend::default(),
        }
    }
}

impl CacheConfig {
    pub fn from_json(raw: &str) -> Result<Self, CacheError> {
        serde_json::from_str(raw).map_err(CacheError::Config)
    }

    pub fn default_expiration(&self) -> Duration {
        Duration::from_secs(self.default_expiration_secs)
    }
}

/// Which store backs the cache.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum StoreBackend {
    Memory {
        /// Purge period for expired entries: 60 seconds when absent, no
        /// janitor when zero.
        #[serde(default)]
        janitor_interval_secs: Option<u64>,
    },
    #[cfg(feature = "redis")]
    Redis { url: String },
}

impl Default for StoreBackend {
    fn default() -> Self {
        Self::Memory {
            janitor_interval_secs: None,
        }
    }
}
