//! Key/value persistence underneath the response cache.
//!
//! A store maps string keys to opaque byte values with an expiration. The
//! cache only ever persists one shape of value (an encoded
//! [`CapturedResponse`](crate::cache::CapturedResponse)); counters are part of
//! the contract for other collaborators sharing the same store.
//!
//! Backends:
//!
//! - [`InMemoryStore`]: process-local, concurrent map.
//! - [`RedisStore`]: behind the `redis` feature.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::{DEFAULT_JANITOR_INTERVAL, InMemoryStore};
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

/// How long a stored value lives.
///
/// A zero [`Duration`] converts to [`Expiration::Default`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiration {
    /// Use the store's configured default expiration.
    #[default]
    Default,
    /// Keep until deleted or flushed.
    Never,
    /// Expire after the given duration.
    After(Duration),
}

impl Expiration {
    /// Resolves to a concrete time-to-live, `None` meaning "no expiry".
    ///
    /// A zero store default also means "no expiry".
    pub fn resolve(self, store_default: Duration) -> Option<Duration> {
        match self {
            Self::Default if store_default.is_zero() => None,
            Self::Default => Some(store_default),
            Self::Never => None,
            Self::After(ttl) => Some(ttl),
        }
    }
}

impl From<Duration> for Expiration {
    fn from(ttl: Duration) -> Self {
        if ttl.is_zero() {
            Self::Default
        } else {
            Self::After(ttl)
        }
    }
}

/// Errors reported by a [`CacheStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key is absent or expired. Expected on every first request.
    #[error("cache miss")]
    CacheMiss,

    /// `add` found an existing key, or `replace` found none.
    #[error("item not stored")]
    NotStored,

    #[error("value stored at {key} is not an unsigned integer")]
    NotNumeric { key: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

impl StoreError {
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::CacheMiss)
    }
}

/// Asynchronous key/value store with expiration.
///
/// Implementations must be safe for concurrent use; the cache shares one
/// store across every request.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetches the value for `key`.
    ///
    /// # Errors
    ///
    /// [`StoreError::CacheMiss`] when the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Bytes, StoreError>;

    /// Stores `value` unconditionally.
    async fn set(&self, key: &str, value: Bytes, expires: Expiration) -> Result<(), StoreError>;

    /// Stores `value` only if `key` does not exist yet.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotStored`] when the key already holds a live value.
    async fn add(&self, key: &str, value: Bytes, expires: Expiration) -> Result<(), StoreError>;

    /// Stores `value` only if `key` already exists.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotStored`] when the key is absent or expired.
    async fn replace(&self, key: &str, value: Bytes, expires: Expiration)
    -> Result<(), StoreError>;

    /// Removes `key`.
    ///
    /// # Errors
    ///
    /// [`StoreError::CacheMiss`] when there was nothing to remove.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Adds `delta` to the decimal counter at `key`.
    ///
    /// Results are exact while they fit the backend's integer range. Past it
    /// the behavior is backend-specific: [`InMemoryStore`] wraps at
    /// `u64::MAX`, while [`RedisStore`](crate::store::RedisStore) computes in
    /// Lua numbers and is only exact up to 2^53.
    async fn increment(&self, key: &str, delta: u64) -> Result<u64, StoreError>;

    /// Subtracts `delta` from the decimal counter at `key`, stopping at zero.
    async fn decrement(&self, key: &str, delta: u64) -> Result<u64, StoreError>;

    /// Removes every entry.
    async fn flush(&self) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_duration_means_default() {
        assert_eq!(Expiration::from(Duration::ZERO), Expiration::Default);
        assert_eq!(
            Expiration::from(Duration::from_secs(3)),
            Expiration::After(Duration::from_secs(3))
        );
    }

    #[test]
    fn resolve_uses_store_default() {
        let default = Duration::from_secs(60);
        assert_eq!(Expiration::Default.resolve(default), Some(default));
        assert_eq!(Expiration::Default.resolve(Duration::ZERO), None);
        assert_eq!(Expiration::Never.resolve(default), None);
        assert_eq!(
            Expiration::After(Duration::from_secs(1)).resolve(default),
            Some(Duration::from_secs(1))
        );
    }
}
