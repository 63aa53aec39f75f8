//! Process-local store backed by a concurrent map.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, mapref::entry::Entry};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::trace;

use super::{CacheStore, Expiration, StoreError};

#[derive(Debug, Clone)]
struct Item {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Item {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Purge period used by [`InMemoryStore::shared`] callers that do not pick one.
pub const DEFAULT_JANITOR_INTERVAL: Duration = Duration::from_secs(60);

/// In-memory [`CacheStore`].
///
/// Expired entries are invisible to every operation and are removed lazily
/// when touched, by [`purge_expired`](Self::purge_expired), or by the
/// background task started with [`spawn_janitor`](Self::spawn_janitor).
///
/// Time is read from [`tokio::time::Instant`], so expiry follows a paused
/// test clock. A TTL too large to represent as a deadline never expires.
#[derive(Debug)]
pub struct InMemoryStore {
    items: DashMap<String, Item>,
    default_expiration: Duration,
}

impl InMemoryStore {
    /// Creates a store whose [`Expiration::Default`] means `default_expiration`.
    pub fn new(default_expiration: Duration) -> Self {
        Self {
            items: DashMap::new(),
            default_expiration,
        }
    }

    /// Creates a shared store and, when called inside a Tokio runtime, starts
    /// its janitor with period `janitor_every`. A zero period starts none.
    pub fn shared(default_expiration: Duration, janitor_every: Duration) -> Arc<Self> {
        let store = Arc::new(Self::new(default_expiration));
        if !janitor_every.is_zero() && Handle::try_current().is_ok() {
            store.spawn_janitor(janitor_every);
        }
        store
    }

    /// Number of entries held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drops every expired entry now.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.items.retain(|_, item| !item.is_expired(now));
    }

    /// Purges expired entries every `every` until the store is dropped.
    pub fn spawn_janitor(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                store.purge_expired();
                trace!(remaining = store.len(), "expired cache entries purged");
            }
        })
    }

    fn item(&self, value: Bytes, expires: Expiration) -> Item {
        let expires_at = expires
            .resolve(self.default_expiration)
            .and_then(|ttl| Instant::now().checked_add(ttl));
        Item { value, expires_at }
    }

    fn adjust<F>(&self, key: &str, apply: F) -> Result<u64, StoreError>
    where
        F: FnOnce(u64) -> u64,
    {
        let now = Instant::now();
        let mut item = match self.items.get_mut(key) {
            Some(item) if !item.is_expired(now) => item,
            _ => return Err(StoreError::CacheMiss),
        };

        let current = std::str::from_utf8(&item.value)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .ok_or_else(|| StoreError::NotNumeric {
                key: key.to_owned(),
            })?;

        let next = apply(current);
        item.value = Bytes::from(next.to_string());
        Ok(next)
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        let now = Instant::now();
        if let Some(item) = self.items.get(key) {
            if !item.is_expired(now) {
                return Ok(item.value.clone());
            }
        }
        self.items.remove_if(key, |_, item| item.is_expired(now));
        Err(StoreError::CacheMiss)
    }

    async fn set(&self, key: &str, value: Bytes, expires: Expiration) -> Result<(), StoreError> {
        self.items.insert(key.to_owned(), self.item(value, expires));
        Ok(())
    }

    async fn add(&self, key: &str, value: Bytes, expires: Expiration) -> Result<(), StoreError> {
        let item = self.item(value, expires);
        match self.items.entry(key.to_owned()) {
            Entry::Occupied(mut slot) => {
                if !slot.get().is_expired(Instant::now()) {
                    return Err(StoreError::NotStored);
                }
                slot.insert(item);
            }
            Entry::Vacant(slot) => {
                slot.insert(item);
            }
        }
        Ok(())
    }

    async fn replace(
        &self,
        key: &str,
        value: Bytes,
        expires: Expiration,
    ) -> Result<(), StoreError> {
        let item = self.item(value, expires);
        match self.items.entry(key.to_owned()) {
            Entry::Occupied(mut slot) if !slot.get().is_expired(Instant::now()) => {
                slot.insert(item);
                Ok(())
            }
            _ => Err(StoreError::NotStored),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let now = Instant::now();
        match self.items.remove(key) {
            Some((_, item)) if !item.is_expired(now) => Ok(()),
            _ => Err(StoreError::CacheMiss),
        }
    }

    async fn increment(&self, key: &str, delta: u64) -> Result<u64, StoreError> {
        self.adjust(key, |n| n.wrapping_add(delta))
    }

    async fn decrement(&self, key: &str, delta: u64) -> Result<u64, StoreError> {
        self.adjust(key, |n| n.saturating_sub(delta))
    }

    async fn flush(&self) -> Result<(), StoreError> {
        self.items.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> InMemoryStore {
        InMemoryStore::new(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn typical_get_set() {
        let s = store();
        assert!(matches!(s.get("k").await, Err(StoreError::CacheMiss)));
        s.set("k", Bytes::from_static(b"v"), Expiration::Default)
            .await
            .unwrap();
        assert_eq!(s.get("k").await.unwrap(), Bytes::from_static(b"v"));
    }

    #[tokio::test(start_paused = true)]
    async fn values_expire() {
        let s = store();
        s.set("short", Bytes::from_static(b"1"), Duration::from_secs(1).into())
            .await
            .unwrap();
        s.set("default", Bytes::from_static(b"2"), Expiration::Default)
            .await
            .unwrap();
        s.set("forever", Bytes::from_static(b"3"), Expiration::Never)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(s.get("short").await.unwrap_err().is_miss());
        assert!(s.get("default").await.is_ok());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(s.get("default").await.unwrap_err().is_miss());
        assert_eq!(s.get("forever").await.unwrap(), Bytes::from_static(b"3"));
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_ttl_never_expires() {
        let s = store();
        s.set("k", Bytes::from_static(b"v"), Expiration::After(Duration::MAX))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(365 * 24 * 3600)).await;
        assert_eq!(s.get("k").await.unwrap(), Bytes::from_static(b"v"));

        let huge = InMemoryStore::new(Duration::from_secs(u64::MAX));
        huge.add("k", Bytes::from_static(b"v"), Expiration::Default)
            .await
            .unwrap();
        assert!(huge.get("k").await.is_ok());
    }

    #[tokio::test]
    async fn add_only_when_absent() {
        let s = store();
        s.add("k", Bytes::from_static(b"a"), Expiration::Default)
            .await
            .unwrap();
        let again = s
            .add("k", Bytes::from_static(b"b"), Expiration::Default)
            .await;
        assert!(matches!(again, Err(StoreError::NotStored)));
        assert_eq!(s.get("k").await.unwrap(), Bytes::from_static(b"a"));
    }

    #[tokio::test(start_paused = true)]
    async fn add_over_expired_entry() {
        let s = store();
        s.set("k", Bytes::from_static(b"old"), Duration::from_secs(1).into())
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        s.add("k", Bytes::from_static(b"new"), Expiration::Default)
            .await
            .unwrap();
        assert_eq!(s.get("k").await.unwrap(), Bytes::from_static(b"new"));
    }

    #[tokio::test]
    async fn replace_only_when_present() {
        let s = store();
        let missing = s
            .replace("k", Bytes::from_static(b"a"), Expiration::Default)
            .await;
        assert!(matches!(missing, Err(StoreError::NotStored)));

        s.set("k", Bytes::from_static(b"a"), Expiration::Default)
            .await
            .unwrap();
        s.replace("k", Bytes::from_static(b"b"), Expiration::Default)
            .await
            .unwrap();
        assert_eq!(s.get("k").await.unwrap(), Bytes::from_static(b"b"));
    }

    #[tokio::test]
    async fn delete_reports_missing_keys() {
        let s = store();
        s.set("k", Bytes::from_static(b"a"), Expiration::Default)
            .await
            .unwrap();
        s.delete("k").await.unwrap();
        assert!(s.delete("k").await.unwrap_err().is_miss());
    }

    #[tokio::test]
    async fn increment_and_decrement() {
        let s = store();
        assert!(s.increment("n", 1).await.unwrap_err().is_miss());

        s.set("n", Bytes::from_static(b"10"), Expiration::Default)
            .await
            .unwrap();
        assert_eq!(s.increment("n", 5).await.unwrap(), 15);
        assert_eq!(s.decrement("n", 3).await.unwrap(), 12);
        assert_eq!(s.decrement("n", 100).await.unwrap(), 0);
        assert_eq!(s.get("n").await.unwrap(), Bytes::from_static(b"0"));

        s.set("n", Bytes::from(u64::MAX.to_string()), Expiration::Default)
            .await
            .unwrap();
        assert_eq!(s.increment("n", 2).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn counters_reject_non_numbers() {
        let s = store();
        s.set("text", Bytes::from_static(b"abc"), Expiration::Default)
            .await
            .unwrap();
        assert!(matches!(
            s.increment("text", 1).await,
            Err(StoreError::NotNumeric { key }) if key == "text"
        ));
    }

    #[tokio::test]
    async fn flush_clears_everything() {
        let s = store();
        for key in ["a", "b", "c"] {
            s.set(key, Bytes::from_static(b"x"), Expiration::Default)
                .await
                .unwrap();
        }
        s.flush().await.unwrap();
        assert!(s.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn janitor_purges_expired_entries() {
        let s = Arc::new(store());
        s.set("gone", Bytes::from_static(b"x"), Duration::from_secs(1).into())
            .await
            .unwrap();
        s.set("kept", Bytes::from_static(b"y"), Expiration::Never)
            .await
            .unwrap();
        let janitor = s.spawn_janitor(Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(s.len(), 1);

        drop(s);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(janitor.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn shared_store_reclaims_keys_never_read_again() {
        let s = InMemoryStore::shared(Duration::from_secs(1), DEFAULT_JANITOR_INTERVAL);
        for i in 0..1000 {
            s.set(&format!("page-{i}"), Bytes::from_static(b"x"), Expiration::Default)
                .await
                .unwrap();
        }
        assert_eq!(s.len(), 1000);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(s.is_empty());
    }

    #[test]
    fn shared_outside_a_runtime_starts_no_janitor() {
        let s = InMemoryStore::shared(Duration::from_secs(1), DEFAULT_JANITOR_INTERVAL);
        assert_eq!(Arc::strong_count(&s), 1);
    }
}
