//! Redis-backed store (feature `redis`).

use std::time::Duration;

use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Client, Script};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use super::{CacheStore, Expiration, StoreError};

// Counter scripts return -1 for a missing key and -2 for a non-numeric value.
const INCREMENT_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then return -1 end
local n = tonumber(current)
if not n or n < 0 or n % 1 ~= 0 then return -2 end
n = n + tonumber(ARGV[1])
redis.call('SET', KEYS[1], string.format('%d', n), 'KEEPTTL')
return n
"#;

const DECREMENT_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then return -1 end
local n = tonumber(current)
if not n or n < 0 or n % 1 ~= 0 then return -2 end
n = n - tonumber(ARGV[1])
if n < 0 then n = 0 end
redis.call('SET', KEYS[1], string.format('%d', n), 'KEEPTTL')
return n
"#;

/// [`CacheStore`] on a Redis server, through a reconnecting
/// [`ConnectionManager`].
///
/// Counters are kept as decimal strings and adjusted by Lua scripts so that
/// misses, non-numeric values and the zero floor behave like
/// [`InMemoryStore`](super::InMemoryStore). Counter arithmetic runs in Lua
/// numbers, so values beyond 2^53 lose precision.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    default_expiration: Duration,
    increment: Script,
    decrement: Script,
}

impl RedisStore {
    /// Connects to `url` (e.g. `redis://127.0.0.1:6379/0`).
    ///
    /// # Errors
    ///
    /// [`StoreError::Redis`] if the URL is invalid or the server unreachable.
    pub async fn connect(url: &str, default_expiration: Duration) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        debug!(url, "connected to redis cache store");
        Ok(Self::with_connection(conn, default_expiration))
    }

    /// Wraps an existing connection manager.
    pub fn with_connection(conn: ConnectionManager, default_expiration: Duration) -> Self {
        Self {
            conn,
            default_expiration,
            increment: Script::new(INCREMENT_SCRIPT),
            decrement: Script::new(DECREMENT_SCRIPT),
        }
    }

    fn ttl_millis(&self, expires: Expiration) -> Option<u64> {
        expires
            .resolve(self.default_expiration)
            .map(|ttl| u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1))
    }

    async fn conditional_set(
        &self,
        key: &str,
        value: Bytes,
        expires: Expiration,
        condition: &str,
    ) -> Result<(), StoreError> {
        let mut cmd = ::redis::cmd("SET");
        cmd.arg(key).arg(value.as_ref());
        if let Some(ms) = self.ttl_millis(expires) {
            cmd.arg("PX").arg(ms);
        }
        cmd.arg(condition);

        let mut conn = self.conn.clone();
        let reply: Option<String> = cmd.query_async(&mut conn).await?;
        match reply {
            Some(_) => Ok(()),
            None => Err(StoreError::NotStored),
        }
    }

    async fn run_counter(&self, script: &Script, key: &str, delta: u64) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let result: i64 = script.key(key).arg(delta).invoke_async(&mut conn).await?;
        match result {
            -1 => Err(StoreError::CacheMiss),
            -2 => Err(StoreError::NotNumeric {
                key: key.to_owned(),
            }),
            n => Ok(n.max(0) as u64),
        }
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        value.map(Bytes::from).ok_or(StoreError::CacheMiss)
    }

    async fn set(&self, key: &str, value: Bytes, expires: Expiration) -> Result<(), StoreError> {
        let mut cmd = ::redis::cmd("SET");
        cmd.arg(key).arg(value.as_ref());
        if let Some(ms) = self.ttl_millis(expires) {
            cmd.arg("PX").arg(ms);
        }
        let mut conn = self.conn.clone();
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn add(&self, key: &str, value: Bytes, expires: Expiration) -> Result<(), StoreError> {
        self.conditional_set(key, value, expires, "NX").await
    }

    async fn replace(
        &self,
        key: &str,
        value: Bytes,
        expires: Expiration,
    ) -> Result<(), StoreError> {
        self.conditional_set(key, value, expires, "XX").await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(key).await?;
        if removed == 0 {
            return Err(StoreError::CacheMiss);
        }
        Ok(())
    }

    async fn increment(&self, key: &str, delta: u64) -> Result<u64, StoreError> {
        self.run_counter(&self.increment, key, delta).await
    }

    async fn decrement(&self, key: &str, delta: u64) -> Result<u64, StoreError> {
        self.run_counter(&self.decrement, key, delta).await
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = ::redis::cmd("FLUSHDB").query_async(&mut conn).await?;
        Ok(())
    }
}
