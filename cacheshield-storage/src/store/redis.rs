//! Redis-backed [`KvStore`].
//!
//! Uses a `ConnectionManager`, which reconnects transparently; a command
//! that fails while the connection is down surfaces as
//! `StoreError::Unavailable`.

use std::time::Duration;

use async_trait::async_trait;
use cacheshield_core::{CacheShieldResult, StoreError};
use redis::aio::ConnectionManager;

use super::traits::KvStore;

/// Redis store adapter.
///
/// # Example
///
/// ```no_run
/// use cacheshield_storage::store::RedisKvStore;
///
/// # async fn example() -> cacheshield_core::CacheShieldResult<()> {
/// let store = RedisKvStore::connect("redis://127.0.0.1/").await?;
/// # let _ = store;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisKvStore {
    connection: ConnectionManager,
}

impl RedisKvStore {
    /// Connect to the Redis server at `redis_url`.
    pub async fn connect(redis_url: &str) -> CacheShieldResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| unavailable("CONNECT", redis_url, e))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| unavailable("CONNECT", redis_url, e))?;
        Ok(Self { connection })
    }

    /// Wrap an existing connection manager.
    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

fn unavailable(operation: &'static str, key: &str, err: redis::RedisError) -> StoreError {
    StoreError::Unavailable {
        operation,
        key: key.to_string(),
        reason: err.to_string(),
    }
}

/// Redis rejects `PX 0`; sub-millisecond TTLs round up to one millisecond.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> CacheShieldResult<Option<Vec<u8>>> {
        let mut conn = self.connection.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable("GET", key, e))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> CacheShieldResult<()> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable("SET", key, e))?;
        Ok(())
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> CacheShieldResult<()> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable("SET PX", key, e))?;
        Ok(())
    }

    async fn set_if_absent_with_ttl(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> CacheShieldResult<bool> {
        let mut conn = self.connection.clone();
        // Nil reply when the key already exists, "OK" when written.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable("SET NX PX", key, e))?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> CacheShieldResult<bool> {
        let mut conn = self.connection.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable("DEL", key, e))?;
        Ok(removed > 0)
    }

    async fn refresh_ttl(&self, key: &str, ttl: Duration) -> CacheShieldResult<bool> {
        let mut conn = self.connection.clone();
        let updated: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable("PEXPIRE", key, e))?;
        Ok(updated == 1)
    }
}
