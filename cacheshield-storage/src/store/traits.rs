//! Key-value store capability trait.
//!
//! This is the only surface the cache layer needs from the external store.
//! Every operation touches a single key and relies on the store's own
//! single-key atomicity; the cache layer adds nothing beyond what
//! `set_if_absent_with_ttl` provides.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cacheshield_core::CacheShieldResult;

/// Store backend trait for pluggable key-value stores.
///
/// Implementations must be thread-safe. Transport failures are reported as
/// `StoreError::Unavailable`; the cache layer never retries them.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a key. `None` means the key is not present (or has expired).
    async fn get(&self, key: &str) -> CacheShieldResult<Option<Vec<u8>>>;

    /// Write a key with no expiry.
    async fn set(&self, key: &str, value: Vec<u8>) -> CacheShieldResult<()>;

    /// Write a key that the store evicts after `ttl`.
    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration)
        -> CacheShieldResult<()>;

    /// Write a key only if it is absent. Returns true when the write happened.
    async fn set_if_absent_with_ttl(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> CacheShieldResult<bool>;

    /// Remove a key. Returns true if it was present.
    async fn delete(&self, key: &str) -> CacheShieldResult<bool>;

    /// Reset the expiry of an existing key. Returns false if the key is absent.
    async fn refresh_ttl(&self, key: &str, ttl: Duration) -> CacheShieldResult<bool>;
}

#[async_trait]
impl<S: KvStore + ?Sized> KvStore for Arc<S> {
    async fn get(&self, key: &str) -> CacheShieldResult<Option<Vec<u8>>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> CacheShieldResult<()> {
        (**self).set(key, value).await
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> CacheShieldResult<()> {
        (**self).set_with_ttl(key, value, ttl).await
    }

    async fn set_if_absent_with_ttl(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> CacheShieldResult<bool> {
        (**self).set_if_absent_with_ttl(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> CacheShieldResult<bool> {
        (**self).delete(key).await
    }

    async fn refresh_ttl(&self, key: &str, ttl: Duration) -> CacheShieldResult<bool> {
        (**self).refresh_ttl(key, ttl).await
    }
}
