//! In-process key-value store.
//!
//! Backs tests and single-node deployments. Expiry is lazy: expired entries
//! are treated as absent on access and dropped by [`InMemoryKvStore::purge_expired`].
//! Deadlines use `tokio::time::Instant`, so a paused test clock drives them.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use cacheshield_core::CacheShieldResult;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::traits::KvStore;

#[derive(Debug, Clone)]
struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| deadline > now)
    }
}

/// Deadline for a TTL starting at `now`. A TTL too large to represent
/// never expires.
fn expiry(now: Instant, ttl: Duration) -> Option<Instant> {
    now.checked_add(ttl)
}

/// Snapshot of one entry, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    /// Size of the stored bytes.
    pub len: usize,
    /// Time left before the store evicts the entry; `None` if it never expires.
    pub remaining_ttl: Option<Duration>,
}

/// Thread-safe in-memory [`KvStore`].
#[derive(Debug, Default)]
pub struct InMemoryKvStore {
    entries: RwLock<HashMap<String, StoredValue>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|v| v.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Inspect a live entry without decoding it.
    pub async fn inspect(&self, key: &str) -> Option<EntryInfo> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let value = entries.get(key).filter(|v| v.is_live(now))?;
        Some(EntryInfo {
            len: value.bytes.len(),
            remaining_ttl: value.expires_at.map(|deadline| deadline - now),
        })
    }

    /// Drop every expired entry. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, v| v.is_live(now));
        before - entries.len()
    }

    async fn insert(&self, key: &str, bytes: Vec<u8>, ttl: Option<Duration>) {
        let expires_at = ttl.and_then(|ttl| expiry(Instant::now(), ttl));
        self.entries
            .write()
            .await
            .insert(key.to_string(), StoredValue { bytes, expires_at });
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> CacheShieldResult<Option<Vec<u8>>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|v| v.is_live(now))
            .map(|v| v.bytes.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> CacheShieldResult<()> {
        self.insert(key, value, None).await;
        Ok(())
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> CacheShieldResult<()> {
        self.insert(key, value, Some(ttl)).await;
        Ok(())
    }

    async fn set_if_absent_with_ttl(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> CacheShieldResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|v| v.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            StoredValue {
                bytes: value,
                expires_at: expiry(now, ttl),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> CacheShieldResult<bool> {
        let now = Instant::now();
        let removed = self.entries.write().await.remove(key);
        Ok(removed.is_some_and(|v| v.is_live(now)))
    }

    async fn refresh_ttl(&self, key: &str, ttl: Duration) -> CacheShieldResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        match entries.get_mut(key) {
            Some(value) if value.is_live(now) => {
                value.expires_at = expiry(now, ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
