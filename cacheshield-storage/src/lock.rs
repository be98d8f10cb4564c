//! Advisory rebuild locks on top of the key-value store.
//!
//! A lock is a store key written with set-if-absent and a safety TTL. Its
//! presence alone means "a rebuild is in progress". Release is an
//! unconditional delete and is not ownership-checked; a holder that dies
//! loses the lock when the TTL runs out.
//!
//! # Lifecycle
//!
//! ```text
//! (unlocked) ─── try_acquire() ──→ HeldLock ─── release() ──→ (unlocked)
//!                                     │
//!                                (TTL expires) ──→ (unlocked)
//! ```
//!
//! [`HeldLock`] is only handed out by a successful acquisition and is
//! consumed by [`LockManager::release`], so a caller cannot release a lock it
//! never acquired.

use std::sync::Arc;
use std::time::Duration;

use cacheshield_core::{CacheShieldResult, LockKey, Timestamp};
use chrono::Utc;
use uuid::Uuid;

use crate::store::KvStore;

/// Proof that the current caller acquired a rebuild lock.
#[derive(Debug)]
#[must_use = "a held lock must be released with LockManager::release"]
pub struct HeldLock {
    key: LockKey,
    token: Uuid,
    acquired_at: Timestamp,
    ttl: Duration,
}

impl HeldLock {
    pub fn key(&self) -> &LockKey {
        &self.key
    }

    /// Sentinel written under the lock key. Diagnostic only.
    pub fn token(&self) -> Uuid {
        self.token
    }

    pub fn acquired_at(&self) -> Timestamp {
        self.acquired_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// Acquires and releases advisory locks.
pub struct LockManager<S: KvStore> {
    store: Arc<S>,
}

impl<S: KvStore> LockManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Try once to take the lock. `None` means someone else holds it.
    pub async fn try_acquire(
        &self,
        key: &LockKey,
        ttl: Duration,
    ) -> CacheShieldResult<Option<HeldLock>> {
        let token = Uuid::now_v7();
        let acquired = self
            .store
            .set_if_absent_with_ttl(key.as_str(), token.to_string().into_bytes(), ttl)
            .await?;
        if !acquired {
            tracing::debug!(lock_key = %key, "Rebuild lock held elsewhere");
            return Ok(None);
        }
        tracing::debug!(
            lock_key = %key,
            token = %token,
            ttl_ms = ttl.as_millis() as u64,
            "Rebuild lock acquired"
        );
        Ok(Some(HeldLock {
            key: key.clone(),
            token,
            acquired_at: Utc::now(),
            ttl,
        }))
    }

    /// Release a held lock.
    pub async fn release(&self, lock: HeldLock) -> CacheShieldResult<()> {
        self.store.delete(lock.key.as_str()).await?;
        tracing::debug!(lock_key = %lock.key, token = %lock.token, "Rebuild lock released");
        Ok(())
    }

    /// Whether any holder currently has the lock.
    pub async fn is_locked(&self, key: &LockKey) -> CacheShieldResult<bool> {
        Ok(self.store.get(key.as_str()).await?.is_some())
    }
}

impl<S: KvStore> Clone for LockManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}
