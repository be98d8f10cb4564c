//! Cache client orchestrating the three read strategies.
//!
//! Every strategy reads the data key first and falls back differently:
//!
//! | Strategy | On miss | On expiry | Locking |
//! |----------|---------|-----------|---------|
//! | pass-through | load, cache value or null marker | store TTL evicts | none |
//! | mutex | load under lock, others wait | store TTL evicts | per key |
//! | logical expire | return `None` | serve stale, rebuild in background | per key |
//!
//! Loader failures are never cached. "Not found" is cached as a null marker
//! with the family's short `null_ttl` (or, for logical expiration, as a null
//! slot inside a fresh envelope).

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use cacheshield_core::{
    decode_logical, decode_slot, encode_logical, encode_slot, CacheFamily, CacheKey,
    CacheShieldConfig, CacheShieldError, CacheShieldResult, CacheSlot, Loader, LockError,
    LogicalEnvelope, MutexRetryConfig,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;

use super::stats::{CacheMetrics, CacheStats};
use super::strategy::ReadStrategy;
use crate::lock::{HeldLock, LockManager};
use crate::rebuild::{RebuildScheduler, RebuildTask, Submission};
use crate::store::KvStore;

/// Cache-consistency layer over a [`KvStore`].
///
/// Cloning is cheap: clones share the store, the rebuild pool and the
/// counters.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use cacheshield_core::{loader_fn, CacheFamily, CacheShieldConfig, LoaderError, TtlPolicy};
/// use cacheshield_storage::{CacheClient, InMemoryKvStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> cacheshield_core::CacheShieldResult<()> {
/// let client = CacheClient::new(Arc::new(InMemoryKvStore::new()), CacheShieldConfig::default())?;
/// let shops = CacheFamily::new("shop", "cache:shop:", "lock:shop:", TtlPolicy::default());
/// let loader = loader_fn(|id: u64| async move {
///     Ok::<_, LoaderError>((id == 42).then(|| "Cafe".to_string()))
/// });
///
/// assert_eq!(client.query_with_mutex(&shops, &42, &loader).await?, Some("Cafe".to_string()));
/// assert_eq!(client.query_with_pass_through(&shops, &999, &loader).await?, None);
/// client.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct CacheClient<S: KvStore + 'static> {
    store: Arc<S>,
    locks: LockManager<S>,
    scheduler: Arc<RebuildScheduler>,
    retry: MutexRetryConfig,
    metrics: Arc<CacheMetrics>,
}

impl<S: KvStore + 'static> CacheClient<S> {
    /// Build a client that owns a new rebuild pool.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(store: Arc<S>, config: CacheShieldConfig) -> CacheShieldResult<Self> {
        config.validate()?;
        let scheduler = Arc::new(RebuildScheduler::new(config.rebuild_pool));
        Ok(Self::with_scheduler(store, config.mutex_retry, scheduler))
    }

    /// Build a client around an existing rebuild pool.
    pub fn with_scheduler(
        store: Arc<S>,
        retry: MutexRetryConfig,
        scheduler: Arc<RebuildScheduler>,
    ) -> Self {
        Self {
            locks: LockManager::new(Arc::clone(&store)),
            store,
            scheduler,
            retry,
            metrics: Arc::new(CacheMetrics::default()),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn locks(&self) -> &LockManager<S> {
        &self.locks
    }

    pub fn scheduler(&self) -> &Arc<RebuildScheduler> {
        &self.scheduler
    }

    pub fn retry_config(&self) -> &MutexRetryConfig {
        &self.retry
    }

    pub fn stats(&self) -> CacheStats {
        self.metrics.snapshot()
    }

    /// Stop the rebuild pool after letting queued rebuilds finish.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }

    // ========================================================================
    // READ STRATEGIES
    // ========================================================================

    /// Read with the given strategy.
    pub async fn get<Id, V, L>(
        &self,
        strategy: ReadStrategy,
        family: &CacheFamily,
        id: Id,
        loader: Arc<L>,
    ) -> CacheShieldResult<Option<V>>
    where
        Id: fmt::Display + Send + Sync + 'static,
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
        L: Loader<Id, V> + 'static,
    {
        match strategy {
            ReadStrategy::PassThrough => {
                self.query_with_pass_through(family, &id, loader.as_ref()).await
            }
            ReadStrategy::Mutex => self.query_with_mutex(family, &id, loader.as_ref()).await,
            ReadStrategy::LogicalExpire => {
                self.query_with_logical_expire(family, id, loader).await
            }
        }
    }

    /// Penetration protection: cache "not found" as a null marker.
    ///
    /// Concurrent misses may each call the loader.
    pub async fn query_with_pass_through<Id, V, L>(
        &self,
        family: &CacheFamily,
        id: &Id,
        loader: &L,
    ) -> CacheShieldResult<Option<V>>
    where
        Id: fmt::Display + Send + Sync,
        V: Serialize + DeserializeOwned,
        L: Loader<Id, V> + ?Sized,
    {
        let key = family.data_key(id);
        if let Some(slot) = self.read_slot::<V>(&key).await? {
            return Ok(slot.into_option());
        }
        self.load_and_fill(family, &key, id, loader).await
    }

    /// Breakdown protection: one caller rebuilds a missing key while the
    /// others back off and re-read.
    ///
    /// Waiting is bounded by `max_wait`; past it the call fails with
    /// [`LockError::Timeout`]. The lock is released on every exit path once
    /// acquired.
    pub async fn query_with_mutex<Id, V, L>(
        &self,
        family: &CacheFamily,
        id: &Id,
        loader: &L,
    ) -> CacheShieldResult<Option<V>>
    where
        Id: fmt::Display + Send + Sync,
        V: Serialize + DeserializeOwned,
        L: Loader<Id, V> + ?Sized,
    {
        let key = family.data_key(id);
        let lock_key = family.lock_key(id);
        let started = Instant::now();
        let deadline = started + self.retry.max_wait;
        let mut attempts: u32 = 0;

        loop {
            // Only the first read counts towards hit/miss statistics.
            let slot = if attempts == 0 {
                self.read_slot::<V>(&key).await?
            } else {
                self.fetch_slot::<V>(&key).await?
            };
            if let Some(slot) = slot {
                return Ok(slot.into_option());
            }
            attempts += 1;

            if let Some(lock) = self.locks.try_acquire(&lock_key, family.ttl().lock_ttl).await? {
                let outcome = match self.fetch_slot::<V>(&key).await {
                    Ok(Some(slot)) => Ok((slot.into_option(), false)),
                    Ok(None) => self
                        .load_and_fill(family, &key, id, loader)
                        .await
                        .map(|value| (value, true)),
                    Err(err) => Err(err),
                };
                self.release(lock).await;

                let (value, rebuilt) = outcome?;
                if rebuilt && !self.retry.post_rebuild_delay.is_zero() {
                    tokio::time::sleep(self.retry.post_rebuild_delay).await;
                }
                return Ok(value);
            }

            CacheMetrics::bump(&self.metrics.lock_contentions);
            let now = Instant::now();
            if now >= deadline {
                CacheMetrics::bump(&self.metrics.lock_timeouts);
                let waited = now - started;
                tracing::warn!(
                    key = %key,
                    attempts,
                    waited_ms = waited.as_millis() as u64,
                    "Gave up waiting for rebuild lock"
                );
                return Err(LockError::Timeout {
                    key: key.into_string(),
                    waited,
                    attempts,
                }
                .into());
            }

            tracing::debug!(key = %key, attempts, "Rebuild lock busy; backing off");
            tokio::time::sleep(self.retry.backoff.min(deadline - now)).await;
        }
    }

    /// Stale-while-revalidate over a pre-warmed entry.
    ///
    /// Returns `None` on a structural miss without calling the loader. An
    /// expired entry is returned as-is while at most one rebuild per key runs
    /// on the rebuild pool.
    pub async fn query_with_logical_expire<Id, V, L>(
        &self,
        family: &CacheFamily,
        id: Id,
        loader: Arc<L>,
    ) -> CacheShieldResult<Option<V>>
    where
        Id: fmt::Display + Send + Sync + 'static,
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
        L: Loader<Id, V> + ?Sized + 'static,
    {
        let key = family.data_key(&id);
        let Some(bytes) = self.store.get(key.as_str()).await? else {
            CacheMetrics::bump(&self.metrics.misses);
            tracing::debug!(key = %key, "Logical cache miss; entry was never warmed");
            return Ok(None);
        };

        let envelope: LogicalEnvelope<V> = decode_logical(key.as_str(), &bytes)?;
        if !envelope.is_expired() {
            let counter = if envelope.slot.is_null() {
                &self.metrics.null_hits
            } else {
                &self.metrics.hits
            };
            CacheMetrics::bump(counter);
            return Ok(envelope.into_value());
        }

        CacheMetrics::bump(&self.metrics.stale_reads);
        let lock_key = family.lock_key(&id);
        let Some(lock) = self.locks.try_acquire(&lock_key, family.ttl().lock_ttl).await? else {
            CacheMetrics::bump(&self.metrics.lock_contentions);
            tracing::debug!(key = %key, "Rebuild already running; serving stale entry");
            return Ok(envelope.into_value());
        };

        // Another caller may have rebuilt (or someone deleted the entry)
        // between the first read and the lock.
        let still_stale = match self.store.get(key.as_str()).await {
            Ok(Some(bytes)) => decode_logical::<V>(key.as_str(), &bytes)
                .map(|current| current.is_expired())
                .map_err(CacheShieldError::from),
            Ok(None) => Ok(false),
            Err(err) => Err(err),
        };
        match still_stale {
            Ok(true) => {}
            Ok(false) => {
                self.release(lock).await;
                return Ok(envelope.into_value());
            }
            Err(err) => {
                self.release(lock).await;
                return Err(err);
            }
        }

        self.submit_rebuild(family, key, id, loader, lock).await;
        Ok(envelope.into_value())
    }

    // ========================================================================
    // WRITES AND MAINTENANCE
    // ========================================================================

    /// Cache a value with the family's `value_ttl`.
    pub async fn set<Id, V>(
        &self,
        family: &CacheFamily,
        id: &Id,
        value: &V,
    ) -> CacheShieldResult<()>
    where
        Id: fmt::Display + ?Sized,
        V: Serialize,
    {
        let key = family.data_key(id);
        let bytes = encode_slot(key.as_str(), &CacheSlot::Value(value))?;
        self.store
            .set_with_ttl(key.as_str(), bytes, family.ttl().value_ttl)
            .await
    }

    /// Pre-warm an entry for the logical-expiration strategy.
    ///
    /// The store entry never expires; `ttl` only sets the logical expiry.
    pub async fn set_with_logical_expire<Id, V>(
        &self,
        family: &CacheFamily,
        id: &Id,
        value: &V,
        ttl: std::time::Duration,
    ) -> CacheShieldResult<()>
    where
        Id: fmt::Display + ?Sized,
        V: Serialize,
    {
        let key = family.data_key(id);
        let envelope = LogicalEnvelope::fresh_for(CacheSlot::Value(value), ttl);
        let bytes = encode_logical(key.as_str(), &envelope)?;
        self.store.set(key.as_str(), bytes).await
    }

    /// Load from the source and pre-warm the logical entry in one step.
    ///
    /// A source "not found" is warmed as a null slot.
    pub async fn warm_logical<Id, V, L>(
        &self,
        family: &CacheFamily,
        id: &Id,
        loader: &L,
    ) -> CacheShieldResult<Option<V>>
    where
        Id: fmt::Display + Send + Sync,
        V: Serialize,
        L: Loader<Id, V> + ?Sized,
    {
        let key = family.data_key(id);
        let loaded = self.load(&key, id, loader).await?;
        let envelope =
            LogicalEnvelope::fresh_for(CacheSlot::from(loaded.as_ref()), family.ttl().value_ttl);
        let bytes = encode_logical(key.as_str(), &envelope)?;
        self.store.set(key.as_str(), bytes).await?;
        tracing::debug!(key = %key, found = loaded.is_some(), "Logical entry warmed");
        Ok(loaded)
    }

    /// Drop the cached entry. Returns whether one was present.
    pub async fn invalidate<Id>(&self, family: &CacheFamily, id: &Id) -> CacheShieldResult<bool>
    where
        Id: fmt::Display + ?Sized,
    {
        let key = family.data_key(id);
        let removed = self.store.delete(key.as_str()).await?;
        tracing::debug!(key = %key, removed, "Cache entry invalidated");
        Ok(removed)
    }

    /// Run a source write, then invalidate the cached entry.
    ///
    /// The cache is left untouched when the write fails.
    pub async fn update_and_invalidate<Id, T, E, Fut>(
        &self,
        family: &CacheFamily,
        id: &Id,
        write: Fut,
    ) -> Result<T, E>
    where
        Id: fmt::Display + ?Sized,
        Fut: Future<Output = Result<T, E>>,
        E: From<CacheShieldError>,
    {
        let written = write.await?;
        self.invalidate(family, id).await?;
        Ok(written)
    }

    /// Push an entry's store TTL back out to `value_ttl`.
    ///
    /// Returns `false` when there is no live entry.
    pub async fn touch<Id>(&self, family: &CacheFamily, id: &Id) -> CacheShieldResult<bool>
    where
        Id: fmt::Display + ?Sized,
    {
        let key = family.data_key(id);
        self.store
            .refresh_ttl(key.as_str(), family.ttl().value_ttl)
            .await
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    /// Read and decode a slot, counting the outcome.
    async fn read_slot<V: DeserializeOwned>(
        &self,
        key: &CacheKey,
    ) -> CacheShieldResult<Option<CacheSlot<V>>> {
        let slot = self.fetch_slot::<V>(key).await?;
        let counter = match &slot {
            Some(CacheSlot::Value(_)) => &self.metrics.hits,
            Some(CacheSlot::Null) => &self.metrics.null_hits,
            None => &self.metrics.misses,
        };
        CacheMetrics::bump(counter);
        if slot.is_none() {
            tracing::debug!(key = %key, "Cache miss");
        }
        Ok(slot)
    }

    async fn fetch_slot<V: DeserializeOwned>(
        &self,
        key: &CacheKey,
    ) -> CacheShieldResult<Option<CacheSlot<V>>> {
        match self.store.get(key.as_str()).await? {
            Some(bytes) => Ok(Some(decode_slot(key.as_str(), &bytes)?)),
            None => Ok(None),
        }
    }

    async fn load<Id, V, L>(
        &self,
        key: &CacheKey,
        id: &Id,
        loader: &L,
    ) -> CacheShieldResult<Option<V>>
    where
        Id: Send + Sync,
        L: Loader<Id, V> + ?Sized,
    {
        CacheMetrics::bump(&self.metrics.loads);
        loader.load(id).await.map_err(|err| {
            CacheMetrics::bump(&self.metrics.load_failures);
            tracing::warn!(key = %key, error = %err, "Loader failed; nothing cached");
            CacheShieldError::loader(key.as_str(), err)
        })
    }

    /// Load and write the result with the family's TTLs.
    async fn load_and_fill<Id, V, L>(
        &self,
        family: &CacheFamily,
        key: &CacheKey,
        id: &Id,
        loader: &L,
    ) -> CacheShieldResult<Option<V>>
    where
        Id: Send + Sync,
        V: Serialize,
        L: Loader<Id, V> + ?Sized,
    {
        let loaded = self.load(key, id, loader).await?;
        let slot = CacheSlot::from(loaded.as_ref());
        let ttl = if slot.is_null() {
            family.ttl().null_ttl
        } else {
            family.ttl().value_ttl
        };
        let bytes = encode_slot(key.as_str(), &slot)?;
        self.store.set_with_ttl(key.as_str(), bytes, ttl).await?;
        tracing::debug!(
            key = %key,
            found = loaded.is_some(),
            ttl_ms = ttl.as_millis() as u64,
            "Cache filled from source"
        );
        Ok(loaded)
    }

    async fn release(&self, lock: HeldLock) {
        release_logged(&self.locks, lock).await;
    }

    async fn submit_rebuild<Id, V, L>(
        &self,
        family: &CacheFamily,
        key: CacheKey,
        id: Id,
        loader: Arc<L>,
        lock: HeldLock,
    ) where
        Id: Send + Sync + 'static,
        V: Serialize + Send + Sync + 'static,
        L: Loader<Id, V> + ?Sized + 'static,
    {
        let store = Arc::clone(&self.store);
        let value_ttl = family.ttl().value_ttl;
        let job_key = key.clone();
        let job = async move {
            let loaded = loader
                .load(&id)
                .await
                .map_err(|err| CacheShieldError::loader(job_key.as_str(), err))?;
            let envelope = LogicalEnvelope::fresh_for(CacheSlot::from(loaded), value_ttl);
            let bytes = encode_logical(job_key.as_str(), &envelope)?;
            store.set(job_key.as_str(), bytes).await
        };

        let locks = self.locks.clone();
        let on_complete = async move { release_logged(&locks, lock).await };

        // The lock must outlive the job, or a second rebuild could start.
        let task = RebuildTask::new(key.as_str(), job, on_complete)
            .with_deadline(family.ttl().lock_ttl);
        match self.scheduler.submit(task) {
            Submission::Accepted => {
                CacheMetrics::bump(&self.metrics.rebuilds_submitted);
                tracing::debug!(key = %key, "Logical rebuild submitted");
            }
            Submission::Rejected(task) => {
                CacheMetrics::bump(&self.metrics.rebuilds_rejected);
                task.abandon().await;
            }
        }
    }
}

/// Release a lock, logging instead of failing. An unreleased lock expires
/// with its TTL.
async fn release_logged<S: KvStore>(locks: &LockManager<S>, lock: HeldLock) {
    let lock_key = lock.key().clone();
    if let Err(err) = locks.release(lock).await {
        tracing::warn!(lock_key = %lock_key, error = %err, "Failed to release rebuild lock");
    }
}

impl<S: KvStore + 'static> Clone for CacheClient<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            locks: self.locks.clone(),
            scheduler: Arc::clone(&self.scheduler),
            retry: self.retry.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<S: KvStore + 'static> fmt::Debug for CacheClient<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheClient")
            .field("retry", &self.retry)
            .field("scheduler", &self.scheduler)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
