//! cacheshield Test Utilities
//!
//! Shared test infrastructure for the cacheshield workspace:
//! - A sample entity and ready-made cache families/configs
//! - A scriptable loader that counts calls, stalls, fails or hangs
//! - A store wrapper that injects transport failures
//! - Proptest generators
//! - Assertions over the error taxonomy

pub use cacheshield_core::{
    CacheFamily, CacheShieldConfig, CacheShieldError, CacheShieldResult, Loader, LoaderError,
    StoreError, TtlPolicy,
};
pub use cacheshield_storage::{CacheClient, InMemoryKvStore, KvStore};

use serde::{Deserialize, Serialize};

/// Sample entity cached by the tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shop {
    pub id: u64,
    pub name: String,
    pub area: Option<String>,
    pub score: u32,
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built values for common scenarios.

    use super::*;
    use std::time::Duration;

    /// Shop with the given id and name.
    pub fn sample_shop(id: u64, name: &str) -> Shop {
        Shop {
            id,
            name: name.to_string(),
            area: Some("Downtown".to_string()),
            score: 42,
        }
    }

    /// The shop from the canonical example: id 42, "Cafe".
    pub fn cafe() -> Shop {
        sample_shop(42, "Cafe")
    }

    /// Shop family with the default policy (30 min values, 2 min nulls).
    pub fn shop_family() -> CacheFamily {
        CacheFamily::new("shop", "cache:shop:", "lock:shop:", TtlPolicy::default())
    }

    /// Shop family with second-scale TTLs, for paused-clock tests.
    pub fn fast_family() -> CacheFamily {
        CacheFamily::new(
            "shop",
            "cache:shop:",
            "lock:shop:",
            TtlPolicy::new(
                Duration::from_secs(10),
                Duration::from_secs(2),
                Duration::from_secs(1),
            ),
        )
    }

    /// Short retry timings and a small rebuild pool.
    pub fn fast_config() -> CacheShieldConfig {
        CacheShieldConfig::development()
    }

    /// In-memory client built from [`fast_config`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn memory_client() -> CacheClient<InMemoryKvStore> {
        match CacheClient::new(std::sync::Arc::new(InMemoryKvStore::new()), fast_config()) {
            Ok(client) => client,
            Err(err) => panic!("development config must be valid: {err}"),
        }
    }
}

// ============================================================================
// LOADERS
// ============================================================================

pub mod loaders {
    //! Scriptable stand-in for the backing data source.

    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Mutex, MutexGuard};
    use std::time::Duration;
    use tokio::sync::{watch, Notify};

    fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Map-backed loader that records every call.
    ///
    /// Behaviour can be changed between calls: a fixed delay, a failure
    /// message, a gate that holds calls until opened, or a hang that never
    /// returns.
    pub struct CountingLoader<V> {
        source: Mutex<HashMap<u64, V>>,
        calls: AtomicUsize,
        active: AtomicUsize,
        peak: AtomicUsize,
        entered: Notify,
        delay: Mutex<Option<Duration>>,
        failure: Mutex<Option<String>>,
        hang: AtomicBool,
        gate: watch::Sender<bool>,
    }

    impl<V: Clone> CountingLoader<V> {
        pub fn new() -> Self {
            let (gate, _) = watch::channel(true);
            Self {
                source: Mutex::new(HashMap::new()),
                calls: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                entered: Notify::new(),
                delay: Mutex::new(None),
                failure: Mutex::new(None),
                hang: AtomicBool::new(false),
                gate,
            }
        }

        pub fn with_entry(self, id: u64, value: V) -> Self {
            self.insert(id, value);
            self
        }

        /// Change the source, as a write to the backing store would.
        pub fn insert(&self, id: u64, value: V) {
            locked(&self.source).insert(id, value);
        }

        pub fn remove(&self, id: u64) {
            locked(&self.source).remove(&id);
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// Most calls that were running at the same time.
        ///
        /// Calls dropped mid-flight (a timed-out rebuild) stop counting when
        /// they are dropped.
        pub fn peak_concurrency(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }

        /// Sleep this long inside every call.
        pub fn set_delay(&self, delay: Duration) {
            *locked(&self.delay) = Some(delay);
        }

        /// Fail every call until [`CountingLoader::recover`].
        pub fn fail_with(&self, reason: &str) {
            *locked(&self.failure) = Some(reason.to_string());
        }

        pub fn recover(&self) {
            *locked(&self.failure) = None;
        }

        /// Never return from subsequent calls.
        pub fn hang(&self) {
            self.hang.store(true, Ordering::SeqCst);
        }

        /// Hold calls after they start until [`CountingLoader::open`].
        pub fn close(&self) {
            self.gate.send_replace(false);
        }

        pub fn open(&self) {
            self.gate.send_replace(true);
        }

        /// Wait until at least `n` calls have started.
        pub async fn wait_for_calls(&self, n: usize) {
            loop {
                let notified = self.entered.notified();
                if self.calls() >= n {
                    return;
                }
                notified.await;
            }
        }
    }

    impl<V: Clone> Default for CountingLoader<V> {
        fn default() -> Self {
            Self::new()
        }
    }

    struct ActiveCall<'a>(&'a AtomicUsize);

    impl Drop for ActiveCall<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl<V> Loader<u64, V> for CountingLoader<V>
    where
        V: Clone + Send + Sync,
    {
        async fn load(&self, id: &u64) -> Result<Option<V>, LoaderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
            let _active = ActiveCall(&self.active);
            self.entered.notify_waiters();

            let mut gate = self.gate.subscribe();
            loop {
                let open = *gate.borrow_and_update();
                if open || gate.changed().await.is_err() {
                    break;
                }
            }

            let delay = *locked(&self.delay);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            let failure = locked(&self.failure).clone();
            if let Some(reason) = failure {
                return Err(LoaderError::new(reason));
            }
            Ok(locked(&self.source).get(id).cloned())
        }
    }
}

// ============================================================================
// STORES
// ============================================================================

pub mod stores {
    //! Fault-injecting store wrapper.

    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Forwards to an inner store unless told to fail.
    pub struct FlakyStore<S> {
        inner: Arc<S>,
        fail_reads: AtomicBool,
        fail_writes: AtomicBool,
    }

    impl<S: KvStore> FlakyStore<S> {
        pub fn new(inner: Arc<S>) -> Self {
            Self {
                inner,
                fail_reads: AtomicBool::new(false),
                fail_writes: AtomicBool::new(false),
            }
        }

        pub fn inner(&self) -> &Arc<S> {
            &self.inner
        }

        pub fn set_fail_reads(&self, fail: bool) {
            self.fail_reads.store(fail, Ordering::SeqCst);
        }

        pub fn set_fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        fn check(
            &self,
            flag: &AtomicBool,
            operation: &'static str,
            key: &str,
        ) -> CacheShieldResult<()> {
            if flag.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable {
                    operation,
                    key: key.to_string(),
                    reason: "injected fault".to_string(),
                }
                .into());
            }
            Ok(())
        }
    }

    #[async_trait]
    impl<S: KvStore> KvStore for FlakyStore<S> {
        async fn get(&self, key: &str) -> CacheShieldResult<Option<Vec<u8>>> {
            self.check(&self.fail_reads, "GET", key)?;
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Vec<u8>) -> CacheShieldResult<()> {
            self.check(&self.fail_writes, "SET", key)?;
            self.inner.set(key, value).await
        }

        async fn set_with_ttl(
            &self,
            key: &str,
            value: Vec<u8>,
            ttl: Duration,
        ) -> CacheShieldResult<()> {
            self.check(&self.fail_writes, "SET PX", key)?;
            self.inner.set_with_ttl(key, value, ttl).await
        }

        async fn set_if_absent_with_ttl(
            &self,
            key: &str,
            value: Vec<u8>,
            ttl: Duration,
        ) -> CacheShieldResult<bool> {
            self.check(&self.fail_writes, "SET NX PX", key)?;
            self.inner.set_if_absent_with_ttl(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> CacheShieldResult<bool> {
            self.check(&self.fail_writes, "DEL", key)?;
            self.inner.delete(key).await
        }

        async fn refresh_ttl(&self, key: &str, ttl: Duration) -> CacheShieldResult<bool> {
            self.check(&self.fail_writes, "PEXPIRE", key)?;
            self.inner.refresh_ttl(key, ttl).await
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for cached values and identifiers.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_shop_id() -> impl Strategy<Value = u64> {
        any::<u64>()
    }

    /// Names including the empty string and JSON-significant characters.
    pub fn arb_name() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(String::new()),
            Just("null".to_string()),
            Just("{\"state\":\"null\"}".to_string()),
            "\\PC{0,32}",
        ]
    }

    pub fn arb_shop() -> impl Strategy<Value = Shop> {
        (arb_shop_id(), arb_name(), proptest::option::of("[a-z ]{1,16}"), any::<u32>()).prop_map(
            |(id, name, area, score)| Shop {
                id,
                name,
                area,
                score,
            },
        )
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over the cacheshield error taxonomy.

    use super::*;

    pub fn assert_lock_timeout<T: std::fmt::Debug>(result: &CacheShieldResult<T>) {
        match result {
            Err(err) if err.is_lock_timeout() => {}
            other => panic!("expected lock timeout, got {other:?}"),
        }
    }

    pub fn assert_loader_failure<T: std::fmt::Debug>(result: &CacheShieldResult<T>) {
        match result {
            Err(err) if err.is_loader_failure() => {}
            other => panic!("expected loader failure, got {other:?}"),
        }
    }

    pub fn assert_serialization_failure<T: std::fmt::Debug>(result: &CacheShieldResult<T>) {
        match result {
            Err(err) if err.is_serialization_failure() => {}
            other => panic!("expected serialization failure, got {other:?}"),
        }
    }

    pub fn assert_store_unavailable<T: std::fmt::Debug>(result: &CacheShieldResult<T>) {
        match result {
            Err(err) if err.is_store_unavailable() => {}
            other => panic!("expected store unavailable, got {other:?}"),
        }
    }
}

/// Install a fmt subscriber honouring `RUST_LOG`, once per test binary.
pub fn init_test_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("cacheshield_storage=debug,warn"));
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
