//! Mutex strategy: single rebuild under contention and bounded waiting.

use std::sync::Arc;
use std::time::Duration;

use cacheshield_core::{
    CacheShieldConfig, CacheShieldError, LockError, MutexRetryConfig, RebuildPoolConfig,
};
use cacheshield_storage::{CacheClient, InMemoryKvStore};
use cacheshield_test_utils::assertions::assert_lock_timeout;
use cacheshield_test_utils::fixtures::{cafe, memory_client, sample_shop, shop_family};
use cacheshield_test_utils::loaders::CountingLoader;
use cacheshield_test_utils::{init_test_tracing, Shop};

fn client_with_retry(retry: MutexRetryConfig) -> CacheClient<InMemoryKvStore> {
    let config = CacheShieldConfig {
        mutex_retry: retry,
        rebuild_pool: RebuildPoolConfig::single_worker(),
    };
    CacheClient::new(Arc::new(InMemoryKvStore::new()), config).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_cafe_miss_then_hit() {
    let client = memory_client();
    let family = shop_family();
    let loader = CountingLoader::new().with_entry(42, cafe());

    let first = client.query_with_mutex(&family, &42, &loader).await.unwrap();
    assert_eq!(first, Some(cafe()));
    assert_eq!(loader.calls(), 1);

    let info = client.store().inspect("cache:shop:42").await.unwrap();
    assert_eq!(info.remaining_ttl, Some(Duration::from_secs(30 * 60)));
    assert!(!client.locks().is_locked(&family.lock_key(&42)).await.unwrap());

    let second = client.query_with_mutex(&family, &42, &loader).await.unwrap();
    assert_eq!(second, Some(cafe()));
    assert_eq!(loader.calls(), 1);

    let stats = client.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.lock_contentions, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_load_once() {
    init_test_tracing();
    let client = memory_client();
    let loader = Arc::new(CountingLoader::new().with_entry(42, cafe()));
    loader.set_delay(Duration::from_millis(50));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let client = client.clone();
        let loader = Arc::clone(&loader);
        handles.push(tokio::spawn(async move {
            client.query_with_mutex(&shop_family(), &42, loader.as_ref()).await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), Some(cafe()));
    }
    assert_eq!(loader.calls(), 1);
    assert!(client.stats().lock_contentions > 0);
}

#[tokio::test(start_paused = true)]
async fn test_held_lock_times_out() {
    let client = client_with_retry(MutexRetryConfig {
        backoff: Duration::from_millis(20),
        max_wait: Duration::from_millis(100),
        post_rebuild_delay: Duration::ZERO,
    });
    let family = shop_family();
    let loader = CountingLoader::new().with_entry(42, cafe());

    let held = client
        .locks()
        .try_acquire(&family.lock_key(&42), Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();

    let result = client.query_with_mutex(&family, &42, &loader).await;
    assert_lock_timeout(&result);
    match result {
        Err(CacheShieldError::Lock(LockError::Timeout { key, waited, attempts })) => {
            assert_eq!(key, "cache:shop:42");
            assert!(waited >= Duration::from_millis(100));
            assert!(attempts >= 2);
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(loader.calls(), 0);
    assert_eq!(client.stats().lock_timeouts, 1);

    client.locks().release(held).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_waiter_picks_up_value_written_by_holder() {
    let client = memory_client();
    let family = shop_family();
    let loader = Arc::new(CountingLoader::<Shop>::new());

    let held = client
        .locks()
        .try_acquire(&family.lock_key(&42), Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();

    let waiter = {
        let client = client.clone();
        let loader = Arc::clone(&loader);
        tokio::spawn(async move {
            client
                .query_with_mutex(&shop_family(), &42, loader.as_ref())
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    client.set(&family, &42, &cafe()).await.unwrap();
    client.locks().release(held).await.unwrap();

    assert_eq!(waiter.await.unwrap().unwrap(), Some(cafe()));
    assert_eq!(loader.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_post_rebuild_delay_only_after_a_load() {
    let client = client_with_retry(MutexRetryConfig {
        backoff: Duration::from_millis(10),
        max_wait: Duration::from_secs(1),
        post_rebuild_delay: Duration::from_millis(200),
    });
    let loader = CountingLoader::new().with_entry(8, sample_shop(8, "Deli"));

    let started = tokio::time::Instant::now();
    client.query_with_mutex(&shop_family(), &8, &loader).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(200));

    let started = tokio::time::Instant::now();
    client.query_with_mutex(&shop_family(), &8, &loader).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(200));
}

#[tokio::test]
async fn test_not_found_is_cached_and_lock_released() {
    let client = memory_client();
    let family = shop_family();
    let loader = CountingLoader::<Shop>::new();

    assert_eq!(client.query_with_mutex(&family, &404, &loader).await.unwrap(), None);
    assert!(!client.locks().is_locked(&family.lock_key(&404)).await.unwrap());
    assert_eq!(client.query_with_mutex(&family, &404, &loader).await.unwrap(), None);
    assert_eq!(loader.calls(), 1);
}
