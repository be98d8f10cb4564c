//! Logical-expiration strategy: stale serving and background rebuilds.

use std::sync::Arc;
use std::time::Duration;

use cacheshield_core::{
    decode_logical, CacheShieldConfig, MutexRetryConfig, RebuildPoolConfig,
};
use cacheshield_storage::{CacheClient, InMemoryKvStore, KvStore, RebuildFailureReason};
use cacheshield_test_utils::fixtures::{memory_client, sample_shop, shop_family};
use cacheshield_test_utils::loaders::CountingLoader;
use cacheshield_test_utils::Shop;
use futures_util::future::join_all;

fn client_with_pool(pool: RebuildPoolConfig) -> CacheClient<InMemoryKvStore> {
    let config = CacheShieldConfig {
        mutex_retry: MutexRetryConfig::default(),
        rebuild_pool: pool,
    };
    CacheClient::new(Arc::new(InMemoryKvStore::new()), config).unwrap()
}

/// Warm an entry that is already logically expired.
async fn warm_expired(client: &CacheClient<InMemoryKvStore>, id: u64, shop: &Shop) {
    client
        .set_with_logical_expire(&shop_family(), &id, shop, Duration::ZERO)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_structural_miss_returns_none_without_loading() {
    let client = memory_client();
    let loader = Arc::new(CountingLoader::new().with_entry(1, sample_shop(1, "Cafe")));

    let shop = client
        .query_with_logical_expire(&shop_family(), 1u64, Arc::clone(&loader))
        .await
        .unwrap();
    assert_eq!(shop, None);
    assert_eq!(loader.calls(), 0);
    assert_eq!(client.stats().misses, 1);
}

#[tokio::test]
async fn test_warmed_entry_never_expires_in_store() {
    let client = memory_client();
    let loader = CountingLoader::new().with_entry(2, sample_shop(2, "Cafe"));

    let warmed = client.warm_logical(&shop_family(), &2, &loader).await.unwrap();
    assert_eq!(warmed, Some(sample_shop(2, "Cafe")));
    assert_eq!(client.store().inspect("cache:shop:2").await.unwrap().remaining_ttl, None);

    let loader = Arc::new(loader);
    let shop = client
        .query_with_logical_expire(&shop_family(), 2u64, Arc::clone(&loader))
        .await
        .unwrap();
    assert_eq!(shop, warmed);
    assert_eq!(loader.calls(), 1);
    assert_eq!(client.scheduler().stats().submitted, 0);
}

#[tokio::test]
async fn test_expired_entry_is_served_stale_with_one_rebuild() {
    let client = memory_client();
    let old = sample_shop(42, "Old Cafe");
    let new = sample_shop(42, "New Cafe");
    let loader = Arc::new(CountingLoader::new().with_entry(42, new.clone()));
    loader.close();
    warm_expired(&client, 42, &old).await;

    let family = shop_family();
    let reads = (0..10).map(|_| {
        client.query_with_logical_expire(&family, 42u64, Arc::clone(&loader))
    });
    for shop in join_all(reads).await {
        assert_eq!(shop.unwrap(), Some(old.clone()));
    }

    assert_eq!(client.stats().rebuilds_submitted, 1);
    assert_eq!(client.stats().stale_reads, 10);
    assert_eq!(client.stats().lock_contentions, 9);
    assert_eq!(client.scheduler().stats().submitted, 1);

    loader.wait_for_calls(1).await;
    loader.open();
    client.scheduler().wait_idle().await;

    assert_eq!(loader.calls(), 1);
    assert!(!client.locks().is_locked(&shop_family().lock_key(&42)).await.unwrap());
    let fresh = client
        .query_with_logical_expire(&shop_family(), 42u64, Arc::clone(&loader))
        .await
        .unwrap();
    assert_eq!(fresh, Some(new));
    assert_eq!(client.scheduler().stats().submitted, 1);
}

#[tokio::test]
async fn test_failed_rebuild_releases_lock_and_keeps_stale_value() {
    let client = memory_client();
    let mut failures = client.scheduler().take_failures().unwrap();
    let old = sample_shop(7, "Old");
    let loader = Arc::new(CountingLoader::new().with_entry(7, sample_shop(7, "New")));
    loader.fail_with("db down");
    warm_expired(&client, 7, &old).await;

    let shop = client
        .query_with_logical_expire(&shop_family(), 7u64, Arc::clone(&loader))
        .await
        .unwrap();
    assert_eq!(shop, Some(old.clone()));

    let failure = failures.recv().await.unwrap();
    assert_eq!(failure.key, "cache:shop:7");
    assert!(matches!(failure.reason, RebuildFailureReason::Failed(ref e) if e.is_loader_failure()));
    client.scheduler().wait_idle().await;

    // The lock is free again and the entry is untouched.
    let lock_key = shop_family().lock_key(&7);
    let relock = client.locks().try_acquire(&lock_key, Duration::from_secs(1)).await.unwrap();
    assert!(relock.is_some());
    if let Some(lock) = relock {
        client.locks().release(lock).await.unwrap();
    }
    let bytes = client.store().get("cache:shop:7").await.unwrap().unwrap();
    let envelope = decode_logical::<Shop>("cache:shop:7", &bytes).unwrap();
    assert_eq!(envelope.into_value(), Some(old.clone()));

    // The next read retries the rebuild.
    loader.recover();
    let shop = client
        .query_with_logical_expire(&shop_family(), 7u64, Arc::clone(&loader))
        .await
        .unwrap();
    assert_eq!(shop, Some(old));
    client.scheduler().wait_idle().await;
    let shop = client
        .query_with_logical_expire(&shop_family(), 7u64, Arc::clone(&loader))
        .await
        .unwrap();
    assert_eq!(shop.map(|s| s.name), Some("New".to_string()));
    assert_eq!(loader.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_hung_loader_is_cut_off_by_deadline() {
    let client = client_with_pool(RebuildPoolConfig {
        task_deadline: Duration::from_millis(100),
        ..RebuildPoolConfig::single_worker()
    });
    let mut failures = client.scheduler().take_failures().unwrap();
    let loader = Arc::new(CountingLoader::new().with_entry(9, sample_shop(9, "New")));
    loader.hang();
    warm_expired(&client, 9, &sample_shop(9, "Old")).await;

    client.query_with_logical_expire(&shop_family(), 9u64, Arc::clone(&loader)).await.unwrap();

    let failure = failures.recv().await.unwrap();
    assert!(matches!(failure.reason, RebuildFailureReason::TimedOut(_)));
    client.scheduler().wait_idle().await;
    assert!(!client.locks().is_locked(&shop_family().lock_key(&9)).await.unwrap());
    assert_eq!(client.scheduler().stats().timed_out, 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_rebuild_is_cut_off_before_its_lock_expires() {
    let client = CacheClient::new(Arc::new(InMemoryKvStore::new()), CacheShieldConfig::default())
        .unwrap();
    let mut failures = client.scheduler().take_failures().unwrap();
    let lock_ttl = shop_family().ttl().lock_ttl;
    assert!(lock_ttl < client.scheduler().config().task_deadline);

    let loader = Arc::new(CountingLoader::new().with_entry(11, sample_shop(11, "New")));
    loader.set_delay(lock_ttl + Duration::from_secs(5));
    warm_expired(&client, 11, &sample_shop(11, "Old")).await;

    client
        .query_with_logical_expire(&shop_family(), 11u64, Arc::clone(&loader))
        .await
        .unwrap();
    loader.wait_for_calls(1).await;

    let failure = failures.recv().await.unwrap();
    assert!(matches!(failure.reason, RebuildFailureReason::TimedOut(d) if d == lock_ttl));

    // Past the lock TTL the next stale read may start a rebuild, but the
    // first one is gone.
    tokio::time::sleep(Duration::from_secs(1)).await;
    let shop = client
        .query_with_logical_expire(&shop_family(), 11u64, Arc::clone(&loader))
        .await
        .unwrap();
    assert_eq!(shop.map(|s| s.name), Some("Old".to_string()));
    loader.wait_for_calls(2).await;
    client.scheduler().wait_idle().await;

    assert_eq!(loader.calls(), 2);
    assert_eq!(loader.peak_concurrency(), 1);
    assert_eq!(client.scheduler().stats().timed_out, 2);
}

#[tokio::test]
async fn test_saturated_pool_rejects_and_releases_lock() {
    let client = client_with_pool(RebuildPoolConfig::single_worker());
    let loader = Arc::new(CountingLoader::new());
    for id in 1..=3 {
        loader.insert(id, sample_shop(id, "New"));
        warm_expired(&client, id, &sample_shop(id, "Old")).await;
    }
    loader.close();

    // One rebuild running, one queued, the third has nowhere to go.
    client.query_with_logical_expire(&shop_family(), 1u64, Arc::clone(&loader)).await.unwrap();
    loader.wait_for_calls(1).await;
    client.query_with_logical_expire(&shop_family(), 2u64, Arc::clone(&loader)).await.unwrap();
    let third = client
        .query_with_logical_expire(&shop_family(), 3u64, Arc::clone(&loader))
        .await
        .unwrap();

    assert_eq!(third.map(|s| s.name), Some("Old".to_string()));
    assert_eq!(client.stats().rebuilds_submitted, 2);
    assert_eq!(client.stats().rebuilds_rejected, 1);
    assert!(!client.locks().is_locked(&shop_family().lock_key(&3)).await.unwrap());
    assert!(client.locks().is_locked(&shop_family().lock_key(&1)).await.unwrap());

    loader.open();
    client.scheduler().wait_idle().await;
    assert_eq!(client.scheduler().stats().succeeded, 2);
}

#[tokio::test]
async fn test_rebuild_of_deleted_source_row_caches_null() {
    let client = memory_client();
    let loader = Arc::new(CountingLoader::<Shop>::new());
    warm_expired(&client, 11, &sample_shop(11, "Closed Down")).await;

    let stale = client
        .query_with_logical_expire(&shop_family(), 11u64, Arc::clone(&loader))
        .await
        .unwrap();
    assert_eq!(stale.map(|s| s.name), Some("Closed Down".to_string()));
    client.scheduler().wait_idle().await;

    let now = client
        .query_with_logical_expire(&shop_family(), 11u64, Arc::clone(&loader))
        .await
        .unwrap();
    assert_eq!(now, None);
    assert_eq!(loader.calls(), 1);
    assert_eq!(client.stats().null_hits, 1);
    assert_eq!(client.store().inspect("cache:shop:11").await.unwrap().remaining_ttl, None);
}

#[tokio::test]
async fn test_shutdown_rejects_later_rebuilds_without_stranding_locks() {
    let client = memory_client();
    let loader = Arc::new(CountingLoader::new().with_entry(12, sample_shop(12, "New")));
    warm_expired(&client, 12, &sample_shop(12, "Old")).await;

    client.shutdown().await;
    let shop = client
        .query_with_logical_expire(&shop_family(), 12u64, Arc::clone(&loader))
        .await
        .unwrap();
    assert_eq!(shop.map(|s| s.name), Some("Old".to_string()));
    assert_eq!(client.stats().rebuilds_rejected, 1);
    assert!(!client.locks().is_locked(&shop_family().lock_key(&12)).await.unwrap());
    assert_eq!(loader.calls(), 0);
}
