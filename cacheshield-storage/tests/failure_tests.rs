//! Error propagation: corrupt entries, store outages and loader failures.

use std::sync::Arc;

use cacheshield_core::CacheShieldConfig;
use cacheshield_storage::{CacheClient, InMemoryKvStore, KvStore};
use cacheshield_test_utils::assertions::{
    assert_loader_failure, assert_serialization_failure, assert_store_unavailable,
};
use cacheshield_test_utils::fixtures::{cafe, fast_config, memory_client, shop_family};
use cacheshield_test_utils::loaders::CountingLoader;
use cacheshield_test_utils::stores::FlakyStore;
use cacheshield_test_utils::Shop;

fn flaky_client() -> (CacheClient<FlakyStore<InMemoryKvStore>>, Arc<FlakyStore<InMemoryKvStore>>) {
    let store = Arc::new(FlakyStore::new(Arc::new(InMemoryKvStore::new())));
    let client = CacheClient::new(Arc::clone(&store), fast_config()).unwrap();
    (client, store)
}

#[tokio::test]
async fn test_corrupt_entry_is_an_error_not_a_miss() {
    let client = memory_client();
    let loader = Arc::new(CountingLoader::new().with_entry(42, cafe()));
    client.store().set("cache:shop:42", b"{not json".to_vec()).await.unwrap();

    let pass = client.query_with_pass_through(&shop_family(), &42, loader.as_ref()).await;
    assert_serialization_failure(&pass);
    let mutex = client.query_with_mutex(&shop_family(), &42, loader.as_ref()).await;
    assert_serialization_failure(&mutex);
    let logical = client
        .query_with_logical_expire(&shop_family(), 42u64, Arc::clone(&loader))
        .await;
    assert_serialization_failure(&logical);

    assert_eq!(loader.calls(), 0);
    assert_eq!(client.store().get("cache:shop:42").await.unwrap(), Some(b"{not json".to_vec()));
}

#[tokio::test]
async fn test_bare_empty_string_is_not_a_null_marker() {
    let client = memory_client();
    let loader = CountingLoader::<Shop>::new();
    client.store().set("cache:shop:1", b"\"\"".to_vec()).await.unwrap();

    let result = client.query_with_pass_through(&shop_family(), &1, &loader).await;
    assert_serialization_failure(&result);
}

#[tokio::test]
async fn test_plain_slot_is_rejected_by_logical_reads() {
    let client = memory_client();
    client.set(&shop_family(), &5, &cafe()).await.unwrap();
    let loader = Arc::new(CountingLoader::<Shop>::new());

    let result = client.query_with_logical_expire(&shop_family(), 5u64, loader).await;
    assert_serialization_failure(&result);
}

#[tokio::test]
async fn test_store_read_outage_propagates_from_every_strategy() {
    let (client, store) = flaky_client();
    let loader = Arc::new(CountingLoader::new().with_entry(42, cafe()));
    store.set_fail_reads(true);

    assert_store_unavailable(
        &client
            .query_with_pass_through(&shop_family(), &42, loader.as_ref())
            .await,
    );
    assert_store_unavailable(&client.query_with_mutex(&shop_family(), &42, loader.as_ref()).await);
    assert_store_unavailable(
        &client
            .query_with_logical_expire(&shop_family(), 42u64, Arc::clone(&loader))
            .await,
    );
    assert_eq!(loader.calls(), 0);
}

#[tokio::test]
async fn test_store_write_outage_after_load_propagates() {
    let (client, store) = flaky_client();
    let loader = CountingLoader::new().with_entry(42, cafe());
    store.set_fail_writes(true);

    let result = client.query_with_pass_through(&shop_family(), &42, &loader).await;
    assert_store_unavailable(&result);
    assert_eq!(loader.calls(), 1);

    // Mutex cannot even take the lock.
    let result = client.query_with_mutex(&shop_family(), &42, &loader).await;
    assert_store_unavailable(&result);
    assert_eq!(loader.calls(), 1);

    store.set_fail_writes(false);
    let shop = client.query_with_pass_through(&shop_family(), &42, &loader).await.unwrap();
    assert_eq!(shop, Some(cafe()));
}

#[tokio::test]
async fn test_loader_failure_propagates_and_is_retried_next_call() {
    let client = memory_client();
    let loader = CountingLoader::new().with_entry(42, cafe());
    loader.fail_with("connection refused");

    let result = client.query_with_mutex(&shop_family(), &42, &loader).await;
    assert_loader_failure(&result);
    if let Err(err) = &result {
        assert!(err.to_string().contains("cache:shop:42"));
    }
    assert!(client.store().get("cache:shop:42").await.unwrap().is_none());

    loader.recover();
    let shop = client.query_with_mutex(&shop_family(), &42, &loader).await.unwrap();
    assert_eq!(shop, Some(cafe()));
    assert_eq!(loader.calls(), 2);
    assert_eq!(client.stats().load_failures, 1);
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let mut config = CacheShieldConfig::default();
    config.rebuild_pool.workers = 0;
    let result = CacheClient::new(Arc::new(InMemoryKvStore::new()), config);
    assert!(matches!(result, Err(cacheshield_core::CacheShieldError::Config(_))));
}
