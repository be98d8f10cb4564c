//! Cache-hit read path benchmarks.

use std::sync::Arc;
use std::time::Duration;

use cacheshield_core::{loader_fn, CacheFamily, CacheShieldConfig, LoaderError, TtlPolicy};
use cacheshield_storage::{CacheClient, InMemoryKvStore};
use criterion::{criterion_group, criterion_main, Criterion};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Shop {
    id: u64,
    name: String,
    area: String,
    score: u32,
}

fn shop(id: u64) -> Shop {
    Shop {
        id,
        name: format!("Shop {id}"),
        area: "Downtown".to_string(),
        score: 42,
    }
}

fn bench_hits(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let family = CacheFamily::new("shop", "cache:shop:", "lock:shop:", TtlPolicy::default());
    let client = rt.block_on(async {
        let client =
            CacheClient::new(Arc::new(InMemoryKvStore::new()), CacheShieldConfig::default())
                .unwrap();
        client.set(&family, &1, &shop(1)).await.unwrap();
        client
            .set_with_logical_expire(&family, &2, &shop(2), Duration::from_secs(3600))
            .await
            .unwrap();
        client
    });
    let loader = Arc::new(loader_fn(|id: u64| async move { Ok::<_, LoaderError>(Some(shop(id))) }));

    let mut group = c.benchmark_group("cache_hit");
    group.bench_function("pass_through", |b| {
        b.iter(|| {
            rt.block_on(
                client.query_with_pass_through::<_, Shop, _>(&family, &1u64, loader.as_ref()),
            )
            .unwrap()
        })
    });
    group.bench_function("mutex", |b| {
        b.iter(|| {
            rt.block_on(client.query_with_mutex::<_, Shop, _>(&family, &1u64, loader.as_ref()))
                .unwrap()
        })
    });
    group.bench_function("logical_expire", |b| {
        b.iter(|| {
            rt.block_on(
                client.query_with_logical_expire::<_, Shop, _>(&family, 2u64, Arc::clone(&loader)),
            )
            .unwrap()
        })
    });
    group.finish();
}

criterion_group!(benches, bench_hits);
criterion_main!(benches);
