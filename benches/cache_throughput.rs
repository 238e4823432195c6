//! Benchmark for fingerprinting and read-through lookups
//!
//! Target: fast tier hits well under 10µs

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;
use ticket_cache::cache::{fingerprint, MemoryBackend, PersistentBackend, TieredCacheStore};
use ticket_cache::TicketQuery;

fn bench_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint");
    group.throughput(Throughput::Elements(1));

    let query = TicketQuery {
        platform: Some("stubhub".to_string()),
        is_available: Some(true),
        min_price: Some(25.0),
        max_price: Some(400.0),
        event_date_from: Some("2026-11-01".to_string()),
        limit: Some(50),
        ..Default::default()
    };

    group.bench_function("ticket_query", |b| {
        b.iter(|| fingerprint(black_box(&query)));
    });

    group.finish();
}

fn store() -> Arc<TieredCacheStore> {
    Arc::new(TieredCacheStore::new(
        Arc::new(MemoryBackend::new()),
        Arc::new(PersistentBackend::new()),
    ))
}

fn bench_read_through(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_through");
    group.throughput(Throughput::Elements(1));

    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = store();
    let ttl = Duration::from_secs(600);
    rt.block_on(async {
        for i in 0..1000u64 {
            let _: u64 = store
                .get_or_compute(&format!("tickets:{i}"), ttl, || async move { Ok(i) })
                .await
                .unwrap();
        }
    });

    group.bench_function("fast_tier_hit", |b| {
        let mut counter = 0u64;
        b.to_async(&rt).iter(|| {
            counter += 1;
            let key = format!("tickets:{}", counter % 1000);
            let store = store.clone();
            async move {
                let value: u64 = store
                    .get_or_compute(black_box(&key), ttl, || async { Ok(0) })
                    .await
                    .unwrap();
                black_box(value)
            }
        });
    });

    group.bench_function("miss_and_fill", |b| {
        let mut counter = 0u64;
        b.to_async(&rt).iter(|| {
            counter += 1;
            let key = format!("fresh:{counter}");
            let store = store.clone();
            async move {
                let value: u64 = store
                    .get_or_compute(&key, ttl, || async move { Ok(counter) })
                    .await
                    .unwrap();
                black_box(value)
            }
        });
    });

    group.finish();
}

fn bench_concurrent_hits(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_through");
    group.throughput(Throughput::Elements(100));

    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = store();
    let ttl = Duration::from_secs(600);
    rt.block_on(async {
        let _: String = store
            .get_or_compute("tickets:high_demand", ttl, || async { Ok("hot".to_string()) })
            .await
            .unwrap();
    });

    group.bench_function("concurrent_100_hits", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut handles = Vec::new();
                for _ in 0..100 {
                    let store = store.clone();
                    handles.push(tokio::spawn(async move {
                        let _: String = store
                            .get_or_compute("tickets:high_demand", ttl, || async { Ok(String::new()) })
                            .await
                            .unwrap();
                    }));
                }
                for handle in handles {
                    let _ = handle.await;
                }
            });
        });
    });

    group.finish();
}

criterion_group!(benches, bench_fingerprint, bench_read_through, bench_concurrent_hits);
criterion_main!(benches);
