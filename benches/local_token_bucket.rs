use std::{hint::black_box, sync::Arc, time::Duration};

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};

use tollgate::{LocalBucketStore, TokenBucketLimiter, TokenBucketOptions};

fn bench_allow(c: &mut Criterion) {
    let mut group = c.benchmark_group("local_token_bucket");

    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();

    let limiter = Arc::new(TokenBucketLimiter::new(
        LocalBucketStore::new(),
        TokenBucketOptions::default()
            .with_capacity(u32::MAX as u64)
            .with_rate(Duration::from_nanos(1)),
    ));

    group.bench_function("allow/hot_key", |b| {
        b.iter(|| {
            rt.block_on(async {
                let res = limiter.allow(black_box("user_1"), black_box(1)).await;
                black_box(res)
            })
        });
    });

    let keys: Vec<String> = (0..10_000).map(|i| format!("user_{i}")).collect();
    let mut i = 0usize;

    group.bench_function("allow/uniform_keys", |b| {
        b.iter_batched(
            || {
                i = (i + 1) % keys.len();
                &keys[i]
            },
            |key| {
                rt.block_on(async {
                    let res = limiter.allow(black_box(key), black_box(1)).await;
                    black_box(res)
                })
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_allow);
criterion_main!(benches);
