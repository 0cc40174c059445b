use std::{sync::Arc, time::Duration};

use super::runtime::{async_sleep, block_on};
use crate::{
    BucketDecision, BucketState, BucketStore, KeyPrefix, LocalBucketStore, TokenBucketLimiter,
    TokenBucketOptions,
};

const T0: u64 = 1_700_000_000_000_000_000;

fn scenario_options() -> TokenBucketOptions {
    TokenBucketOptions::default()
        .with_capacity(10)
        .with_init_tokens(10)
        .with_rate(Duration::from_millis(100))
}

fn limiter(options: TokenBucketOptions) -> TokenBucketLimiter<Arc<LocalBucketStore>> {
    TokenBucketLimiter::new(Arc::new(LocalBucketStore::new()), options)
}

#[test]
fn first_check_initializes_bucket_lazily() {
    block_on(async {
        let limiter = limiter(scenario_options());
        assert_eq!(limiter.state("lim:test").await.unwrap(), None);

        let decision = limiter.acquire_at("lim:test", 3, T0).await.unwrap();
        assert_eq!(decision, BucketDecision::Allowed { remaining: 7 });

        assert_eq!(
            limiter.state("lim:test").await.unwrap(),
            Some(BucketState {
                tokens: 7,
                timestamp: T0
            })
        );
    });
}

#[test]
fn immediate_burst_exhausts_bucket() {
    block_on(async {
        let limiter = limiter(scenario_options());
        limiter.acquire_at("lim:test", 3, T0).await.unwrap();

        let mut decisions = Vec::new();
        for _ in 0..8 {
            decisions.push(limiter.acquire_at("lim:test", 1, T0).await.unwrap());
        }

        assert!(decisions[..7].iter().all(|d| d.is_allowed()));
        assert_eq!(
            decisions[7],
            BucketDecision::Rejected {
                remaining: 0,
                retry_after: Some(Duration::from_millis(100)),
            }
        );
    });
}

#[test]
fn tokens_refill_over_time() {
    block_on(async {
        let limiter = limiter(scenario_options().with_init_tokens(0));
        let rate = 100_000_000;

        assert!(!limiter.acquire_at("k", 1, T0).await.unwrap().is_allowed());
        assert!(
            !limiter
                .acquire_at("k", 1, T0 + rate - 1)
                .await
                .unwrap()
                .is_allowed()
        );
        assert!(
            limiter
                .acquire_at("k", 1, T0 + rate)
                .await
                .unwrap()
                .is_allowed()
        );

        // long idle periods never bank more than the capacity
        let decision = limiter.acquire_at("k", 1, T0 + 500 * rate).await.unwrap();
        assert_eq!(decision, BucketDecision::Allowed { remaining: 9 });
    });
}

#[test]
fn per_key_state_is_independent() {
    block_on(async {
        let limiter = limiter(scenario_options());

        assert!(limiter.acquire_at("a", 10, T0).await.unwrap().is_allowed());
        assert!(!limiter.acquire_at("a", 1, T0).await.unwrap().is_allowed());

        assert!(limiter.acquire_at("b", 1, T0).await.unwrap().is_allowed());
    });
}

#[test]
fn allow_uses_wall_clock() {
    block_on(async {
        let limiter = limiter(
            TokenBucketOptions::default()
                .with_capacity(2)
                .with_rate(Duration::from_secs(3600)),
        );

        assert!(limiter.allow("k", 1).await.unwrap());
        assert!(limiter.allow("k", 1).await.unwrap());
        assert!(!limiter.allow("k", 1).await.unwrap());
    });
}

#[test]
fn expired_bucket_starts_over() {
    block_on(async {
        let limiter = limiter(
            scenario_options()
                .with_rate(Duration::from_secs(3600))
                .with_expire_duration(Duration::from_millis(30)),
        );

        assert!(limiter.allow("k", 10).await.unwrap());
        assert!(!limiter.allow("k", 1).await.unwrap());

        async_sleep(Duration::from_millis(80)).await;

        assert_eq!(limiter.state("k").await.unwrap(), None);
        assert_eq!(
            limiter.acquire("k", 1).await.unwrap(),
            BucketDecision::Allowed { remaining: 9 }
        );
    });
}

#[test]
fn reset_removes_bucket() {
    block_on(async {
        let limiter = limiter(scenario_options());

        limiter.acquire_at("k", 10, T0).await.unwrap();
        assert!(limiter.reset("k").await.unwrap());
        assert!(!limiter.reset("k").await.unwrap());

        assert_eq!(
            limiter.acquire_at("k", 1, T0).await.unwrap(),
            BucketDecision::Allowed { remaining: 9 }
        );
    });
}

#[test]
fn prefix_is_applied_to_stored_keys() {
    block_on(async {
        let limiter = limiter(scenario_options().with_prefix(KeyPrefix::try_from("app").unwrap()));

        limiter.acquire_at("lim:test", 1, T0).await.unwrap();

        assert!(limiter.store().buckets().contains_key("app:lim:test"));
        assert!(!limiter.store().buckets().contains_key("lim:test"));
        assert_eq!(limiter.state("lim:test").await.unwrap().unwrap().tokens, 9);
    });
}

#[test]
fn concurrent_callers_never_over_admit() {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .build()
        .unwrap();

    rt.block_on(async {
        let limiter = Arc::new(limiter(
            TokenBucketOptions::default()
                .with_capacity(90)
                .with_init_tokens(90)
                .with_rate(Duration::from_millis(20)),
        ));

        let mut handles = Vec::with_capacity(100);
        for _ in 0..100 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter
                    .acquire_at("test:ratelimit:concurrent", 1, T0)
                    .await
                    .unwrap()
                    .is_allowed()
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }

        assert_eq!(allowed, 90);
        assert_eq!(
            limiter
                .state("test:ratelimit:concurrent")
                .await
                .unwrap()
                .unwrap()
                .tokens,
            0
        );
    });
}

#[test]
fn cleanup_drops_only_expired_buckets() {
    block_on(async {
        let store = LocalBucketStore::new();
        let short = crate::TransitionArgs {
            rate_ns: 1_000_000,
            capacity: 10,
            init_tokens: 10,
            now_ns: T0,
            token_request: 1,
            expire_ms: 20,
        };
        let long = crate::TransitionArgs {
            expire_ms: 60_000,
            ..short
        };

        store.run_transition("short", &short).await.unwrap();
        store.run_transition("long", &long).await.unwrap();
        assert_eq!(store.len(), 2);

        async_sleep(Duration::from_millis(50)).await;

        assert_eq!(store.cleanup(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.buckets().contains_key("long"));
    });
}

#[test]
fn cleanup_loop_reaps_expired_buckets() {
    let store = Arc::new(LocalBucketStore::new());
    let limiter = TokenBucketLimiter::new(
        Arc::clone(&store),
        scenario_options().with_expire_duration(Duration::from_millis(50)),
    );

    block_on(async {
        limiter.allow("key1", 1).await.unwrap();
        limiter.allow("key2", 1).await.unwrap();
    });
    assert_eq!(store.len(), 2);

    store.run_cleanup_loop(Duration::from_millis(20));
    std::thread::sleep(Duration::from_millis(200));

    assert!(store.is_empty());
    store.stop_cleanup_loop();
}

#[test]
fn stopped_cleanup_loop_leaves_buckets() {
    let store = Arc::new(LocalBucketStore::new());
    let limiter = TokenBucketLimiter::new(
        Arc::clone(&store),
        scenario_options().with_expire_duration(Duration::from_millis(50)),
    );

    store.run_cleanup_loop(Duration::from_millis(100));
    store.stop_cleanup_loop();

    block_on(async {
        limiter.allow("key1", 1).await.unwrap();
    });

    std::thread::sleep(Duration::from_millis(300));

    // expired but never reaped
    assert_eq!(store.len(), 1);
    assert_eq!(store.buckets().get("key1").map(|b| b.state.tokens), Some(9));
}

#[test]
fn stop_then_restart_cleanup_loop_reaps_again() {
    let store = Arc::new(LocalBucketStore::new());
    let limiter = TokenBucketLimiter::new(
        Arc::clone(&store),
        scenario_options().with_expire_duration(Duration::from_millis(50)),
    );

    block_on(async {
        limiter.allow("key1", 1).await.unwrap();
    });

    store.run_cleanup_loop(Duration::from_millis(100));
    std::thread::sleep(Duration::from_millis(20));
    store.stop_cleanup_loop();
    std::thread::sleep(Duration::from_millis(220));
    assert_eq!(store.len(), 1);

    store.run_cleanup_loop(Duration::from_millis(40));
    std::thread::sleep(Duration::from_millis(150));
    assert!(store.is_empty());

    store.stop_cleanup_loop();
}

#[test]
fn quick_restarts_leave_a_single_cleanup_thread() {
    let store = Arc::new(LocalBucketStore::new());

    for _ in 0..5 {
        store.run_cleanup_loop(Duration::from_millis(300));
        store.stop_cleanup_loop();
    }
    store.run_cleanup_loop(Duration::from_millis(300));

    // every stopped thread wakes up once and exits
    std::thread::sleep(Duration::from_millis(450));
    assert_eq!(store.cleanup_threads(), 1);

    store.stop_cleanup_loop();
    std::thread::sleep(Duration::from_millis(350));
    assert_eq!(store.cleanup_threads(), 0);
}

#[test]
fn second_run_while_running_is_a_noop() {
    let store = Arc::new(LocalBucketStore::new());

    store.run_cleanup_loop(Duration::from_millis(20));
    store.run_cleanup_loop(Duration::from_millis(20));
    assert_eq!(store.cleanup_threads(), 1);

    store.stop_cleanup_loop();
}
