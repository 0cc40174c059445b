use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use clap::{Parser, ValueEnum};
use hdrhistogram::Histogram;
use tracing_subscriber::EnvFilter;

use tollgate::{BucketStore, LocalBucketStore, TokenBucketLimiter, TokenBucketOptions};

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
enum Store {
    Local,
    Redis,
}

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
enum KeyDist {
    Hot,
    Uniform,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tollgate-stress",
    about = "Load test harness for tollgate token buckets"
)]
struct Args {
    #[arg(long, value_enum, default_value_t = Store::Local)]
    store: Store,

    #[arg(long, value_enum, default_value_t = KeyDist::Hot)]
    key_dist: KeyDist,

    #[arg(long, default_value_t = 8)]
    tasks: usize,

    #[arg(long, default_value_t = 10)]
    duration_s: u64,

    #[arg(long, default_value_t = 1000)]
    capacity: u64,

    /// Microseconds needed to generate one token.
    #[arg(long, default_value_t = 1000)]
    rate_us: u64,

    #[arg(long, default_value_t = 1000)]
    key_space: usize,

    #[arg(long, default_value_t = 100)]
    sample_every: u64,

    /// Connection managers opened when `--store redis`.
    #[arg(long, default_value_t = 4)]
    connections: usize,

    #[arg(long, default_value = "redis://127.0.0.1:6379/")]
    redis_url: String,

    #[arg(long, default_value = "stress")]
    redis_prefix: String,
}

#[derive(Default)]
struct Counts {
    allowed: AtomicU64,
    rejected: AtomicU64,
    errors: AtomicU64,
}

fn build_keys(args: &Args) -> Arc<Vec<String>> {
    let n = match args.key_dist {
        KeyDist::Hot => 1,
        KeyDist::Uniform => args.key_space.max(1),
    };
    Arc::new((0..n).map(|i| format!("user_{i}")).collect())
}

fn build_options(args: &Args) -> TokenBucketOptions {
    TokenBucketOptions::default()
        .with_capacity(args.capacity)
        .with_rate(Duration::from_micros(args.rate_us))
}

fn should_sample(iter: u64, sample_every: u64) -> bool {
    sample_every <= 1 || iter % sample_every == 0
}

async fn run<S>(args: Args, limiter: Arc<TokenBucketLimiter<S>>)
where
    S: BucketStore + 'static,
{
    let keys = build_keys(&args);
    let counts = Arc::new(Counts::default());

    let started = Instant::now();
    let deadline = started + Duration::from_secs(args.duration_s);

    let mut join = Vec::with_capacity(args.tasks);
    for t in 0..args.tasks {
        let limiter = Arc::clone(&limiter);
        let counts = Arc::clone(&counts);
        let keys = Arc::clone(&keys);
        let sample_every = args.sample_every;

        join.push(tokio::spawn(async move {
            let mut hist = Histogram::<u64>::new_with_bounds(1, 60_000_000, 3).unwrap();
            let mut seed = (t as u64 + 1) * 0xD134_2543_DE82_EF95;
            let mut i = 0u64;

            while Instant::now() < deadline {
                seed ^= seed >> 12;
                seed ^= seed << 25;
                seed ^= seed >> 27;
                let key = &keys[(seed.wrapping_mul(0x2545_F491_4F6C_DD1D) as usize) % keys.len()];

                i = i.wrapping_add(1);
                let t0 = should_sample(i, sample_every).then(Instant::now);

                match limiter.allow(key, 1).await {
                    Ok(true) => counts.allowed.fetch_add(1, Ordering::Relaxed),
                    Ok(false) => counts.rejected.fetch_add(1, Ordering::Relaxed),
                    Err(err) => {
                        tracing::warn!(error = %err, "stress.allow.error");
                        counts.errors.fetch_add(1, Ordering::Relaxed)
                    }
                };

                if let Some(t0) = t0 {
                    let _ = hist.record((t0.elapsed().as_micros() as u64).max(1));
                }
            }

            hist
        }));
    }

    let mut hist = Histogram::<u64>::new_with_bounds(1, 60_000_000, 3).unwrap();
    for handle in join {
        match handle.await {
            Ok(task_hist) => {
                let _ = hist.add(task_hist);
            }
            Err(err) => tracing::error!(error = %err, "stress.task.panicked"),
        }
    }

    print_results(&args, keys.len(), started.elapsed(), &hist, &counts);
}

fn print_results(
    args: &Args,
    key_count: usize,
    elapsed: Duration,
    hist: &Histogram<u64>,
    counts: &Counts,
) {
    let allowed = counts.allowed.load(Ordering::Relaxed);
    let rejected = counts.rejected.load(Ordering::Relaxed);
    let errors = counts.errors.load(Ordering::Relaxed);
    let ops = allowed + rejected + errors;

    // buckets start full, then refill once per rate interval
    let refilled = elapsed.as_micros() as u64 / args.rate_us.max(1);
    let ceiling = (args.capacity + refilled) * key_count as u64;

    println!(
        "store={:?} key_dist={:?} keys={} tasks={}",
        args.store, args.key_dist, key_count, args.tasks
    );
    println!(
        "elapsed_s={:.3} ops={} ops_per_s={:.0}",
        elapsed.as_secs_f64(),
        ops,
        ops as f64 / elapsed.as_secs_f64()
    );
    println!("allowed={allowed} rejected={rejected} errors={errors} admission_ceiling={ceiling}");
    if allowed > ceiling {
        println!("WARNING: admitted more than the configured buckets allow");
    }

    if !hist.is_empty() {
        println!(
            "lat_us p50={} p95={} p99={} p999={} max={}",
            hist.value_at_quantile(0.50),
            hist.value_at_quantile(0.95),
            hist.value_at_quantile(0.99),
            hist.value_at_quantile(0.999),
            hist.max()
        );
        println!("sample_every={} samples={}", args.sample_every, hist.len());
    } else {
        println!("no latency samples collected");
    }
}

#[cfg(feature = "redis-tokio")]
async fn run_redis(args: Args) {
    use tollgate::{KeyPrefix, RedisBucketStore};

    let client = match redis::Client::open(args.redis_url.as_str()) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("invalid redis url: {err}");
            return;
        }
    };

    let store = match RedisBucketStore::from_client(client, args.connections).await {
        Ok(store) => store,
        Err(err) => {
            eprintln!("failed to connect to redis: {err}");
            return;
        }
    };

    let prefix = match KeyPrefix::try_from(args.redis_prefix.clone()) {
        Ok(prefix) => prefix,
        Err(err) => {
            eprintln!("{err}");
            return;
        }
    };

    let limiter = Arc::new(TokenBucketLimiter::new(
        store,
        build_options(&args).with_prefix(prefix),
    ));

    run(args, limiter).await;
}

#[cfg(not(feature = "redis-tokio"))]
async fn run_redis(_: Args) {
    eprintln!("built without redis-tokio; rebuild with `--features redis-tokio`");
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    match args.store {
        Store::Local => {
            let store = Arc::new(LocalBucketStore::new());
            store.run_cleanup_loop(Duration::from_secs(1));

            let limiter = Arc::new(TokenBucketLimiter::new(store, build_options(&args)));
            run(args, limiter).await;
        }
        Store::Redis => run_redis(args).await,
    }
}
