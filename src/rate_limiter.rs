//! Top-level entrypoint: the token bucket limiter client.
//!
//! [`TokenBucketLimiter`] turns typed [`TokenBucketOptions`] into the numeric
//! [`BucketParams`] the transition works with, and issues exactly one atomic store call
//! per admission check. It keeps no bucket state of its own, so one instance can be
//! shared across tasks and any number of processes can point at the same store.

use std::{borrow::Cow, time::Duration};

use crate::{
    BucketDecision, BucketState, BucketStore, KeyPrefix, MAX_EXACT_INTEGER, TollgateError,
    TransitionArgs, common::now_ns,
};

/// Token generation interval used when none (or zero) is configured: 1000 tokens/s.
pub const DEFAULT_RATE: Duration = Duration::from_millis(1);

/// Bucket capacity used when none (or zero) is configured.
pub const DEFAULT_CAPACITY: u64 = 1000;

const NANOS_PER_MILLI: u128 = 1_000_000;

/// Configuration for [`TokenBucketLimiter`].
///
/// Every field is optional. Unset or invalid values are replaced by a default instead of
/// failing construction; see [`BucketParams::from_options`] for the exact rules.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use tollgate::TokenBucketOptions;
///
/// let options = TokenBucketOptions::default()
///     .with_rate(Duration::from_millis(20)) // 50 tokens/s
///     .with_capacity(90)
///     .with_init_tokens(90);
/// ```
#[derive(Clone, Debug, Default)]
pub struct TokenBucketOptions {
    /// Time needed to generate one token. Defaults to [`DEFAULT_RATE`].
    pub rate: Option<Duration>,
    /// Maximum tokens a bucket holds. Defaults to [`DEFAULT_CAPACITY`].
    pub capacity: Option<u64>,
    /// Tokens in a newly created bucket. Defaults to the capacity (buckets start full).
    pub init_tokens: Option<u64>,
    /// Time-to-live of an idle bucket. Defaults to twice the time to refill it from empty.
    pub expire_duration: Option<Duration>,
    /// Optional prefix for all bucket keys: `<prefix>:<key>`.
    ///
    /// If `None`, keys are used verbatim.
    pub prefix: Option<KeyPrefix>,
}

impl TokenBucketOptions {
    /// Set the token generation interval, e.g. `10µs` for 100k tokens/s.
    pub fn with_rate(mut self, rate: Duration) -> Self {
        self.rate = Some(rate);
        self
    }

    /// Set the bucket capacity.
    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Set the initial token count of new buckets.
    pub fn with_init_tokens(mut self, init_tokens: u64) -> Self {
        self.init_tokens = Some(init_tokens);
        self
    }

    /// Set the time-to-live of idle buckets.
    pub fn with_expire_duration(mut self, expire_duration: Duration) -> Self {
        self.expire_duration = Some(expire_duration);
        self
    }

    /// Set the key prefix.
    pub fn with_prefix(mut self, prefix: KeyPrefix) -> Self {
        self.prefix = Some(prefix);
        self
    }
}

/// Normalized numeric parameters, in the units the transition works in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BucketParams {
    /// Nanoseconds per token, `1..=MAX_EXACT_INTEGER`.
    pub rate_ns: u64,
    /// Bucket capacity, `1..=MAX_EXACT_INTEGER`.
    pub capacity: u64,
    /// Initial tokens, `0..=capacity`.
    pub init_tokens: u64,
    /// Time-to-live in milliseconds, `1..=MAX_EXACT_INTEGER`.
    pub expire_ms: u64,
}

impl BucketParams {
    /// Derive parameters from `options`, fixing anything unusable.
    ///
    /// - `rate`: unset or zero → [`DEFAULT_RATE`]
    /// - `capacity`: unset or zero → [`DEFAULT_CAPACITY`]
    /// - `init_tokens`: unset → `capacity`; above `capacity` → `capacity`
    /// - `expire_duration`: unset or zero → `2 × capacity × rate`; never below 1ms
    ///
    /// Rate, capacity and expiry are capped at [`MAX_EXACT_INTEGER`] of their unit.
    pub fn from_options(options: &TokenBucketOptions) -> Self {
        let rate_ns = match options.rate {
            Some(rate) if !rate.is_zero() => clamp_exact(rate.as_nanos(), "rate_ns"),
            Some(_) => {
                tracing::debug!(default = ?DEFAULT_RATE, "options.rate is zero, using default");
                DEFAULT_RATE.as_nanos() as u64
            }
            None => DEFAULT_RATE.as_nanos() as u64,
        };

        let capacity = match options.capacity {
            Some(capacity) if capacity > 0 => clamp_exact(capacity as u128, "capacity"),
            Some(_) => {
                tracing::debug!(
                    default = DEFAULT_CAPACITY,
                    "options.capacity is zero, using default"
                );
                DEFAULT_CAPACITY
            }
            None => DEFAULT_CAPACITY,
        };

        let init_tokens = match options.init_tokens {
            Some(init_tokens) if init_tokens > capacity => {
                tracing::debug!(
                    init_tokens,
                    capacity,
                    "options.init_tokens exceeds capacity, clamping"
                );
                capacity
            }
            Some(init_tokens) => init_tokens,
            None => capacity,
        };

        let expire_ms = match options.expire_duration {
            Some(expire) if !expire.is_zero() => {
                let expire_ms = expire.as_millis();
                if expire_ms == 0 {
                    tracing::debug!(?expire, "options.expire_duration is below 1ms, raising");
                }
                clamp_exact(expire_ms.max(1), "expire_ms")
            }
            _ => {
                // long enough to refill an empty bucket twice
                let refill_ms = 2 * capacity as u128 * rate_ns as u128 / NANOS_PER_MILLI;
                clamp_exact(refill_ms.max(1), "expire_ms")
            }
        };

        Self {
            rate_ns,
            capacity,
            init_tokens,
            expire_ms,
        }
    }

    /// Token generation interval.
    pub fn rate(&self) -> Duration {
        Duration::from_nanos(self.rate_ns)
    }

    /// Time-to-live of idle buckets.
    pub fn expire_duration(&self) -> Duration {
        Duration::from_millis(self.expire_ms)
    }

    pub(crate) fn transition_args(&self, now_ns: u64, token_request: u64) -> TransitionArgs {
        TransitionArgs {
            rate_ns: self.rate_ns,
            capacity: self.capacity,
            init_tokens: self.init_tokens,
            now_ns,
            token_request,
            expire_ms: self.expire_ms,
        }
    }
}

impl From<&TokenBucketOptions> for BucketParams {
    fn from(options: &TokenBucketOptions) -> Self {
        Self::from_options(options)
    }
}

fn clamp_exact(value: u128, name: &'static str) -> u64 {
    if value > MAX_EXACT_INTEGER as u128 {
        tracing::debug!(value = %value, name, "parameter exceeds 2^53 - 1, clamping");
        MAX_EXACT_INTEGER
    } else {
        value as u64
    }
}

/// Distributed token bucket limiter.
///
/// One bucket per key, stored in `S`. Each check is a single atomic
/// [`BucketStore::run_transition`] call that refills the bucket from elapsed time,
/// decides, deducts on admission and refreshes the bucket's time-to-live.
///
/// # Semantics
///
/// - Buckets are created lazily on first check with `init_tokens` tokens
/// - Idle buckets expire after `expire_duration` and start over on the next check
/// - Time is read from the wall clock of the calling process; skew between callers
///   shifts refill slightly but never credits negative time
///
/// # Errors
///
/// A store failure is returned as an error and implies **no** decision: the transition
/// may or may not have been applied. Callers choose whether to fail open or closed.
///
/// # Examples
///
/// ```ignore
/// use std::time::Duration;
/// use tollgate::{RedisBucketStore, TokenBucketLimiter, TokenBucketOptions};
///
/// let client = redis::Client::open("redis://127.0.0.1:6379/")?;
/// let store = RedisBucketStore::default_from_client(client).await?;
///
/// let limiter = TokenBucketLimiter::new(
///     store,
///     TokenBucketOptions::default()
///         .with_capacity(90)
///         .with_rate(Duration::from_millis(20)),
/// );
///
/// if limiter.allow("test:ratelimit", 1).await? {
///     // proceed
/// }
/// ```
#[derive(Debug)]
pub struct TokenBucketLimiter<S> {
    store: S,
    params: BucketParams,
    prefix: Option<KeyPrefix>,
}

impl<S> TokenBucketLimiter<S>
where
    S: BucketStore,
{
    /// Create a limiter over `store`.
    pub fn new(store: S, options: TokenBucketOptions) -> Self {
        let params = BucketParams::from_options(&options);

        Self {
            store,
            params,
            prefix: options.prefix,
        }
    }

    /// Normalized parameters in use.
    pub fn params(&self) -> &BucketParams {
        &self.params
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Try to take `token_request` tokens from the bucket of `key`.
    ///
    /// Returns `Ok(true)` if the tokens were deducted, `Ok(false)` if the bucket holds
    /// too few.
    pub async fn allow(&self, key: &str, token_request: u64) -> Result<bool, TollgateError> {
        self.acquire(key, token_request)
            .await
            .map(|decision| decision.is_allowed())
    }

    /// Like [`allow`](Self::allow), returning the remaining tokens and a retry hint.
    pub async fn acquire(
        &self,
        key: &str,
        token_request: u64,
    ) -> Result<BucketDecision, TollgateError> {
        self.acquire_at(key, token_request, now_ns()).await
    }

    /// Like [`acquire`](Self::acquire), with the current instant supplied by the caller.
    ///
    /// `now_ns` is nanoseconds since the Unix epoch. Every caller sharing a bucket must
    /// use the same clock.
    pub async fn acquire_at(
        &self,
        key: &str,
        token_request: u64,
        now_ns: u64,
    ) -> Result<BucketDecision, TollgateError> {
        let bucket_key = self.bucket_key(key);
        let args = self.params.transition_args(now_ns, token_request);

        let decision = self.store.run_transition(&bucket_key, &args).await?;

        tracing::trace!(
            key = %bucket_key,
            token_request,
            allowed = decision.is_allowed(),
            remaining = decision.remaining(),
            "bucket.transition"
        );

        Ok(decision)
    }

    /// Like [`allow`](Self::allow), failing with [`TollgateError::Timeout`] if the store
    /// does not answer within `timeout`.
    ///
    /// On timeout the bucket may or may not have been updated.
    #[cfg(any(feature = "redis-tokio", feature = "redis-smol"))]
    #[cfg_attr(docsrs, doc(cfg(any(feature = "redis-tokio", feature = "redis-smol"))))]
    pub async fn allow_with_timeout(
        &self,
        key: &str,
        token_request: u64,
        timeout: Duration,
    ) -> Result<bool, TollgateError> {
        crate::runtime::timeout(timeout, self.allow(key, token_request))
            .await
            .unwrap_or(Err(TollgateError::Timeout(timeout)))
    }

    /// Read the persisted state of the bucket of `key`, if it exists.
    ///
    /// No refill is applied; this is the raw record.
    pub async fn state(&self, key: &str) -> Result<Option<BucketState>, TollgateError> {
        self.store.load(&self.bucket_key(key)).await
    }

    /// Delete the bucket of `key`; the next check starts from `init_tokens`.
    pub async fn reset(&self, key: &str) -> Result<bool, TollgateError> {
        self.store.remove(&self.bucket_key(key)).await
    }

    fn bucket_key<'a>(&self, key: &'a str) -> Cow<'a, str> {
        match &self.prefix {
            Some(prefix) => Cow::Owned(prefix.apply(key)),
            None => Cow::Borrowed(key),
        }
    }
}
