//! The bucket state transition, as plain Rust.
//!
//! [`transition`] is the in-process twin of the Lua script run by the Redis store: the
//! same inputs produce the same persisted state and the same decision. The local store
//! executes it under a per-key lock; the Redis tests use it as the reference model.

use std::time::Duration;

use crate::{BucketDecision, BucketState, MAX_EXACT_INTEGER};

/// Arguments of one transition, already converted to the units the store works in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionArgs {
    /// Nanoseconds needed to generate one token. Always `> 0`.
    pub rate_ns: u64,
    /// Bucket capacity. Always `> 0`.
    pub capacity: u64,
    /// Tokens in a bucket created by this call.
    pub init_tokens: u64,
    /// Caller-observed current instant, nanoseconds since the Unix epoch.
    pub now_ns: u64,
    /// Tokens this call wants to consume.
    pub token_request: u64,
    /// Time-to-live applied to the stored record, milliseconds.
    pub expire_ms: u64,
}

/// Result of [`transition`]: the state to persist and the decision to return.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    /// State to write back under the bucket key.
    pub state: BucketState,
    /// Admission decision.
    pub decision: BucketDecision,
}

/// Compute the next state of a bucket.
///
/// 1. An absent bucket starts as `(init_tokens, now)`.
/// 2. Whole tokens earned since `timestamp` are credited, capped at `capacity`.
/// 3. The timestamp advances by exactly the time spent on those whole tokens, so the
///    fractional progress towards the next token carries over to the next call.
/// 4. The request is admitted iff enough tokens are available, and only then deducted.
///
/// Step 3 applies to denied calls as well; a denied call persists its refill and must
/// not let the next call credit the same interval again.
pub fn transition(current: Option<BucketState>, args: &TransitionArgs) -> Transition {
    let BucketState { tokens, timestamp } = current.unwrap_or(BucketState {
        tokens: args.init_tokens,
        timestamp: args.now_ns,
    });

    let rate_ns = args.rate_ns.max(1);

    // clock regressions credit nothing
    let delta = args.now_ns.saturating_sub(timestamp);
    let fill = delta / rate_ns;
    let progress = delta % rate_ns;

    let tokens = tokens.saturating_add(fill).min(args.capacity);
    let timestamp = timestamp + (delta - progress);

    if tokens >= args.token_request {
        let remaining = tokens - args.token_request;

        return Transition {
            state: BucketState {
                tokens: remaining,
                timestamp,
            },
            decision: BucketDecision::Allowed { remaining },
        };
    }

    let retry_after = (args.token_request <= args.capacity).then(|| {
        let missing = args.token_request - tokens;
        // waits past 2^53 - 1 ns are reported as that, matching the script
        let wait_ns = missing
            .checked_mul(rate_ns)
            .filter(|wait| *wait <= MAX_EXACT_INTEGER)
            .map_or(MAX_EXACT_INTEGER, |wait| wait - progress);
        Duration::from_nanos(wait_ns)
    });

    Transition {
        state: BucketState { tokens, timestamp },
        decision: BucketDecision::Rejected {
            remaining: tokens,
            retry_after,
        },
    }
}
