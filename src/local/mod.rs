//! In-process bucket store.
//!
//! The local store runs the same transition as the Redis script, against buckets kept in
//! a [`DashMap`](dashmap::DashMap). The map's entry lock serializes transitions per key,
//! which gives the same atomicity the Redis store gets from script execution.
//!
//! # Key Characteristics
//!
//! - **Thread-safe:** Safe for concurrent use across threads and tasks
//! - **Zero external dependencies:** No network or database required
//! - **Process-scoped:** State is not shared across processes
//!
//! # When to Use
//!
//! ✅ **Use the local store when:**
//! - Single-process application
//! - Tests and development without a Redis server
//!
//! ❌ **Don't use the local store when:**
//! - Multiple application instances need one shared bucket
//! - Buckets must survive process restarts
//!
//! # Examples
//!
//! ```no_run
//! use std::time::Duration;
//! use tollgate::{LocalBucketStore, TokenBucketLimiter, TokenBucketOptions};
//!
//! # async fn run() -> Result<(), tollgate::TollgateError> {
//! let limiter = TokenBucketLimiter::new(
//!     LocalBucketStore::new(),
//!     TokenBucketOptions::default()
//!         .with_rate(Duration::from_millis(100))
//!         .with_capacity(10),
//! );
//!
//! if limiter.allow("user_123", 1).await? {
//!     // proceed
//! }
//! # Ok(())
//! # }
//! ```

mod local_bucket_store;
pub use local_bucket_store::*;
