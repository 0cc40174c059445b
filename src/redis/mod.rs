//! Redis-backed bucket store.
//!
//! Each admission check is one `EVALSHA` of a Lua script that reads the bucket hash,
//! refills, decides, writes the hash back and refreshes its TTL. Redis runs scripts
//! atomically, so concurrent callers in any number of processes never interleave on a
//! key.
//!
//! # Data model
//!
//! One hash per bucket key:
//!
//! | field       | value                                        |
//! |-------------|----------------------------------------------|
//! | `tokens`    | tokens available, `0..=capacity`             |
//! | `timestamp` | nanoseconds since the Unix epoch, exact      |
//!
//! The key expires (`PEXPIRE`) after the configured expire duration of inactivity.
//!
//! # Requirements
//!
//! - **Redis version:** >= 4.0.0 (multi-field `HSET`)
//! - **Runtime:** Tokio or Smol (via `redis-tokio` or `redis-smol` features)

mod bucket_script;

mod redis_bucket_store;
pub use redis_bucket_store::*;
