#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

mod rate_limiter;
pub use rate_limiter::*;

mod store;
pub use store::*;

mod transition;
pub use transition::*;

mod local;
pub use local::*;

#[cfg(any(feature = "redis-tokio", feature = "redis-smol"))]
mod redis;
#[cfg(any(feature = "redis-tokio", feature = "redis-smol"))]
pub use crate::redis::*;

#[cfg(any(feature = "redis-tokio", feature = "redis-smol"))]
mod runtime;

mod error;
pub use error::*;

mod common;
pub use common::{BucketDecision, BucketState, KeyPrefix, MAX_EXACT_INTEGER};

#[cfg(test)]
mod tests;
