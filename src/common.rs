use std::{
    ops::Deref,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crate::TollgateError;

/// Largest integer that survives a round trip through a Lua number unchanged (`2^53 - 1`).
///
/// Rates and capacities are clamped to this so that the Redis script computes exactly.
pub const MAX_EXACT_INTEGER: u64 = (1 << 53) - 1;

/// Persisted state of one bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BucketState {
    /// Tokens currently available.
    pub tokens: u64,
    /// Nanoseconds since the Unix epoch at which `tokens` was exact.
    pub timestamp: u64,
}

/// Outcome of an admission check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BucketDecision {
    /// The requested tokens were deducted.
    Allowed {
        /// Tokens left in the bucket after the deduction.
        remaining: u64,
    },
    /// Not enough tokens; nothing was deducted.
    Rejected {
        /// Tokens available after refill.
        remaining: u64,
        /// Best-effort wait until the request could succeed, assuming no other consumer.
        ///
        /// `None` when the request exceeds the bucket capacity and can never succeed.
        retry_after: Option<Duration>,
    },
}

impl BucketDecision {
    /// `true` for [`BucketDecision::Allowed`].
    pub fn is_allowed(&self) -> bool {
        matches!(self, BucketDecision::Allowed { .. })
    }

    /// Tokens left in the bucket once this decision was made.
    pub fn remaining(&self) -> u64 {
        match self {
            BucketDecision::Allowed { remaining } | BucketDecision::Rejected { remaining, .. } => {
                *remaining
            }
        }
    }
}

/// A validated prefix for bucket keys.
///
/// This is a string with the following constraints:
/// - Must not be empty
/// - Must not be longer than 255 bytes
/// - Must not contain colons
#[derive(Debug, Clone, PartialEq, PartialOrd, Hash, Eq)]
pub struct KeyPrefix(Arc<str>);

impl KeyPrefix {
    /// Prefix the caller's key: `<prefix>:<key>`.
    pub(crate) fn apply(&self, key: &str) -> String {
        format!("{}:{}", self.0, key)
    }
}

impl Deref for KeyPrefix {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<String> for KeyPrefix {
    type Error = TollgateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Err(TollgateError::InvalidKeyPrefix(
                "key prefix must not be empty".to_string(),
            ))
        } else if value.len() > 255 {
            Err(TollgateError::InvalidKeyPrefix(
                "key prefix must not be longer than 255 bytes".to_string(),
            ))
        } else if value.contains(':') {
            Err(TollgateError::InvalidKeyPrefix(
                "key prefix must not contain colons".to_string(),
            ))
        } else {
            Ok(Self(Arc::from(value)))
        }
    }
}

impl TryFrom<&str> for KeyPrefix {
    type Error = TollgateError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_string())
    }
}

/// Wall-clock nanoseconds since the Unix epoch.
///
/// A clock set before the epoch reads as `0`; the transition clamps the regression.
pub(crate) fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
