use std::sync::Arc;

use async_trait::async_trait;

use crate::{BucketDecision, BucketState, TollgateError, TransitionArgs};

/// A shared store able to run the bucket transition atomically against one key.
///
/// Implementations must guarantee that no two `run_transition` calls for the same key
/// interleave their read and write. Nothing is assumed across different keys.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Atomically refill, decide and persist the bucket stored under `key`.
    ///
    /// The stored record's time-to-live is refreshed to `args.expire_ms`.
    async fn run_transition(
        &self,
        key: &str,
        args: &TransitionArgs,
    ) -> Result<BucketDecision, TollgateError>;

    /// Read the persisted state of `key`, if any.
    async fn load(&self, key: &str) -> Result<Option<BucketState>, TollgateError>;

    /// Delete the bucket stored under `key`. Returns `true` if it existed.
    async fn remove(&self, key: &str) -> Result<bool, TollgateError>;
}

#[async_trait]
impl<T> BucketStore for Arc<T>
where
    T: BucketStore + ?Sized,
{
    async fn run_transition(
        &self,
        key: &str,
        args: &TransitionArgs,
    ) -> Result<BucketDecision, TollgateError> {
        (**self).run_transition(key, args).await
    }

    async fn load(&self, key: &str) -> Result<Option<BucketState>, TollgateError> {
        (**self).load(key).await
    }

    async fn remove(&self, key: &str) -> Result<bool, TollgateError> {
        (**self).remove(key).await
    }
}
