use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::ConnectionManager};

use crate::{
    BucketDecision, BucketState, BucketStore, TollgateError, TransitionArgs,
    redis::bucket_script::{BUCKET_SCRIPT, TIMESTAMP_FIELD, TOKENS_FIELD},
};

/// Bucket store backed by Redis.
///
/// Holds one or more [`redis::aio::ConnectionManager`]s and hands them out round-robin.
/// Every transition is a single atomic script call; the store keeps no bucket state of
/// its own.
///
/// # Examples
///
/// ```ignore
/// use tollgate::{RedisBucketStore, TokenBucketLimiter, TokenBucketOptions};
///
/// let client = redis::Client::open("redis://127.0.0.1:6379/")?;
/// let store = RedisBucketStore::from_client(client, 4).await?;
///
/// let limiter = TokenBucketLimiter::new(store, TokenBucketOptions::default());
/// let allowed = limiter.allow("user_123", 1).await?;
/// ```
pub struct RedisBucketStore {
    connection_managers: Arc<Vec<ConnectionManager>>,
    track_index: AtomicUsize,
}

impl RedisBucketStore {
    /// Create a store using a single connection manager opened from `client`.
    pub async fn default_from_client(client: Client) -> Result<Self, TollgateError> {
        Self::from_client(client, 1).await
    }

    /// Create a store with `connection_count` connection managers opened from `client`.
    pub async fn from_client(
        client: Client,
        connection_count: usize,
    ) -> Result<Self, TollgateError> {
        if connection_count == 0 {
            return Err(TollgateError::InvalidConnectionCount(
                "connection count must be > 0".to_string(),
            ));
        }

        let mut connection_managers = Vec::with_capacity(connection_count);

        for _ in 0..connection_count {
            connection_managers.push(client.get_connection_manager().await?);
        }

        Ok(Self {
            connection_managers: Arc::new(connection_managers),
            track_index: AtomicUsize::new(0),
        })
    }

    /// Wrap an existing connection manager.
    pub fn from_connection_manager(connection_manager: ConnectionManager) -> Self {
        Self {
            connection_managers: Arc::new(vec![connection_manager]),
            track_index: AtomicUsize::new(0),
        }
    }

    fn get(&self) -> ConnectionManager {
        let index = self.track_index.fetch_add(1, Ordering::Relaxed);
        self.connection_managers[index % self.connection_managers.len()].clone()
    }
}

impl Clone for RedisBucketStore {
    fn clone(&self) -> Self {
        Self {
            connection_managers: self.connection_managers.clone(),
            track_index: AtomicUsize::new(0),
        }
    }
}

impl fmt::Debug for RedisBucketStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBucketStore")
            .field("connections", &self.connection_managers.len())
            .finish()
    }
}

#[async_trait]
impl BucketStore for RedisBucketStore {
    async fn run_transition(
        &self,
        key: &str,
        args: &TransitionArgs,
    ) -> Result<BucketDecision, TollgateError> {
        let mut connection_manager = self.get();

        let (allowed, remaining, retry_after_ns): (i64, u64, i64) = BUCKET_SCRIPT
            .key(key)
            .arg(args.rate_ns)
            .arg(args.capacity)
            .arg(args.init_tokens)
            .arg(args.now_ns)
            .arg(args.token_request)
            .arg(args.expire_ms)
            .invoke_async(&mut connection_manager)
            .await?;

        match allowed {
            1 => Ok(BucketDecision::Allowed { remaining }),
            0 => Ok(BucketDecision::Rejected {
                remaining,
                retry_after: u64::try_from(retry_after_ns).ok().map(Duration::from_nanos),
            }),
            other => Err(TollgateError::UnexpectedScriptResult(format!(
                "admission flag must be 0 or 1, got {other}"
            ))),
        }
    }

    async fn load(&self, key: &str) -> Result<Option<BucketState>, TollgateError> {
        let mut connection_manager = self.get();

        let (tokens, timestamp): (Option<u64>, Option<u64>) = connection_manager
            .hget(key, &[TOKENS_FIELD, TIMESTAMP_FIELD])
            .await?;

        Ok(match (tokens, timestamp) {
            (Some(tokens), Some(timestamp)) => Some(BucketState { tokens, timestamp }),
            _ => None,
        })
    }

    async fn remove(&self, key: &str) -> Result<bool, TollgateError> {
        let mut connection_manager = self.get();

        let removed: usize = connection_manager.del(key).await?;

        Ok(removed > 0)
    }
}
