use std::{
    sync::{
        Arc, Mutex, PoisonError, Weak,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};

use crate::{BucketDecision, BucketState, BucketStore, TollgateError, TransitionArgs, transition};

#[derive(Clone, Copy, Debug)]
pub(crate) struct LocalBucket {
    pub state: BucketState,
    pub expires_at: Instant,
}

impl LocalBucket {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Bucket store kept in process memory.
///
/// # Semantics
///
/// - Transitions for one key are serialized by the map's entry lock
/// - A bucket whose time-to-live elapsed is treated as absent and reinitialized on the
///   next check, exactly as an expired Redis key would be
/// - Expired buckets stay in memory until touched or reaped by [`cleanup`](Self::cleanup)
///   or the background loop started with [`run_cleanup_loop`](Self::run_cleanup_loop)
#[derive(Debug, Default)]
pub struct LocalBucketStore {
    buckets: DashMap<String, LocalBucket>,
    // stop token of the current reaper; every loop gets its own
    cleanup_token: Mutex<Option<Arc<AtomicBool>>>,
    cleanup_threads: Arc<AtomicUsize>,
}

impl LocalBucketStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn buckets(&self) -> &DashMap<String, LocalBucket> {
        &self.buckets
    }

    /// Number of buckets held in memory, expired ones included.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// `true` when no bucket is held in memory.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Drop every expired bucket. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();

        self.buckets.retain(|_, bucket| bucket.is_live(now));

        before.saturating_sub(self.buckets.len())
    }

    /// Reap expired buckets every `interval` on a background thread.
    ///
    /// The thread holds a weak reference and exits once the store is dropped or
    /// [`stop_cleanup_loop`](Self::stop_cleanup_loop) is called. Calling this while a loop
    /// is already running does nothing. A stopped loop can be started again.
    pub fn run_cleanup_loop(self: &Arc<Self>, interval: Duration) {
        let mut current = self
            .cleanup_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if current.is_some() {
            return;
        }

        let running = Arc::new(AtomicBool::new(true));
        *current = Some(Arc::clone(&running));

        let store: Weak<Self> = Arc::downgrade(self);
        let threads = Arc::clone(&self.cleanup_threads);
        threads.fetch_add(1, Ordering::AcqRel);

        thread::spawn(move || {
            while running.load(Ordering::Acquire) {
                thread::sleep(interval);

                let Some(store) = store.upgrade() else {
                    break;
                };

                if !running.load(Ordering::Acquire) {
                    break;
                }

                let removed = store.cleanup();
                if removed > 0 {
                    tracing::debug!(removed, "local.cleanup, removed expired buckets");
                }
            }

            threads.fetch_sub(1, Ordering::AcqRel);
        });
    }

    /// Stop the loop started by [`run_cleanup_loop`](Self::run_cleanup_loop).
    ///
    /// The thread exits when it next wakes up.
    pub fn stop_cleanup_loop(&self) {
        let token = self
            .cleanup_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(running) = token {
            running.store(false, Ordering::Release);
        }
    }

    /// Number of reaper threads that have not exited yet.
    #[cfg(test)]
    pub(crate) fn cleanup_threads(&self) -> usize {
        self.cleanup_threads.load(Ordering::Acquire)
    }

    fn expires_at(now: Instant, expire_ms: u64) -> Instant {
        now.checked_add(Duration::from_millis(expire_ms))
            .unwrap_or(now + Duration::from_secs(u32::MAX as u64))
    }
}

#[async_trait]
impl BucketStore for LocalBucketStore {
    async fn run_transition(
        &self,
        key: &str,
        args: &TransitionArgs,
    ) -> Result<BucketDecision, TollgateError> {
        let now = Instant::now();
        let expires_at = Self::expires_at(now, args.expire_ms);

        let decision = match self.buckets.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = Some(*occupied.get())
                    .filter(|bucket| bucket.is_live(now))
                    .map(|bucket| bucket.state);

                let next = transition(current, args);
                occupied.insert(LocalBucket {
                    state: next.state,
                    expires_at,
                });

                next.decision
            }
            Entry::Vacant(vacant) => {
                let next = transition(None, args);
                vacant.insert(LocalBucket {
                    state: next.state,
                    expires_at,
                });

                next.decision
            }
        };

        Ok(decision)
    }

    async fn load(&self, key: &str) -> Result<Option<BucketState>, TollgateError> {
        let now = Instant::now();

        Ok(self
            .buckets
            .get(key)
            .filter(|bucket| bucket.is_live(now))
            .map(|bucket| bucket.state))
    }

    async fn remove(&self, key: &str) -> Result<bool, TollgateError> {
        let now = Instant::now();

        Ok(self
            .buckets
            .remove(key)
            .is_some_and(|(_, bucket)| bucket.is_live(now)))
    }
}
