//! Rate limiter facade.
//!
//! [`RateLimiter`] binds one [`RateLimitConfig`] to one store and exposes a
//! call per algorithm. Every call is exactly one store round trip; the
//! limiter itself keeps no per-key state, so any number of limiters on any
//! number of hosts can share a store.
//!
//! # Failure handling
//!
//! [`RateLimiter::check`] returns store failures as errors. The
//! per-algorithm shortcuts fail closed instead: a failure is logged with
//! `warn!` and the request is denied with nothing remaining.
//!
//! # Example
//!
//! ```ignore
//! use skp_distlimit::prelude::*;
//!
//! let limiter = RateLimiter::new(RateLimitConfig::per_second(10), MemoryStorage::new());
//!
//! let decision = limiter.token_bucket("user:123").await;
//! if decision.is_denied() {
//!     println!("retry at {:?}", decision.reset_at());
//! }
//!
//! if !limiter.sliding_window("user:123").await {
//!     println!("rate limited");
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::algorithm::{
    Algorithm, DistributedSlidingWindow, FixedWindow, LeakyBucket, SlidingWindowCounter,
    SlidingWindowLog, TokenBucket,
};
use crate::clock::{Clock, SystemClock};
use crate::config::RateLimitConfig;
use crate::decision::Decision;
use crate::error::Result;
use crate::storage::Storage;

/// Distributed rate limiter over a shared store.
pub struct RateLimiter<S> {
    config: RateLimitConfig,
    storage: Arc<S>,
    clock: Arc<dyn Clock>,
    timeout: Option<Duration>,
}

impl<S> std::fmt::Debug for RateLimiter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<S> Clone for RateLimiter<S> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            storage: Arc::clone(&self.storage),
            clock: Arc::clone(&self.clock),
            timeout: self.timeout,
        }
    }
}

impl<S: Storage> RateLimiter<S> {
    /// Create a limiter that owns `storage`.
    pub fn new(config: RateLimitConfig, storage: S) -> Self {
        Self::from_shared(config, Arc::new(storage))
    }

    /// Create a limiter over a store shared with other limiters.
    pub fn from_shared(config: RateLimitConfig, storage: Arc<S>) -> Self {
        Self {
            config,
            storage,
            clock: Arc::new(SystemClock),
            timeout: None,
        }
    }

    /// Take timestamps from `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Abort store calls that take longer than `timeout`.
    ///
    /// An aborted call is indeterminate: the store may have applied it.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The limit configuration.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// The underlying store.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Run one admission check with `algorithm`, returning store failures.
    pub async fn check<A>(&self, algorithm: &A, key: &str) -> Result<Decision>
    where
        A: Algorithm + ?Sized,
    {
        let now = self.clock.now_nanos();
        let invocation = algorithm.invocation(key, now, &self.config);
        let decision = invocation.execute(&*self.storage, self.timeout).await?;

        debug!(
            algorithm = algorithm.name(),
            key,
            allowed = decision.is_allowed(),
            remaining = decision.remaining(),
            "Rate limit decision"
        );

        Ok(decision)
    }

    /// Run one admission check with `algorithm`, denying on store failure.
    pub async fn check_or_deny<A>(&self, algorithm: &A, key: &str) -> Decision
    where
        A: Algorithm + ?Sized,
    {
        match self.check(algorithm, key).await {
            Ok(decision) => decision,
            Err(error) => {
                warn!(
                    algorithm = algorithm.name(),
                    key,
                    error = %error,
                    indeterminate = error.is_indeterminate(),
                    "Rate limit store failed, denying request"
                );
                Decision::denied(self.config.max_requests(), 0, self.clock.now_nanos())
            }
        }
    }

    /// Token Bucket check. On store failure the decision is denied with
    /// nothing remaining.
    pub async fn token_bucket(&self, key: &str) -> Decision {
        self.check_or_deny(&TokenBucket::new(), key).await
    }

    /// Leaky Bucket check.
    pub async fn leaky_bucket(&self, key: &str) -> bool {
        self.check_or_deny(&LeakyBucket::new(), key).await.is_allowed()
    }

    /// Sliding Window Log check.
    pub async fn sliding_window(&self, key: &str) -> bool {
        self.check_or_deny(&SlidingWindowLog::new(), key).await.is_allowed()
    }

    /// Fixed Window Counter check.
    pub async fn fixed_window(&self, key: &str) -> bool {
        self.check_or_deny(&FixedWindow::new(), key).await.is_allowed()
    }

    /// Sliding Window Counter check.
    pub async fn sliding_window_counter(&self, key: &str) -> bool {
        self.check_or_deny(&SlidingWindowCounter::new(), key).await.is_allowed()
    }

    /// Distributed Sliding Window check, recording into `node_id`'s shard.
    pub async fn distributed_sliding_window(&self, key: &str, node_id: &str) -> bool {
        self.check_or_deny(&DistributedSlidingWindow::new(node_id), key)
            .await
            .is_allowed()
    }
}
