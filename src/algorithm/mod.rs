//! Rate limiting algorithm trait and implementations.
//!
//! Every algorithm is a stateless value that turns `(caller key, now, config)`
//! into an [`Invocation`] of its atomic script. The script reads the stored
//! state, decides, writes the new state and sets expiries in one unit, so
//! concurrent callers on any number of hosts observe a strict sequence of
//! decisions per key.
//!
//! # Available Algorithms
//!
//! | Algorithm | Key prefix | Memory | Burst | Boundary accuracy |
//! |-----------|------------|--------|-------|-------------------|
//! | Token Bucket | `tb:` | O(1) | Up to capacity | N/A |
//! | Leaky Bucket | `lb:` | O(1) | None | N/A |
//! | Sliding Window Log | `sw:` | O(requests in window) | None | Exact |
//! | Fixed Window | `fw:` | O(1) per window | Up to 2x at edges | Poor |
//! | Sliding Window Counter | `swc:` | O(1), two counters | Weighted | Approximate |
//! | Distributed Sliding Window | `dsw:` | O(requests in window) per shard | None | Approximate across shards |
//!
//! Each module also exposes its pure `evaluate` transition, the exact logic
//! the native script body applies between reading and writing state.

mod distributed_sliding_window;
mod fixed_window;
mod leaky_bucket;
mod sliding_window_counter;
mod sliding_window_log;
mod token_bucket;

pub use distributed_sliding_window::{DistributedSlidingWindow, ShardCounts};
pub use fixed_window::FixedWindow;
pub use leaky_bucket::{LeakyBucket, QueueState};
pub use sliding_window_counter::{DualWindowCounter, SlidingWindowCounter};
pub use sliding_window_log::SlidingWindowLog;
pub use token_bucket::{BucketState, TokenBucket};

/// Pure state transitions, one per algorithm.
pub mod evaluate {
    pub use super::distributed_sliding_window::evaluate as distributed_sliding_window;
    pub use super::fixed_window::evaluate as fixed_window;
    pub use super::leaky_bucket::evaluate as leaky_bucket;
    pub use super::sliding_window_counter::evaluate as sliding_window_counter;
    pub use super::sliding_window_log::evaluate as sliding_window_log;
    pub use super::token_bucket::evaluate as token_bucket;
}

use crate::config::RateLimitConfig;
use crate::script::Invocation;

/// Nanoseconds per second, as used in rate arithmetic.
pub(crate) const NANOS_PER_SEC: f64 = 1e9;

/// Latest reset instant any script reports, in epoch nanoseconds.
///
/// Lua numbers are doubles, so the cap sits below `i64::MAX` at a value both
/// script bodies represent exactly.
pub(crate) const LATEST_RESET: i64 = 9_200_000_000_000_000_000;

/// Rate limiting algorithm trait.
///
/// Implementations hold no mutable state; all state lives in the store.
pub trait Algorithm: Send + Sync {
    /// Get the algorithm name (for logging).
    fn name(&self) -> &'static str;

    /// Prefix that separates this algorithm's keys from the others'.
    fn prefix(&self) -> &'static str;

    /// Build the script call for `key` at time `now` (epoch nanoseconds).
    fn invocation(&self, key: &str, now: i64, config: &RateLimitConfig) -> Invocation;

    /// Store key for a caller key.
    fn store_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix(), key)
    }
}

/// Start of the fixed window containing `now`.
pub(crate) fn window_start(now: i64, window: i64) -> i64 {
    now.div_euclid(window) * window
}

/// `base` pushed forward by `span` nanoseconds, capped at [`LATEST_RESET`].
///
/// The span is truncated to whole nanoseconds; negative or NaN spans count
/// as zero.
pub(crate) fn reset_after(base: i64, span: f64) -> i64 {
    // Float to int casts saturate.
    base.saturating_add(span.max(0.0) as i64).min(LATEST_RESET)
}

/// Parse a stored number, treating missing or garbled values as absent.
pub(crate) fn parse_stored<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.parse().ok())
}
