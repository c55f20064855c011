//! Distributed rate limiting engine.
//!
//! `skp_distlimit` decides whether a caller may proceed, with every decision
//! evaluated atomically inside a store shared by all of your processes:
//!
//! - **Six Algorithms**: Token Bucket, Leaky Bucket, Sliding Window Log, Fixed
//!   Window Counter, Sliding Window Counter and a shard-aware Distributed
//!   Sliding Window
//! - **Atomic Scripts**: read, decide and write run as one unit in the store,
//!   so concurrent callers on many hosts never over-admit
//! - **Pluggable Storage**: Redis-compatible servers via pooled connections,
//!   or an in-memory store with the same atomicity for tests
//! - **Fail-Closed**: store outages deny requests instead of letting them
//!   through
//!
//! # Quick Start
//!
//! ```ignore
//! use skp_distlimit::prelude::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RateLimitConfig::per_second(10).with_refill_rate(5.0);
//!     let limiter = RateLimiter::new(config, MemoryStorage::new());
//!
//!     let decision = limiter.token_bucket("user:123").await;
//!     if decision.is_allowed() {
//!         println!("Request allowed! {} remaining", decision.remaining());
//!     } else {
//!         println!("Rate limited! Full again at {:?}", decision.reset_at());
//!     }
//!
//!     // Explicit error handling instead of fail-closed
//!     match limiter.check(&SlidingWindowLog::new(), "user:123").await {
//!         Ok(decision) => println!("allowed: {}", decision.is_allowed()),
//!         Err(e) if e.is_indeterminate() => println!("outcome unknown: {e}"),
//!         Err(e) => println!("store failed: {e}"),
//!     }
//! }
//! ```
//!
//! # Algorithms
//!
//! | Algorithm | Facade call | Returns |
//! |-----------|-------------|---------|
//! | Token Bucket | `token_bucket(key)` | `Decision` |
//! | Leaky Bucket | `leaky_bucket(key)` | `bool` |
//! | Sliding Window Log | `sliding_window(key)` | `bool` |
//! | Fixed Window Counter | `fixed_window(key)` | `bool` |
//! | Sliding Window Counter | `sliding_window_counter(key)` | `bool` |
//! | Distributed Sliding Window | `distributed_sliding_window(key, node_id)` | `bool` |
//!
//! # Feature Flags
//!
//! - `memory` (default): In-memory storage
//! - `redis`: Redis storage backend
//! - `full`: Both backends

pub mod algorithm;
pub mod clock;
pub mod config;
pub mod decision;
pub mod error;
pub mod limiter;
pub mod script;
pub mod storage;

// Re-export main types
pub use algorithm::Algorithm;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RateLimitConfig, RateLimitConfigBuilder};
pub use decision::Decision;
pub use error::{ConfigError, ConnectionError, RateLimitError, Result, StorageError};
pub use limiter::RateLimiter;
pub use script::{Invocation, Script, ScriptArg, ScriptInput};
pub use storage::{ScoreRange, Storage, StoreOps};

// Re-export algorithms
pub use algorithm::{
    DistributedSlidingWindow, FixedWindow, LeakyBucket, SlidingWindowCounter, SlidingWindowLog,
    TokenBucket,
};

// Re-export storage types
#[cfg(feature = "memory")]
pub use storage::{GcConfig, GcInterval, MemoryStorage};

#[cfg(feature = "redis")]
pub use storage::{RedisConfig, RedisStorage};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::algorithm::Algorithm;
    pub use crate::config::RateLimitConfig;
    pub use crate::decision::Decision;
    pub use crate::error::{RateLimitError, Result};
    pub use crate::limiter::RateLimiter;
    pub use crate::storage::Storage;

    pub use crate::algorithm::{
        DistributedSlidingWindow, FixedWindow, LeakyBucket, SlidingWindowCounter,
        SlidingWindowLog, TokenBucket,
    };

    #[cfg(feature = "memory")]
    pub use crate::storage::MemoryStorage;

    #[cfg(feature = "redis")]
    pub use crate::storage::{RedisConfig, RedisStorage};
}
