//! Store client contract and implementations.
//!
//! The engine needs one capability from a store: run a [`Script`] against an
//! ordered list of keys and arguments as a single atomic unit and return a
//! list of integers. Inside that unit a script uses the primitives described
//! by [`StoreOps`]: hashes, sorted sets, string counters, sets and per-key
//! expiry.
//!
//! Two backends ship with the crate:
//!
//! - `MemoryStorage` (`memory` feature): in-process state behind one lock,
//!   evaluating the native script bodies. Used by tests and single-process
//!   deployments.
//! - `RedisStorage` (`redis` feature): any Redis-compatible server, evaluating
//!   the Lua bodies with `EVALSHA`.

#[cfg(feature = "memory")]
mod memory;
#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "memory")]
pub use memory::{GcConfig, GcInterval, MemoryStorage};

// RedisStorage with connection pooling
#[cfg(feature = "redis")]
pub use self::redis::{RedisConfig, RedisStorage};

use std::future::Future;
use std::ops::Bound;

use crate::error::Result;
use crate::script::{Script, ScriptArg};

/// Store backend trait for rate limiting state.
///
/// Implementations must evaluate the whole script without interleaving any
/// other operation on the keys it touches, and must return store failures
/// as errors rather than partially applied results.
///
/// # Example
///
/// ```ignore
/// use skp_distlimit::storage::{MemoryStorage, Storage};
///
/// async fn example<S: Storage>(storage: &S, invocation: &Invocation) {
///     let reply = storage
///         .eval(invocation.script(), invocation.keys(), invocation.args())
///         .await?;
///     println!("allowed: {}", reply[0] == 1);
/// }
/// ```
pub trait Storage: Send + Sync + 'static {
    /// Evaluate `script` atomically with the given keys and arguments.
    fn eval(
        &self,
        script: &'static Script,
        keys: &[String],
        args: &[ScriptArg],
    ) -> impl Future<Output = Result<Vec<i64>>> + Send;
}

impl<S: Storage + ?Sized> Storage for std::sync::Arc<S> {
    async fn eval(&self, script: &'static Script, keys: &[String], args: &[ScriptArg]) -> Result<Vec<i64>> {
        (**self).eval(script, keys, args).await
    }
}

impl<S: Storage + ?Sized> Storage for Box<S> {
    async fn eval(&self, script: &'static Script, keys: &[String], args: &[ScriptArg]) -> Result<Vec<i64>> {
        (**self).eval(script, keys, args).await
    }
}

/// Store primitives available to a native script body.
///
/// Semantics follow Redis: missing keys read as empty, an operation on a key
/// of another type fails with `WrongType`, a sorted set emptied by a removal
/// disappears, and writes to an existing key keep its expiry.
pub trait StoreOps {
    /// Read several hash fields.
    fn hmget(&mut self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>>;

    /// Write several hash fields.
    fn hset(&mut self, key: &str, fields: &[(&str, String)]) -> Result<()>;

    /// Read a string value.
    fn get(&mut self, key: &str) -> Result<Option<String>>;

    /// Increment an integer counter, creating it at zero. Returns the new value.
    fn incr(&mut self, key: &str) -> Result<i64>;

    /// Add or re-score a sorted set member. Returns `true` if it was new.
    fn zadd(&mut self, key: &str, score: f64, member: &str) -> Result<bool>;

    /// Remove sorted set members whose score lies in `range`. Returns the number removed.
    fn zremrangebyscore(&mut self, key: &str, range: ScoreRange) -> Result<u64>;

    /// Number of members of a sorted set.
    fn zcard(&mut self, key: &str) -> Result<u64>;

    /// Number of sorted set members whose score lies in `range`.
    fn zcount(&mut self, key: &str, range: ScoreRange) -> Result<u64>;

    /// Lowest score of a sorted set.
    fn zfirst_score(&mut self, key: &str) -> Result<Option<f64>>;

    /// Add a set member. Returns `true` if it was new.
    fn sadd(&mut self, key: &str, member: &str) -> Result<bool>;

    /// Remove a set member. Returns `true` if it was present.
    fn srem(&mut self, key: &str, member: &str) -> Result<bool>;

    /// All members of a set.
    fn smembers(&mut self, key: &str) -> Result<Vec<String>>;

    /// Whether a key exists.
    fn exists(&mut self, key: &str) -> Result<bool>;

    /// Set a key's time to live. Returns `false` if the key does not exist.
    fn expire(&mut self, key: &str, seconds: u64) -> Result<bool>;
}

/// An interval of sorted set scores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreRange {
    /// Lower bound.
    pub min: Bound<f64>,
    /// Upper bound.
    pub max: Bound<f64>,
}

impl ScoreRange {
    /// Scores `<= max`.
    pub fn up_to(max: f64) -> Self {
        Self {
            min: Bound::Unbounded,
            max: Bound::Included(max),
        }
    }

    /// Scores `> min`.
    pub fn above(min: f64) -> Self {
        Self {
            min: Bound::Excluded(min),
            max: Bound::Unbounded,
        }
    }

    /// Check whether `score` lies in the range.
    pub fn contains(&self, score: f64) -> bool {
        let above_min = match self.min {
            Bound::Included(min) => score >= min,
            Bound::Excluded(min) => score > min,
            Bound::Unbounded => true,
        };
        let below_max = match self.max {
            Bound::Included(max) => score <= max,
            Bound::Excluded(max) => score < max,
            Bound::Unbounded => true,
        };
        above_min && below_max
    }
}
