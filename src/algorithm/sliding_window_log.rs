//! Sliding Window Log rate limiting algorithm.
//!
//! Records the timestamp of every admitted request in a sorted set and counts
//! those newer than `now - window`. This is exact: no window of length
//! `window` ever holds more than `max_requests` admissions, wherever it is
//! placed.
//!
//! Memory grows with the number of requests admitted per window.

use crate::algorithm::Algorithm;
use crate::config::RateLimitConfig;
use crate::decision::Decision;
use crate::error::Result;
use crate::script::{Invocation, Script, ScriptInput, event_member};
use crate::storage::{ScoreRange, StoreOps};

/// Sliding Window Log rate limiting algorithm.
#[derive(Debug, Clone, Default)]
pub struct SlidingWindowLog;

impl SlidingWindowLog {
    /// Create a new Sliding Window Log algorithm instance.
    pub fn new() -> Self {
        Self
    }
}

impl Algorithm for SlidingWindowLog {
    fn name(&self) -> &'static str {
        "sliding_window_log"
    }

    fn prefix(&self) -> &'static str {
        "sw:"
    }

    fn invocation(&self, key: &str, now: i64, config: &RateLimitConfig) -> Invocation {
        Invocation::new(&SCRIPT)
            .key(self.store_key(key))
            .arg(now)
            .arg(config.window_nanos())
            .arg(config.capacity_i64())
            .arg(config.window_ttl_secs())
            .arg(event_member(now))
            .arg(now.saturating_sub(config.window_nanos()))
    }
}

/// Decide on one request given the entries left after pruning.
///
/// `live` is the number of entries in `(now - window, now]` and `oldest` the
/// earliest of them. An allowed decision means `now` is to be recorded.
pub fn evaluate(now: i64, window: i64, max_requests: i64, live: u64, oldest: Option<i64>) -> Decision {
    let total = max_requests as u64;
    let reset_at = oldest.unwrap_or(now) + window;

    if live < total {
        Decision::allowed(total, total - live - 1, reset_at)
    } else {
        Decision::denied(total, 0, reset_at)
    }
}

const LUA: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local max_requests = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])
local member = ARGV[5]

redis.call('ZREMRANGEBYSCORE', key, '-inf', ARGV[6])
local live = redis.call('ZCARD', key)
local first = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local reset_at = (tonumber(first[2]) or now) + window

if live < max_requests then
    redis.call('ZADD', key, ARGV[1], member)
    redis.call('EXPIRE', key, ttl)
    return {1, max_requests, max_requests - live - 1, reset_at}
end
return {0, max_requests, 0, reset_at}
"#;

pub(crate) static SCRIPT: Script = Script::new("sliding_window_log", LUA, run);

fn run(store: &mut dyn StoreOps, input: &ScriptInput<'_>) -> Result<Vec<i64>> {
    let key = input.key(0)?;
    let now = input.int(0)?;
    let window = input.int(1)?;
    let max_requests = input.int(2)?;
    let ttl = input.int(3)?.max(1) as u64;
    let member = input.text(4)?;
    let cutoff = input.int(5)?;

    store.zremrangebyscore(key, ScoreRange::up_to(cutoff as f64))?;
    let live = store.zcard(key)?;
    let oldest = store.zfirst_score(key)?.map(|score| score as i64);

    let decision = evaluate(now, window, max_requests, live, oldest);
    if decision.is_allowed() {
        store.zadd(key, now as f64, &member)?;
        store.expire(key, ttl)?;
    }

    Ok(decision.into_reply())
}
