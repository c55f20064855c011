//! Token Bucket rate limiting algorithm.
//!
//! A bucket holds up to `max_requests` tokens and refills continuously at
//! `refill_rate` tokens per second. Each admitted request takes one token.
//! Bursts up to the bucket capacity pass immediately; sustained throughput
//! converges to the refill rate.
//!
//! Stored state is a hash at `tb:<key>` with fields `tokens` and
//! `last_refill`. Denials leave the state untouched.

use crate::algorithm::{Algorithm, NANOS_PER_SEC, parse_stored, reset_after};
use crate::config::{RateLimitConfig, ceil_secs};
use crate::decision::Decision;
use crate::error::Result;
use crate::script::{Invocation, Script, ScriptInput};
use crate::storage::StoreOps;

/// Token Bucket rate limiting algorithm.
///
/// Allows controlled bursts while enforcing an average rate limit.
#[derive(Debug, Clone, Default)]
pub struct TokenBucket;

impl TokenBucket {
    /// Create a new Token Bucket algorithm instance.
    pub fn new() -> Self {
        Self
    }
}

impl Algorithm for TokenBucket {
    fn name(&self) -> &'static str {
        "token_bucket"
    }

    fn prefix(&self) -> &'static str {
        "tb:"
    }

    fn invocation(&self, key: &str, now: i64, config: &RateLimitConfig) -> Invocation {
        let rate = config.refill_rate();
        let ttl = ceil_secs(config.max_requests() as f64 / rate);

        Invocation::new(&SCRIPT)
            .key(self.store_key(key))
            .arg(now)
            .arg(rate)
            .arg(config.capacity_i64())
            .arg(ttl)
    }
}

/// Stored bucket state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    /// Tokens left after the last admitted request.
    pub tokens: f64,
    /// Epoch nanoseconds of the last admitted request.
    pub last_refill: i64,
}

/// Refill the bucket up to `now` and try to take one token.
///
/// A missing bucket starts full. Returns the decision and, when a token was
/// taken, the state to persist.
pub fn evaluate(
    now: i64,
    capacity: i64,
    rate: f64,
    state: Option<BucketState>,
) -> (Decision, Option<BucketState>) {
    let capacity_f = capacity as f64;
    let BucketState { tokens, last_refill } = state.unwrap_or(BucketState {
        tokens: capacity_f,
        last_refill: now,
    });

    // Clock skew between hosts can put last_refill in the future.
    let elapsed = now.saturating_sub(last_refill).max(0) as f64;
    let available = capacity_f.min(tokens + elapsed * rate / NANOS_PER_SEC);
    let reset_at = reset_after(now, (capacity_f - available) / rate * NANOS_PER_SEC);
    let total = capacity as u64;

    if available >= 1.0 {
        let remaining = available - 1.0;
        let next = BucketState {
            tokens: remaining,
            last_refill: now,
        };
        (Decision::allowed(total, remaining.floor() as u64, reset_at), Some(next))
    } else {
        (Decision::denied(total, available.floor() as u64, reset_at), None)
    }
}

const LUA: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local capacity = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

local state = redis.call('HMGET', key, 'tokens', 'last_refill')
local tokens = tonumber(state[1]) or capacity
local last_refill = tonumber(state[2]) or now

local elapsed = math.max(0, now - last_refill)
local available = math.min(capacity, tokens + (elapsed * rate / 1e9))
local reset_at = math.min(now + math.floor((capacity - available) / rate * 1e9), 9.2e18)

if available >= 1 then
    local remaining = available - 1
    redis.call('HSET', key, 'tokens', remaining, 'last_refill', ARGV[1])
    redis.call('EXPIRE', key, ttl)
    return {1, capacity, math.floor(remaining), reset_at}
end
return {0, capacity, math.floor(available), reset_at}
"#;

pub(crate) static SCRIPT: Script = Script::new("token_bucket", LUA, run);

fn run(store: &mut dyn StoreOps, input: &ScriptInput<'_>) -> Result<Vec<i64>> {
    let key = input.key(0)?;
    let now = input.int(0)?;
    let rate = input.float(1)?;
    let capacity = input.int(2)?;
    let ttl = input.int(3)?.max(1) as u64;

    let mut stored = store.hmget(key, &["tokens", "last_refill"])?.into_iter();
    let tokens: Option<f64> = parse_stored(stored.next().flatten());
    let last_refill: Option<i64> = parse_stored(stored.next().flatten());

    let state = match (tokens, last_refill) {
        (None, None) => None,
        (tokens, last_refill) => Some(BucketState {
            tokens: tokens.unwrap_or(capacity as f64),
            last_refill: last_refill.unwrap_or(now),
        }),
    };

    let (decision, next) = evaluate(now, capacity, rate, state);
    if let Some(next) = next {
        store.hset(
            key,
            &[
                ("tokens", next.tokens.to_string()),
                ("last_refill", next.last_refill.to_string()),
            ],
        )?;
        store.expire(key, ttl)?;
    }

    Ok(decision.into_reply())
}
