//! Leaky Bucket rate limiting algorithm.
//!
//! Requests join a queue of depth `max_requests` that drains at a constant
//! `max_requests` per second. A request is admitted only while the queue has
//! room, so admissions never burst past the drain rate.

use crate::algorithm::{Algorithm, NANOS_PER_SEC, parse_stored, reset_after};
use crate::config::{RateLimitConfig, ceil_secs};
use crate::decision::Decision;
use crate::error::Result;
use crate::script::{Invocation, Script, ScriptInput};
use crate::storage::StoreOps;

/// Leaky Bucket rate limiting algorithm.
///
/// Capacity is both the queue depth and the leak rate per second.
#[derive(Debug, Clone, Default)]
pub struct LeakyBucket;

impl LeakyBucket {
    /// Create a new Leaky Bucket algorithm instance.
    pub fn new() -> Self {
        Self
    }
}

impl Algorithm for LeakyBucket {
    fn name(&self) -> &'static str {
        "leaky_bucket"
    }

    fn prefix(&self) -> &'static str {
        "lb:"
    }

    fn invocation(&self, key: &str, now: i64, config: &RateLimitConfig) -> Invocation {
        let capacity = config.max_requests() as f64;
        let rate = capacity;

        Invocation::new(&SCRIPT)
            .key(self.store_key(key))
            .arg(now)
            .arg(rate)
            .arg(config.capacity_i64())
            .arg(ceil_secs(capacity / rate))
    }
}

/// Stored queue state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueState {
    /// Queue depth after the last admitted request.
    pub queue: i64,
    /// Epoch nanoseconds of the last admitted request.
    pub last_leak: i64,
}

/// Drain the queue up to `now` and try to enqueue one request.
pub fn evaluate(
    now: i64,
    capacity: i64,
    rate: f64,
    state: Option<QueueState>,
) -> (Decision, Option<QueueState>) {
    let QueueState { queue: stored, last_leak } = state.unwrap_or(QueueState {
        queue: 0,
        last_leak: now,
    });

    let elapsed = now.saturating_sub(last_leak).max(0) as f64;
    let leaked = (elapsed * rate / NANOS_PER_SEC).floor() as i64;
    let queue = stored.saturating_sub(leaked).max(0);
    let total = capacity as u64;

    if queue < capacity {
        let depth = queue + 1;
        let drained_at = reset_after(now, depth as f64 / rate * NANOS_PER_SEC);
        let next = QueueState {
            queue: depth,
            last_leak: now,
        };
        (Decision::allowed(total, (capacity - depth) as u64, drained_at), Some(next))
    } else {
        // Rounded up so the hint lands on an instant where one more has leaked.
        let wait = ((stored - capacity + 1) as f64 * NANOS_PER_SEC / rate).ceil();
        (Decision::denied(total, 0, reset_after(last_leak, wait)), None)
    }
}

const LUA: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local capacity = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

local state = redis.call('HMGET', key, 'queue', 'last_leak')
local stored = tonumber(state[1]) or 0
local last_leak = tonumber(state[2]) or now

local elapsed = math.max(0, now - last_leak)
local leaked = math.floor(elapsed * rate / 1e9)
local queue = math.max(0, stored - leaked)

if queue < capacity then
    local depth = queue + 1
    redis.call('HSET', key, 'queue', depth, 'last_leak', ARGV[1])
    redis.call('EXPIRE', key, ttl)
    return {1, capacity, capacity - depth, math.min(now + math.floor(depth / rate * 1e9), 9.2e18)}
end
local wait = math.ceil((stored - capacity + 1) * 1e9 / rate)
return {0, capacity, 0, math.min(last_leak + wait, 9.2e18)}
"#;

pub(crate) static SCRIPT: Script = Script::new("leaky_bucket", LUA, run);

fn run(store: &mut dyn StoreOps, input: &ScriptInput<'_>) -> Result<Vec<i64>> {
    let key = input.key(0)?;
    let now = input.int(0)?;
    let rate = input.float(1)?;
    let capacity = input.int(2)?;
    let ttl = input.int(3)?.max(1) as u64;

    let mut stored = store.hmget(key, &["queue", "last_leak"])?.into_iter();
    let queue: Option<i64> = parse_stored(stored.next().flatten());
    let last_leak: Option<i64> = parse_stored(stored.next().flatten());

    let state = match (queue, last_leak) {
        (None, None) => None,
        (queue, last_leak) => Some(QueueState {
            queue: queue.unwrap_or(0),
            last_leak: last_leak.unwrap_or(now),
        }),
    };

    let (decision, next) = evaluate(now, capacity, rate, state);
    if let Some(next) = next {
        store.hset(
            key,
            &[
                ("queue", next.queue.to_string()),
                ("last_leak", next.last_leak.to_string()),
            ],
        )?;
        store.expire(key, ttl)?;
    }

    Ok(decision.into_reply())
}
