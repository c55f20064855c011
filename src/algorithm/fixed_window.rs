//! Fixed Window Counter rate limiting algorithm.
//!
//! Time is cut into windows aligned to multiples of `window` since the epoch.
//! Each window has its own counter at `fw:<key>:<window_start>`, which expires
//! on its own once the window is over.
//!
//! Cheap, but a client can get up to twice the limit through by bursting at
//! the end of one window and the start of the next.

use crate::algorithm::{Algorithm, parse_stored, window_start};
use crate::config::RateLimitConfig;
use crate::decision::Decision;
use crate::error::Result;
use crate::script::{Invocation, Script, ScriptInput};
use crate::storage::StoreOps;

/// Fixed Window Counter rate limiting algorithm.
#[derive(Debug, Clone, Default)]
pub struct FixedWindow;

impl FixedWindow {
    /// Create a new Fixed Window algorithm instance.
    pub fn new() -> Self {
        Self
    }
}

impl Algorithm for FixedWindow {
    fn name(&self) -> &'static str {
        "fixed_window"
    }

    fn prefix(&self) -> &'static str {
        "fw:"
    }

    fn invocation(&self, key: &str, now: i64, config: &RateLimitConfig) -> Invocation {
        let window = config.window_nanos();

        Invocation::new(&SCRIPT)
            .key(self.store_key(key))
            .arg(window_start(now, window))
            .arg(config.capacity_i64())
            .arg(config.window_ttl_secs())
            .arg(window)
    }
}

/// Decide on one request given the count already admitted in the window
/// starting at `start`.
pub fn evaluate(start: i64, window: i64, max_requests: i64, count: i64) -> Decision {
    let total = max_requests as u64;
    let reset_at = start + window;

    if count < max_requests {
        Decision::allowed(total, (max_requests - count - 1) as u64, reset_at)
    } else {
        Decision::denied(total, 0, reset_at)
    }
}

const LUA: &str = r#"
local key = KEYS[1] .. ':' .. ARGV[1]
local window_start = tonumber(ARGV[1])
local max_requests = tonumber(ARGV[2])
local ttl = tonumber(ARGV[3])
local window = tonumber(ARGV[4])

local count = tonumber(redis.call('GET', key)) or 0
local reset_at = window_start + window

if count < max_requests then
    redis.call('INCR', key)
    redis.call('EXPIRE', key, ttl)
    return {1, max_requests, max_requests - count - 1, reset_at}
end
return {0, max_requests, 0, reset_at}
"#;

pub(crate) static SCRIPT: Script = Script::new("fixed_window", LUA, run);

fn run(store: &mut dyn StoreOps, input: &ScriptInput<'_>) -> Result<Vec<i64>> {
    let start = input.int(0)?;
    let key = format!("{}:{}", input.key(0)?, start);
    let max_requests = input.int(1)?;
    let ttl = input.int(2)?.max(1) as u64;
    let window = input.int(3)?;

    let count: i64 = parse_stored(store.get(&key)?).unwrap_or(0);

    let decision = evaluate(start, window, max_requests, count);
    if decision.is_allowed() {
        store.incr(&key)?;
        store.expire(&key, ttl)?;
    }

    Ok(decision.into_reply())
}
