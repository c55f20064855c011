//! Sliding Window Counter rate limiting algorithm.
//!
//! A hybrid of the fixed window counter and the sliding log. Two fixed
//! window counters are kept, the current one and the previous one, and the
//! sliding count is estimated by weighting the previous window by the share
//! of it that still overlaps the sliding window:
//!
//! ```text
//! weight   = (now - current_start) / window
//! estimate = previous * (1 - weight) + current
//! ```
//!
//! O(1) memory per key, with an error bounded by the previous window's count.

use crate::algorithm::{Algorithm, parse_stored, window_start};
use crate::config::RateLimitConfig;
use crate::decision::Decision;
use crate::error::Result;
use crate::script::{Invocation, Script, ScriptInput};
use crate::storage::StoreOps;

/// Sliding Window Counter rate limiting algorithm.
#[derive(Debug, Clone, Default)]
pub struct SlidingWindowCounter;

impl SlidingWindowCounter {
    /// Create a new Sliding Window Counter algorithm instance.
    pub fn new() -> Self {
        Self
    }
}

impl Algorithm for SlidingWindowCounter {
    fn name(&self) -> &'static str {
        "sliding_window_counter"
    }

    fn prefix(&self) -> &'static str {
        "swc:"
    }

    fn invocation(&self, key: &str, now: i64, config: &RateLimitConfig) -> Invocation {
        let window = config.window_nanos();
        let current = window_start(now, window);

        // The current counter must outlive its window to be read as previous.
        Invocation::new(&SCRIPT)
            .key(self.store_key(key))
            .arg(now)
            .arg(current)
            .arg(current - window)
            .arg(window)
            .arg(config.capacity_i64())
            .arg(config.window_ttl_secs().saturating_mul(2))
    }
}

/// Counts of the current and previous fixed windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DualWindowCounter {
    /// Requests admitted in the current window.
    pub current: i64,
    /// Requests admitted in the previous window.
    pub previous: i64,
}

impl DualWindowCounter {
    /// Weighted estimate of the sliding count at `weight` through the current window.
    pub fn estimate(&self, weight: f64) -> f64 {
        self.previous as f64 * (1.0 - weight) + self.current as f64
    }
}

/// Decide on one request. An allowed decision means the current counter is
/// to be incremented.
pub fn evaluate(
    now: i64,
    current_start: i64,
    window: i64,
    max_requests: i64,
    counts: DualWindowCounter,
) -> Decision {
    let total = max_requests as u64;
    let window_f = window as f64;
    let weight = (now - current_start) as f64 / window_f;
    let estimate = counts.estimate(weight);
    let max_f = max_requests as f64;

    if estimate < max_f {
        let remaining = (max_f - estimate - 1.0).floor().max(0.0) as u64;
        return Decision::allowed(total, remaining, current_start + window);
    }

    // First nanosecond strictly past the weight at which the decayed previous
    // count leaves room for one.
    let reset_at = if counts.previous > 0 && counts.current < max_requests {
        let free = (max_requests - counts.current) as f64 / counts.previous as f64;
        current_start + ((1.0 - free) * window_f).floor() as i64 + 1
    } else {
        current_start + window
    };
    Decision::denied(total, 0, reset_at)
}

const LUA: &str = r#"
local current_key = KEYS[1] .. ':' .. ARGV[2]
local previous_key = KEYS[1] .. ':' .. ARGV[3]
local now = tonumber(ARGV[1])
local current_start = tonumber(ARGV[2])
local window = tonumber(ARGV[4])
local max_requests = tonumber(ARGV[5])
local ttl = tonumber(ARGV[6])

local current = tonumber(redis.call('GET', current_key)) or 0
local previous = tonumber(redis.call('GET', previous_key)) or 0

local weight = (now - current_start) / window
local estimate = previous * (1 - weight) + current

if estimate < max_requests then
    redis.call('INCR', current_key)
    redis.call('EXPIRE', current_key, ttl)
    local remaining = math.max(0, math.floor(max_requests - estimate - 1))
    return {1, max_requests, remaining, current_start + window}
end

local reset_at = current_start + window
if previous > 0 and current < max_requests then
    local free = (max_requests - current) / previous
    reset_at = current_start + math.floor((1 - free) * window) + 1
end
return {0, max_requests, 0, reset_at}
"#;

pub(crate) static SCRIPT: Script = Script::new("sliding_window_counter", LUA, run);

fn run(store: &mut dyn StoreOps, input: &ScriptInput<'_>) -> Result<Vec<i64>> {
    let key = input.key(0)?;
    let now = input.int(0)?;
    let current_start = input.int(1)?;
    let previous_start = input.int(2)?;
    let window = input.int(3)?;
    let max_requests = input.int(4)?;
    let ttl = input.int(5)?.max(1) as u64;

    let current_key = format!("{key}:{current_start}");
    let previous_key = format!("{key}:{previous_start}");
    let counts = DualWindowCounter {
        current: parse_stored(store.get(&current_key)?).unwrap_or(0),
        previous: parse_stored(store.get(&previous_key)?).unwrap_or(0),
    };

    let decision = evaluate(now, current_start, window, max_requests, counts);
    if decision.is_allowed() {
        store.incr(&current_key)?;
        store.expire(&current_key, ttl)?;
    }

    Ok(decision.into_reply())
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::clock::ManualClock;
    use crate::limiter::RateLimiter;
    use crate::storage::MemoryStorage;

    const T0: i64 = 1_700_000_000_000_000_000;
    const SEC: i64 = 1_000_000_000;

    #[test]
    fn test_estimate() {
        let counts = DualWindowCounter { current: 2, previous: 10 };
        assert_eq!(counts.estimate(0.0), 12.0);
        assert_eq!(counts.estimate(0.5), 7.0);
        assert_eq!(counts.estimate(1.0), 2.0);
    }

    #[test]
    fn test_evaluate_weights_previous_window() {
        let counts = DualWindowCounter { current: 4, previous: 10 };
        let decision = evaluate(T0 + SEC / 2, T0, SEC, 10, counts);
        assert!(decision.is_allowed());
        assert_eq!(decision.remaining(), 0);
        assert_eq!(decision.reset_at_nanos(), T0 + SEC);

        let counts = DualWindowCounter { current: 5, previous: 10 };
        let decision = evaluate(T0 + SEC / 2, T0, SEC, 10, counts);
        assert!(decision.is_denied());
    }

    #[test]
    fn test_evaluate_denied_reset_hint() {
        // 10 * (1 - w) + 5 < 10 once w > 0.5.
        let counts = DualWindowCounter { current: 5, previous: 10 };
        let decision = evaluate(T0 + SEC / 5, T0, SEC, 10, counts);
        assert!(decision.is_denied());
        let hint = decision.reset_at_nanos();
        assert_eq!(hint, T0 + SEC / 2 + 1);

        assert!(evaluate(hint - 1, T0, SEC, 10, counts).is_denied());
        assert!(evaluate(hint, T0, SEC, 10, counts).is_allowed());

        // Current window alone is full: nothing before the window ends.
        let counts = DualWindowCounter { current: 10, previous: 0 };
        let decision = evaluate(T0 + SEC / 5, T0, SEC, 10, counts);
        assert_eq!(decision.reset_at_nanos(), T0 + SEC);
    }

    #[tokio::test]
    async fn test_sliding_window_counter_interpolates() {
        let clock = ManualClock::new(T0);
        let storage = MemoryStorage::with_clock(clock.clone());
        let limiter = RateLimiter::new(RateLimitConfig::per_second(10), storage).with_clock(clock.clone());

        for _ in 0..10 {
            assert!(limiter.sliding_window_counter("user:1").await);
        }
        assert!(!limiter.sliding_window_counter("user:1").await);

        // Halfway into the next window half of the previous count still weighs in.
        clock.advance(Duration::from_millis(1500));
        let mut allowed = 0;
        for _ in 0..10 {
            if limiter.sliding_window_counter("user:1").await {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5);

        let current = format!("swc:user:1:{}", T0 + SEC);
        assert_eq!(limiter.storage().ttl(&current), Some(Duration::from_secs(2)));
    }
}
