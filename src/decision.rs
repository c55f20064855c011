//! Decision types for rate limiting results.
//!
//! Every algorithm script replies with the same four integers:
//! `[allowed, total, remaining, reset_at]`. A [`Decision`] is the decoded
//! form of that reply and is never mutated after construction.

use std::time::{Duration, SystemTime};

use crate::clock::nanos_to_system_time;
use crate::error::{Result, StorageError};

/// Number of integers in a script reply.
pub(crate) const REPLY_LEN: usize = 4;

/// The result of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    allowed: bool,
    total: u64,
    remaining: u64,
    /// Epoch nanoseconds at which the limiter is expected to admit again.
    reset_at: i64,
}

impl Decision {
    /// Create a new "allowed" decision.
    pub fn allowed(total: u64, remaining: u64, reset_at_nanos: i64) -> Self {
        Self {
            allowed: true,
            total,
            remaining,
            reset_at: reset_at_nanos,
        }
    }

    /// Create a new "denied" decision.
    pub fn denied(total: u64, remaining: u64, reset_at_nanos: i64) -> Self {
        Self {
            allowed: false,
            total,
            remaining,
            reset_at: reset_at_nanos,
        }
    }

    /// Check if the request is allowed.
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// Check if the request is denied.
    pub fn is_denied(&self) -> bool {
        !self.allowed
    }

    /// Capacity echoed back by the algorithm.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Estimated remaining allowance.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Reset instant as epoch nanoseconds.
    pub fn reset_at_nanos(&self) -> i64 {
        self.reset_at
    }

    /// Earliest wall-clock instant the limiter is expected to allow again.
    pub fn reset_at(&self) -> SystemTime {
        nanos_to_system_time(self.reset_at)
    }

    /// How long to wait from `now_nanos` until the reset instant.
    ///
    /// Returns `None` when the reset instant is not in the future.
    pub fn retry_after(&self, now_nanos: i64) -> Option<Duration> {
        let wait = self.reset_at.checked_sub(now_nanos)?;
        (wait > 0).then(|| Duration::from_nanos(wait as u64))
    }

    /// Decode a script reply.
    pub(crate) fn from_reply(reply: &[i64]) -> Result<Self> {
        let [allowed, total, remaining, reset_at] = <[i64; REPLY_LEN]>::try_from(reply)
            .map_err(|_| {
                StorageError::MalformedReply(format!(
                    "expected {REPLY_LEN} integers, got {}",
                    reply.len()
                ))
            })?;

        let allowed = match allowed {
            0 => false,
            1 => true,
            other => {
                return Err(StorageError::MalformedReply(format!(
                    "allowed flag must be 0 or 1, got {other}"
                ))
                .into());
            }
        };

        Ok(Self {
            allowed,
            total: u64::try_from(total).unwrap_or(0),
            remaining: u64::try_from(remaining).unwrap_or(0),
            reset_at,
        })
    }

    /// Encode as a script reply.
    pub(crate) fn into_reply(self) -> Vec<i64> {
        vec![
            i64::from(self.allowed),
            i64::try_from(self.total).unwrap_or(i64::MAX),
            i64::try_from(self.remaining).unwrap_or(i64::MAX),
            self.reset_at,
        ]
    }
}
