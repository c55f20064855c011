//! Time sources.
//!
//! Every algorithm works on wall-clock nanoseconds since the Unix epoch.
//! Production code uses [`SystemClock`]; tests share a [`ManualClock`]
//! between the limiter and the in-memory store so simulated time drives both
//! admission decisions and key expiry.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of wall-clock timestamps in nanoseconds since the Unix epoch.
pub trait Clock: Send + Sync + 'static {
    /// Current time in nanoseconds since the Unix epoch.
    fn now_nanos(&self) -> i64;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_nanos(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same underlying time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicI64>,
}

impl ManualClock {
    /// Create a clock frozen at `nanos`.
    pub fn new(nanos: i64) -> Self {
        Self {
            nanos: Arc::new(AtomicI64::new(nanos)),
        }
    }

    /// Move the clock to an absolute timestamp.
    pub fn set(&self, nanos: i64) {
        self.nanos.store(nanos, Ordering::SeqCst);
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let delta = i64::try_from(by.as_nanos()).unwrap_or(i64::MAX);
        self.nanos.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_nanos(&self) -> i64 {
        self.nanos.load(Ordering::SeqCst)
    }
}

/// Convert epoch nanoseconds to a [`SystemTime`].
pub(crate) fn nanos_to_system_time(nanos: i64) -> SystemTime {
    if nanos >= 0 {
        UNIX_EPOCH + Duration::from_nanos(nanos as u64)
    } else {
        UNIX_EPOCH - Duration::from_nanos(nanos.unsigned_abs())
    }
}
