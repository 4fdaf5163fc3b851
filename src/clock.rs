//! Time sources for deadline and window arithmetic.
//!
//! The breaker never spawns a timer thread; all time advances lazily through
//! reads of an injected [`Clock`] on the caller's own thread.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

/// A monotonic, non-decreasing time source with nanosecond resolution.
///
/// Implementations must be safe to read from many threads at once and must
/// never report a value smaller than one previously observed on any thread.
pub trait Clock: Send + Sync {
    /// Current time in nanoseconds. The origin is arbitrary; only
    /// differences are meaningful.
    fn now_nanos(&self) -> i64;
}

/// Production clock anchored on [`Instant`] at construction.
///
/// Anchoring on `Instant` keeps the breaker immune to wall-clock steps from
/// NTP adjustments.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_nanos(&self) -> i64 {
        i64::try_from(self.start.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }
}

/// Manually advanced clock for tests.
///
/// Starts at zero and only moves when [`advance`](ManualClock::advance) is
/// called, which makes deadline-driven scenarios deterministic.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicI64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        let delta = i64::try_from(delta.as_nanos()).unwrap_or(i64::MAX);
        self.nanos.fetch_add(delta, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now_nanos(&self) -> i64 {
        self.nanos.load(Ordering::Acquire)
    }
}

pub(crate) fn duration_to_nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_clock_never_decreases() {
        let clock = MonotonicClock::new();

        let t1 = clock.now_nanos();
        std::thread::sleep(Duration::from_millis(5));
        let t2 = clock.now_nanos();

        assert!(t2 > t1);
    }

    #[test]
    fn test_manual_clock_starts_at_zero() {
        let clock = ManualClock::new();
        assert_eq!(clock.now_nanos(), 0);
    }

    #[test]
    fn test_manual_clock_advances_exactly() {
        let clock = ManualClock::new();

        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.now_nanos(), 1_000_000_000);

        clock.advance(Duration::from_nanos(1));
        assert_eq!(clock.now_nanos(), 1_000_000_001);
    }
}
