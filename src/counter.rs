//! Event accounting over a rolling time window.
//!
//! This module provides the counters a breaker state carries:
//! - [`SlidingWindowCounter`]: thread-safe windowed accumulator used while
//!   the circuit is closed
//! - [`NoOpCounter`]: zero-cost counter used while the circuit is tripped
//!
//! The sliding window is one live bucket plus an immutable archive of sealed
//! buckets. Increments are atomic adds on the live bucket; every
//! `update_interval` of clock advance the bucket is sealed and the whole
//! window is replaced through a CAS, so readers observe either the
//! pre-rotation or the post-rotation window, never a mix.

use crate::clock::{duration_to_nanos, Clock};
use arc_swap::ArcSwap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Kind of outcome recorded against a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventKind {
    Success,
    Failure,
}

/// Immutable snapshot of success and failure counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventCount {
    success: u64,
    failure: u64,
}

impl EventCount {
    /// The empty count.
    pub const ZERO: EventCount = EventCount {
        success: 0,
        failure: 0,
    };

    pub fn new(success: u64, failure: u64) -> Self {
        Self { success, failure }
    }

    pub fn success(&self) -> u64 {
        self.success
    }

    pub fn failure(&self) -> u64 {
        self.failure
    }

    pub fn total(&self) -> u64 {
        self.success.saturating_add(self.failure)
    }

    /// Fraction of recorded outcomes that were failures, `0.0` when nothing
    /// has been recorded.
    pub fn failure_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.failure as f64 / total as f64
        }
    }

    pub(crate) fn saturating_add(self, other: EventCount) -> EventCount {
        EventCount {
            success: self.success.saturating_add(other.success),
            failure: self.failure.saturating_add(other.failure),
        }
    }
}

impl fmt::Display for EventCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fail:{} total:{}", self.failure, self.total())
    }
}

/// Accumulator for request outcomes, snapshotted as [`EventCount`]s.
///
/// Implementations must tolerate arbitrary concurrent callers. `count()`
/// returns success and failure figures drawn from the same logical window.
pub trait EventCounter: Send + Sync {
    /// Record one success in the current window.
    fn on_success(&self);

    /// Record one failure in the current window.
    fn on_failure(&self);

    /// Snapshot of the aggregated counts over the window ending now.
    fn count(&self) -> EventCount;
}

/// A sealed bucket: its counts are final.
#[derive(Debug, Clone, Copy)]
struct SealedBucket {
    start_nanos: i64,
    count: EventCount,
}

/// The bucket currently accumulating increments.
#[derive(Debug)]
struct Bucket {
    start_nanos: i64,
    success: AtomicU64,
    failure: AtomicU64,
}

impl Bucket {
    fn new(start_nanos: i64) -> Self {
        Self {
            start_nanos,
            success: AtomicU64::new(0),
            failure: AtomicU64::new(0),
        }
    }

    fn record(&self, kind: EventKind) {
        match kind {
            EventKind::Success => self.success.fetch_add(1, Ordering::AcqRel),
            EventKind::Failure => self.failure.fetch_add(1, Ordering::AcqRel),
        };
    }

    fn snapshot(&self) -> EventCount {
        EventCount {
            success: self.success.load(Ordering::Acquire),
            failure: self.failure.load(Ordering::Acquire),
        }
    }
}

/// One consistent view of the window: the live bucket plus the already
/// sealed portion and its precomputed sum.
#[derive(Debug)]
struct Window {
    bucket: Bucket,
    history: Vec<SealedBucket>,
    archived: EventCount,
}

impl Window {
    fn empty(start_nanos: i64) -> Self {
        Self {
            bucket: Bucket::new(start_nanos),
            history: Vec::new(),
            archived: EventCount::ZERO,
        }
    }
}

/// Thread-safe counter over a sliding time window.
///
/// The window of length `sliding_window` is divided into buckets of
/// `update_interval`. Rotation is consulted lazily on each recording
/// operation: the first recorder to observe the interval elapsed seals the
/// live bucket into the archive (dropping buckets that have aged out of the
/// window) and swaps in a fresh window through a CAS on the window
/// reference. Losers of that race simply retry their increment against the
/// new bucket, so rotation never blocks anyone.
///
/// Accuracy is approximate at bucket boundaries: an increment racing a
/// rotation may land in a bucket that was just sealed. The error is bounded
/// by one update interval.
pub struct SlidingWindowCounter {
    clock: Arc<dyn Clock>,
    window_nanos: i64,
    update_interval_nanos: i64,
    window: ArcSwap<Window>,
}

impl SlidingWindowCounter {
    /// Creates a counter whose window starts at the clock's current time.
    ///
    /// Both durations must be positive and `update_interval` must not exceed
    /// `sliding_window`; [`Config`](crate::Config) validation enforces this
    /// before a counter is ever built.
    pub fn new(clock: Arc<dyn Clock>, sliding_window: Duration, update_interval: Duration) -> Self {
        let start = clock.now_nanos();
        Self {
            clock,
            window_nanos: duration_to_nanos(sliding_window).max(1),
            // A zero interval would make the rotation loop spin; one
            // nanosecond is the effective floor.
            update_interval_nanos: duration_to_nanos(update_interval).max(1),
            window: ArcSwap::from_pointee(Window::empty(start)),
        }
    }

    fn record(&self, kind: EventKind) {
        loop {
            let window = self.window.load();
            let now = self.clock.now_nanos();
            let boundary = window
                .bucket
                .start_nanos
                .saturating_add(self.update_interval_nanos);
            if now < boundary {
                window.bucket.record(kind);
                return;
            }
            // Interval elapsed: seal the bucket and retry against whichever
            // window wins the rotation race.
            self.rotate(&window, now);
        }
    }

    fn rotate(&self, seen: &Arc<Window>, now: i64) {
        let sealed = SealedBucket {
            start_nanos: seen.bucket.start_nanos,
            count: seen.bucket.snapshot(),
        };
        let horizon = now - self.window_nanos;

        let mut history: Vec<SealedBucket> = seen
            .history
            .iter()
            .filter(|b| b.start_nanos > horizon)
            .copied()
            .collect();
        if sealed.start_nanos > horizon {
            history.push(sealed);
        }
        let archived = history
            .iter()
            .fold(EventCount::ZERO, |acc, b| acc.saturating_add(b.count));

        let next = Arc::new(Window {
            bucket: Bucket::new(now),
            history,
            archived,
        });
        // Pointer-compare CAS: only the thread still holding the observed
        // window installs the rotated one.
        let _ = self.window.compare_and_swap(seen, next);
    }
}

impl EventCounter for SlidingWindowCounter {
    fn on_success(&self) {
        self.record(EventKind::Success);
    }

    fn on_failure(&self) {
        self.record(EventKind::Failure);
    }

    fn count(&self) -> EventCount {
        let window = self.window.load();
        window.archived.saturating_add(window.bucket.snapshot())
    }
}

impl fmt::Debug for SlidingWindowCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlidingWindowCounter")
            .field("window_nanos", &self.window_nanos)
            .field("update_interval_nanos", &self.update_interval_nanos)
            .field("count", &self.count())
            .finish()
    }
}

/// Counter used while the circuit is tripped: accounting cost is zero and
/// the snapshot is always [`EventCount::ZERO`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpCounter;

impl EventCounter for NoOpCounter {
    fn on_success(&self) {}

    fn on_failure(&self) {}

    fn count(&self) -> EventCount {
        EventCount::ZERO
    }
}
