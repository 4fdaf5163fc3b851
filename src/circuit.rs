//! The non-blocking circuit breaker.
//!
//! The breaker owns a single atomic reference to an immutable [`State`]
//! snapshot. Every transition replaces the whole snapshot through a
//! pointer-compare CAS; concurrent readers observe either the old or the new
//! state, never a torn one. A lost CAS is never retried: it means another
//! thread already drove the state forward, which is exactly the outcome the
//! loser wanted.

use crate::classifier::{FailureClassifier, FailureContext};
use crate::clock::{duration_to_nanos, Clock};
use crate::counter::{EventCount, EventCounter, NoOpCounter, SlidingWindowCounter};
use crate::errors::{CircuitError, ConfigError};
use crate::listener::{Listeners, TransitionEvent};
use arc_swap::ArcSwap;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Sequence for naming breakers that were not given a name.
static ANONYMOUS_SEQ: AtomicU64 = AtomicU64::new(0);

pub(crate) fn anonymous_name() -> String {
    format!(
        "circuit-breaker-{}",
        ANONYMOUS_SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

/// The three states of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation. All requests pass and outcomes are counted.
    Closed,
    /// Tripped. All requests are refused until the open window elapses.
    Open,
    /// Probing. A single trial request is in flight; everything else is
    /// refused. If the trial never reports an outcome, another trial is
    /// permitted once the trial interval elapses.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breaker thresholds and windows. Immutable once a breaker is built;
/// validated by [`Config::validate`] so a running breaker never has to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    /// Failure rate above which (strictly) the circuit trips. Within
    /// `(0.0, 1.0]`.
    pub failure_rate_threshold: f64,
    /// Minimum number of requests in the window before the rate is
    /// evaluated at all.
    pub minimum_request_threshold: u64,
    /// How long an OPEN circuit refuses everything before a trial is
    /// allowed.
    pub circuit_open_window: Duration,
    /// How long a HALF_OPEN circuit waits for its trial's outcome before
    /// another trial may be granted.
    pub trial_request_interval: Duration,
    /// Length of the sliding window failure rates are computed over.
    pub counter_sliding_window: Duration,
    /// Granularity of the sliding window's buckets.
    pub counter_update_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            minimum_request_threshold: 10,
            circuit_open_window: Duration::from_secs(10),
            trial_request_interval: Duration::from_secs(3),
            counter_sliding_window: Duration::from_secs(20),
            counter_update_interval: Duration::from_secs(1),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.failure_rate_threshold > 0.0 && self.failure_rate_threshold <= 1.0) {
            return Err(ConfigError::FailureRateThreshold(
                self.failure_rate_threshold,
            ));
        }
        if self.circuit_open_window.is_zero() {
            return Err(ConfigError::CircuitOpenWindow);
        }
        if self.trial_request_interval.is_zero() {
            return Err(ConfigError::TrialRequestInterval);
        }
        if self.counter_sliding_window.is_zero() {
            return Err(ConfigError::CounterSlidingWindow);
        }
        if self.counter_update_interval.is_zero()
            || self.counter_update_interval > self.counter_sliding_window
        {
            return Err(ConfigError::CounterUpdateInterval);
        }
        Ok(())
    }
}

/// One immutable snapshot of the machine: state tag, the counter active in
/// that state, and the absolute deadline at which the state times out
/// (`0` = never, CLOSED's case).
struct State {
    circuit: CircuitState,
    counter: Arc<dyn EventCounter>,
    deadline_nanos: i64,
}

impl State {
    fn check_timeout(&self, now_nanos: i64) -> bool {
        self.deadline_nanos > 0 && self.deadline_nanos <= now_nanos
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("circuit", &self.circuit)
            .field("deadline_nanos", &self.deadline_nanos)
            .finish()
    }
}

fn closed_state(clock: &Arc<dyn Clock>, config: &Config) -> State {
    State {
        circuit: CircuitState::Closed,
        counter: Arc::new(SlidingWindowCounter::new(
            Arc::clone(clock),
            config.counter_sliding_window,
            config.counter_update_interval,
        )),
        deadline_nanos: 0,
    }
}

/// A non-blocking circuit breaker.
///
/// Ask [`can_request`](Self::can_request) before issuing a downstream call;
/// report the outcome through [`on_success`](Self::on_success),
/// [`on_failure`](Self::on_failure) or
/// [`on_failure_with`](Self::on_failure_with). All methods are total and
/// lock-free: the breaker never surfaces an error and never blocks, so it
/// cannot amplify an outage from the instrumentation path.
pub struct CircuitBreaker {
    name: String,
    config: Config,
    clock: Arc<dyn Clock>,
    classifier: Option<Arc<dyn FailureClassifier>>,
    listeners: Listeners,
    state: ArcSwap<State>,
}

impl CircuitBreaker {
    /// Creates an anonymous breaker in CLOSED with the given clock and
    /// config. Use [`builder`](Self::builder) for names, classifiers and
    /// listeners.
    pub fn new(clock: Arc<dyn Clock>, config: Config) -> Result<Self, ConfigError> {
        Self::from_parts(anonymous_name(), clock, config, None, Listeners::default())
    }

    /// Starts a builder for a named breaker.
    pub fn builder(name: impl Into<String>) -> crate::builder::CircuitBuilder {
        crate::builder::CircuitBuilder::new(name)
    }

    pub(crate) fn from_parts(
        name: String,
        clock: Arc<dyn Clock>,
        config: Config,
        classifier: Option<Arc<dyn FailureClassifier>>,
        listeners: Listeners,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let initial = closed_state(&clock, &config);
        let breaker = Self {
            name,
            config,
            clock,
            classifier,
            listeners,
            state: ArcSwap::from_pointee(initial),
        };
        breaker.publish_transition(CircuitState::Closed, None);
        Ok(breaker)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The state the breaker is currently in.
    pub fn circuit_state(&self) -> CircuitState {
        self.state.load().circuit
    }

    pub fn is_closed(&self) -> bool {
        self.circuit_state() == CircuitState::Closed
    }

    pub fn is_open(&self) -> bool {
        self.circuit_state() == CircuitState::Open
    }

    pub fn is_half_open(&self) -> bool {
        self.circuit_state() == CircuitState::HalfOpen
    }

    /// Whether a request may be issued right now.
    ///
    /// CLOSED admits everything. OPEN and HALF_OPEN refuse everything until
    /// their deadline elapses; the first caller to then win the CAS into
    /// HALF_OPEN gets `true` and becomes the trial request, everyone else
    /// keeps getting `false`. Returning `true` exactly when the CAS wins is
    /// what bounds the trial to a single caller per deadline.
    pub fn can_request(&self) -> bool {
        let current = self.state.load();
        match current.circuit {
            CircuitState::Closed => true,
            CircuitState::Open | CircuitState::HalfOpen => {
                if current.check_timeout(self.clock.now_nanos())
                    && self.try_transition(&current, self.new_half_open_state())
                {
                    self.publish_transition(CircuitState::HalfOpen, None);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Reports a successful outcome.
    ///
    /// Counted in CLOSED; closes the circuit in HALF_OPEN. A success
    /// arriving while OPEN is a stale report and is ignored: the circuit
    /// only re-closes through HALF_OPEN.
    pub fn on_success(&self) {
        let current = self.state.load();
        match current.circuit {
            CircuitState::Closed => current.counter.on_success(),
            CircuitState::HalfOpen => {
                if self.try_transition(&current, self.new_closed_state()) {
                    self.publish_transition(CircuitState::Closed, None);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Reports a failed outcome, unconditionally counted.
    ///
    /// In CLOSED the failure is recorded and the threshold checked; in
    /// HALF_OPEN a single failure re-opens the circuit; in OPEN the report
    /// is stale and ignored.
    pub fn on_failure(&self) {
        let current = self.state.load();
        match current.circuit {
            CircuitState::Closed => {
                current.counter.on_failure();
                let count = current.counter.count();
                if self.exceeds_failure_threshold(count)
                    && self.try_transition(&current, self.new_open_state())
                {
                    self.publish_transition(CircuitState::Open, Some(count));
                }
            }
            CircuitState::HalfOpen => {
                if self.try_transition(&current, self.new_open_state()) {
                    self.publish_transition(CircuitState::Open, None);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Reports a failed outcome with its cause, routed through the
    /// configured [`FailureClassifier`] first.
    ///
    /// A cause the classifier rejects is not counted. A classifier that
    /// panics is logged and treated as having rejected: a broken classifier
    /// must never trip the breaker.
    pub fn on_failure_with(&self, cause: &dyn Any) {
        if let Some(classifier) = &self.classifier {
            let ctx = FailureContext {
                circuit: &self.name,
                cause,
            };
            let verdict = catch_unwind(AssertUnwindSafe(|| classifier.should_trip(&ctx)));
            match verdict {
                Ok(true) => {}
                Ok(false) => return,
                Err(_) => {
                    tracing::error!(
                        circuit = %self.name,
                        "failure classifier panicked; failure not counted"
                    );
                    return;
                }
            }
        }
        self.on_failure();
    }

    /// Runs `operation` under the breaker: gate on
    /// [`can_request`](Self::can_request), then report the outcome.
    ///
    /// Convenience over the reporting API, for callers that do not need to
    /// separate the gate from the outcome.
    pub fn call<T, E, F>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: 'static,
    {
        if !self.can_request() {
            return Err(CircuitError::Rejected {
                circuit: self.name.clone(),
            });
        }
        match operation() {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(cause) => {
                self.on_failure_with(&cause);
                Err(CircuitError::Execution(cause))
            }
        }
    }

    /// Trip iff the window holds enough requests and the failure rate is
    /// strictly above the threshold.
    fn exceeds_failure_threshold(&self, count: EventCount) -> bool {
        count.total() > 0
            && count.total() >= self.config.minimum_request_threshold
            && count.failure_rate() > self.config.failure_rate_threshold
    }

    /// Installs `next` iff the current state is still the one `seen`.
    ///
    /// Pointer comparison is ABA-safe here: `seen` keeps its `State` alive,
    /// so the address cannot be recycled by a newer state while the compare
    /// runs.
    fn try_transition(&self, seen: &Arc<State>, next: State) -> bool {
        let prev = self.state.compare_and_swap(seen, Arc::new(next));
        Arc::ptr_eq(&prev, seen)
    }

    fn new_closed_state(&self) -> State {
        closed_state(&self.clock, &self.config)
    }

    fn new_open_state(&self) -> State {
        State {
            circuit: CircuitState::Open,
            counter: Arc::new(NoOpCounter),
            deadline_nanos: self.deadline_after(self.config.circuit_open_window),
        }
    }

    fn new_half_open_state(&self) -> State {
        State {
            circuit: CircuitState::HalfOpen,
            counter: Arc::new(NoOpCounter),
            deadline_nanos: self.deadline_after(self.config.trial_request_interval),
        }
    }

    fn deadline_after(&self, timeout: Duration) -> i64 {
        self.clock
            .now_nanos()
            .saturating_add(duration_to_nanos(timeout))
    }

    fn publish_transition(&self, state: CircuitState, count: Option<EventCount>) {
        match count {
            Some(count) => tracing::info!(
                circuit = %self.name,
                state = state.as_str(),
                failure = count.failure(),
                total = count.total(),
                "circuit state changed"
            ),
            None => tracing::info!(
                circuit = %self.name,
                state = state.as_str(),
                "circuit state changed"
            ),
        }
        self.listeners.notify(&TransitionEvent {
            circuit: &self.name,
            state,
            count,
        });
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.circuit_state())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn scenario_config() -> Config {
        Config {
            failure_rate_threshold: 0.5,
            minimum_request_threshold: 10,
            circuit_open_window: Duration::from_secs(1),
            trial_request_interval: Duration::from_secs(1),
            ..Config::default()
        }
    }

    fn breaker_with_clock() -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let breaker = CircuitBreaker::from_parts(
            "test".to_string(),
            Arc::clone(&clock) as Arc<dyn Clock>,
            scenario_config(),
            None,
            Listeners::default(),
        )
        .unwrap();
        (breaker, clock)
    }

    fn report(breaker: &CircuitBreaker, successes: u64, failures: u64) {
        for _ in 0..successes {
            breaker.on_success();
        }
        for _ in 0..failures {
            breaker.on_failure();
        }
    }

    fn trip(breaker: &CircuitBreaker) {
        report(breaker, 0, 10);
        assert!(breaker.is_open());
    }

    #[test]
    fn test_starts_closed_and_admits_requests() {
        let (breaker, _clock) = breaker_with_clock();

        assert!(breaker.is_closed());
        assert!(breaker.can_request());
    }

    #[test]
    fn test_trips_when_rate_exceeds_threshold_at_minimum_volume() {
        let (breaker, _clock) = breaker_with_clock();

        report(&breaker, 4, 6);

        assert!(breaker.is_open());
        assert!(!breaker.can_request());
    }

    #[test]
    fn test_does_not_trip_below_minimum_request_threshold() {
        let (breaker, _clock) = breaker_with_clock();

        report(&breaker, 2, 7);

        assert!(breaker.is_closed());
        assert!(breaker.can_request());
    }

    #[test]
    fn test_does_not_trip_at_exact_rate_threshold() {
        let (breaker, _clock) = breaker_with_clock();

        report(&breaker, 5, 5);

        assert!(breaker.is_closed());
    }

    #[test]
    fn test_outcomes_reported_while_open_are_ignored() {
        let (breaker, _clock) = breaker_with_clock();
        trip(&breaker);

        breaker.on_success();
        breaker.on_failure();

        assert!(breaker.is_open());
    }

    #[test]
    fn test_open_grants_single_trial_after_deadline() {
        let (breaker, clock) = breaker_with_clock();
        trip(&breaker);

        assert!(!breaker.can_request());

        clock.advance(Duration::from_secs(1));
        assert!(breaker.can_request());
        assert!(breaker.is_half_open());
        // The trial is taken; nobody else gets through.
        assert!(!breaker.can_request());
    }

    #[test]
    fn test_half_open_success_closes_with_fresh_counter() {
        let (breaker, clock) = breaker_with_clock();
        trip(&breaker);

        clock.advance(Duration::from_secs(1));
        assert!(breaker.can_request());
        breaker.on_success();

        assert!(breaker.is_closed());
        assert_eq!(breaker.state.load().counter.count(), EventCount::ZERO);
    }

    #[test]
    fn test_half_open_failure_reopens_with_fresh_deadline() {
        let (breaker, clock) = breaker_with_clock();
        trip(&breaker);

        clock.advance(Duration::from_secs(1));
        assert!(breaker.can_request());
        breaker.on_failure();

        assert!(breaker.is_open());
        assert!(!breaker.can_request());

        clock.advance(Duration::from_millis(999));
        assert!(!breaker.can_request());

        clock.advance(Duration::from_millis(1));
        assert!(breaker.can_request());
    }

    #[test]
    fn test_half_open_refreshes_trial_after_interval() {
        let (breaker, clock) = breaker_with_clock();
        trip(&breaker);

        clock.advance(Duration::from_secs(1));
        assert!(breaker.can_request());
        assert!(breaker.is_half_open());

        // The trial never reports. After the trial interval another single
        // trial is granted.
        clock.advance(Duration::from_secs(1));
        assert!(breaker.can_request());
        assert!(breaker.is_half_open());
        assert!(!breaker.can_request());
    }

    #[test]
    fn test_stale_transition_attempt_has_no_effect() {
        let (breaker, _clock) = breaker_with_clock();

        let seen = breaker.state.load_full();
        trip(&breaker);

        // `seen` no longer matches the current state; the CAS must lose.
        assert!(!breaker.try_transition(&seen, breaker.new_closed_state()));
        assert!(breaker.is_open());
    }

    #[test]
    fn test_classifier_rejection_is_not_counted() {
        let clock = Arc::new(ManualClock::new());
        let breaker = CircuitBreaker::builder("test")
            .clock(Arc::clone(&clock) as Arc<dyn Clock>)
            .config(scenario_config())
            .failure_classifier(Arc::new(crate::classifier::PredicateClassifier::new(
                |ctx: &FailureContext<'_>| {
                    ctx.cause
                        .downcast_ref::<&str>()
                        .map(|cause| *cause != "ignored")
                        .unwrap_or(true)
                },
            )))
            .build()
            .unwrap();

        for _ in 0..50 {
            breaker.on_failure_with(&"ignored");
        }
        assert!(breaker.is_closed());

        for _ in 0..10 {
            breaker.on_failure_with(&"counted");
        }
        assert!(breaker.is_open());
    }

    #[test]
    fn test_panicking_classifier_rejects_and_does_not_unwind() {
        let clock = Arc::new(ManualClock::new());
        let breaker = CircuitBreaker::builder("test")
            .clock(Arc::clone(&clock) as Arc<dyn Clock>)
            .config(scenario_config())
            .failure_classifier(Arc::new(crate::classifier::PredicateClassifier::new(
                |_: &FailureContext<'_>| panic!("intentional panic in classifier"),
            )))
            .build()
            .unwrap();

        for _ in 0..50 {
            breaker.on_failure_with(&"anything");
        }

        assert!(breaker.is_closed());
    }

    #[test]
    fn test_call_rejects_while_open_without_running_the_operation() {
        let (breaker, _clock) = breaker_with_clock();
        trip(&breaker);

        let result: Result<&str, CircuitError<&str>> = breaker.call(|| {
            panic!("operation must not run while open");
        });

        assert!(matches!(result, Err(CircuitError::Rejected { .. })));
    }

    #[test]
    fn test_call_reports_outcomes() {
        let (breaker, _clock) = breaker_with_clock();

        assert_eq!(breaker.call(|| Ok::<_, &str>("ok")).unwrap(), "ok");
        for _ in 0..10 {
            let _ = breaker.call(|| Err::<(), _>("boom"));
        }

        assert!(breaker.is_open());
    }

    #[test]
    fn test_anonymous_names_are_distinct() {
        let config = Config::default();
        let a = CircuitBreaker::new(Arc::new(ManualClock::new()), config).unwrap();
        let b = CircuitBreaker::new(Arc::new(ManualClock::new()), config).unwrap();

        assert!(a.name().starts_with("circuit-breaker-"));
        assert_ne!(a.name(), b.name());
    }

    #[test]
    fn test_listener_sees_trip_counts() {
        use std::sync::Mutex;

        let events: Arc<Mutex<Vec<(CircuitState, Option<EventCount>)>>> =
            Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);

        let clock = Arc::new(ManualClock::new());
        let breaker = CircuitBreaker::builder("db")
            .clock(Arc::clone(&clock) as Arc<dyn Clock>)
            .config(scenario_config())
            .on_transition(move |event| {
                sink.lock().unwrap().push((event.state, event.count));
            })
            .build()
            .unwrap();

        report(&breaker, 4, 6);

        let events = events.lock().unwrap();
        assert_eq!(events[0], (CircuitState::Closed, None));
        assert_eq!(
            events[1],
            (CircuitState::Open, Some(EventCount::new(4, 6)))
        );
    }

    #[test]
    fn test_invalid_config_is_rejected_at_construction() {
        let config = Config {
            failure_rate_threshold: 0.0,
            ..Config::default()
        };

        let result = CircuitBreaker::new(Arc::new(ManualClock::new()), config);
        assert_eq!(
            result.err().map(|e| e.to_string().contains("failure_rate")),
            Some(true)
        );
    }
}
