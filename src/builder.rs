//! Fluent configuration for circuit breakers.

use crate::circuit::{anonymous_name, CircuitBreaker, CircuitState, Config};
use crate::classifier::FailureClassifier;
use crate::clock::{Clock, MonotonicClock};
use crate::errors::ConfigError;
use crate::listener::{Listeners, TransitionEvent};
use std::sync::Arc;
use std::time::Duration;

/// Builder for [`CircuitBreaker`]s.
///
/// Every parameter has a production default; `build` validates the final
/// [`Config`] and fails with a [`ConfigError`] rather than letting an
/// invalid breaker run.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use tripswitch::CircuitBreaker;
///
/// let breaker = CircuitBreaker::builder("payment-api")
///     .failure_rate_threshold(0.5)
///     .minimum_request_threshold(10)
///     .circuit_open_window(Duration::from_secs(10))
///     .on_open(|name| eprintln!("circuit {name} opened"))
///     .build()
///     .expect("valid configuration");
///
/// assert!(breaker.can_request());
/// ```
pub struct CircuitBuilder {
    name: Option<String>,
    config: Config,
    clock: Option<Arc<dyn Clock>>,
    classifier: Option<Arc<dyn FailureClassifier>>,
    listeners: Listeners,
}

impl CircuitBuilder {
    /// Starts a builder for a breaker with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            config: Config::default(),
            clock: None,
            classifier: None,
            listeners: Listeners::default(),
        }
    }

    /// Starts a builder for an anonymous breaker; the name is drawn from a
    /// process-wide sequence at build time.
    pub fn anonymous() -> Self {
        Self {
            name: None,
            config: Config::default(),
            clock: None,
            classifier: None,
            listeners: Listeners::default(),
        }
    }

    /// Replaces the whole parameter bundle at once.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Failure rate above which (strictly) the circuit trips, within
    /// `(0.0, 1.0]`.
    pub fn failure_rate_threshold(mut self, threshold: f64) -> Self {
        self.config.failure_rate_threshold = threshold;
        self
    }

    /// Minimum number of requests in the window before the failure rate is
    /// evaluated.
    pub fn minimum_request_threshold(mut self, requests: u64) -> Self {
        self.config.minimum_request_threshold = requests;
        self
    }

    /// How long an OPEN circuit refuses everything before a trial request
    /// is allowed.
    pub fn circuit_open_window(mut self, window: Duration) -> Self {
        self.config.circuit_open_window = window;
        self
    }

    /// How long a HALF_OPEN circuit waits for its trial's outcome before
    /// granting another trial.
    pub fn trial_request_interval(mut self, interval: Duration) -> Self {
        self.config.trial_request_interval = interval;
        self
    }

    /// Length of the sliding window failure rates are computed over.
    pub fn counter_sliding_window(mut self, window: Duration) -> Self {
        self.config.counter_sliding_window = window;
        self
    }

    /// Granularity of the sliding window's buckets.
    pub fn counter_update_interval(mut self, interval: Duration) -> Self {
        self.config.counter_update_interval = interval;
        self
    }

    /// Injects the time source. Defaults to [`MonotonicClock`]; tests
    /// inject a [`ManualClock`](crate::ManualClock).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Routes reported failure causes through `classifier` before they are
    /// counted.
    pub fn failure_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Adds a listener notified on every state transition.
    pub fn on_transition<F>(mut self, listener: F) -> Self
    where
        F: Fn(&TransitionEvent<'_>) + Send + Sync + 'static,
    {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Adds a listener fired when the circuit opens.
    pub fn on_open<F>(self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_state(CircuitState::Open, f)
    }

    /// Adds a listener fired when the circuit closes.
    pub fn on_close<F>(self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_state(CircuitState::Closed, f)
    }

    /// Adds a listener fired when the circuit enters half-open.
    pub fn on_half_open<F>(self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_state(CircuitState::HalfOpen, f)
    }

    fn on_state<F>(self, state: CircuitState, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_transition(move |event| {
            if event.state == state {
                f(event.circuit);
            }
        })
    }

    /// Validates the configuration and builds the breaker, initially
    /// CLOSED.
    pub fn build(self) -> Result<CircuitBreaker, ConfigError> {
        let name = self.name.unwrap_or_else(anonymous_name);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        CircuitBreaker::from_parts(name, clock, self.config, self.classifier, self.listeners)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_builder_defaults_produce_a_closed_breaker() {
        let breaker = CircuitBuilder::new("test").build().unwrap();

        assert_eq!(breaker.name(), "test");
        assert!(breaker.is_closed());
    }

    #[test]
    fn test_anonymous_builder_draws_a_sequence_name() {
        let breaker = CircuitBuilder::anonymous().build().unwrap();

        assert!(breaker.name().starts_with("circuit-breaker-"));
    }

    #[test]
    fn test_build_rejects_invalid_thresholds() {
        assert_eq!(
            CircuitBuilder::new("test")
                .failure_rate_threshold(1.5)
                .build()
                .err(),
            Some(ConfigError::FailureRateThreshold(1.5))
        );

        assert_eq!(
            CircuitBuilder::new("test")
                .circuit_open_window(Duration::ZERO)
                .build()
                .err(),
            Some(ConfigError::CircuitOpenWindow)
        );

        assert_eq!(
            CircuitBuilder::new("test")
                .counter_sliding_window(Duration::from_secs(1))
                .counter_update_interval(Duration::from_secs(2))
                .build()
                .err(),
            Some(ConfigError::CounterUpdateInterval)
        );
    }

    #[test]
    fn test_on_open_sugar_fires_only_on_open() {
        let opened = Arc::new(AtomicBool::new(false));
        let closed_again = Arc::new(AtomicBool::new(false));

        let opened_clone = Arc::clone(&opened);
        let closed_clone = Arc::clone(&closed_again);

        let clock = Arc::new(ManualClock::new());
        let breaker = CircuitBuilder::new("test")
            .clock(Arc::clone(&clock) as Arc<dyn Clock>)
            .minimum_request_threshold(2)
            .circuit_open_window(Duration::from_secs(1))
            .on_open(move |_| opened_clone.store(true, Ordering::SeqCst))
            .on_close(move |_| closed_clone.store(true, Ordering::SeqCst))
            .build()
            .unwrap();

        // Construction notifies CLOSED once.
        assert!(closed_again.load(Ordering::SeqCst));
        assert!(!opened.load(Ordering::SeqCst));

        breaker.on_failure();
        breaker.on_failure();

        assert!(breaker.is_open());
        assert!(opened.load(Ordering::SeqCst));
    }
}
