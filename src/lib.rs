//! Non-blocking circuit breaker.
//!
//! A circuit breaker sits in front of calls to a remote service, observes
//! their success/failure outcomes, and short-circuits new calls when the
//! remote is deemed unhealthy. This crate implements the pattern without
//! ever becoming a contention point itself:
//! - State transitions are performed by compare-and-swap on an atomic
//!   reference to an immutable state snapshot; no locks, no timer threads
//! - Failure rates are aggregated over a sliding time window that also
//!   rotates lock-free
//! - The breaker never returns an error and never blocks on the
//!   instrumentation path
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use tripswitch::CircuitBreaker;
//!
//! let breaker = CircuitBreaker::builder("payment-api")
//!     .failure_rate_threshold(0.5)
//!     .minimum_request_threshold(10)
//!     .circuit_open_window(Duration::from_secs(10))
//!     .build()
//!     .expect("valid configuration");
//!
//! // Gate each downstream call and report its outcome.
//! if breaker.can_request() {
//!     match issue_request() {
//!         Ok(_) => breaker.on_success(),
//!         Err(cause) => breaker.on_failure_with(&cause),
//!     }
//! }
//!
//! // Or let the breaker drive the whole exchange.
//! let response = breaker.call(|| issue_request());
//! # fn issue_request() -> Result<&'static str, String> { Ok("ok") }
//! # let _ = response;
//! ```

pub mod builder;
pub mod circuit;
pub mod classifier;
pub mod clock;
pub mod counter;
pub mod errors;
pub mod listener;

pub use builder::CircuitBuilder;
pub use circuit::{CircuitBreaker, CircuitState, Config};
pub use classifier::{DefaultClassifier, FailureClassifier, FailureContext, PredicateClassifier};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use counter::{EventCount, EventCounter, NoOpCounter, SlidingWindowCounter};
pub use errors::{CircuitError, ConfigError};
pub use listener::{TransitionEvent, TransitionListener};
