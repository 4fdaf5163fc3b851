//! Error types.

use thiserror::Error;

/// Rejected configuration, raised when a breaker is built.
///
/// A running breaker never surfaces errors; anything invalid is caught here,
/// at construction.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum ConfigError {
    #[error("failure_rate_threshold must be within (0.0, 1.0], got {0}")]
    FailureRateThreshold(f64),

    #[error("circuit_open_window must be a positive duration")]
    CircuitOpenWindow,

    #[error("trial_request_interval must be a positive duration")]
    TrialRequestInterval,

    #[error("counter_sliding_window must be a positive duration")]
    CounterSlidingWindow,

    #[error("counter_update_interval must be positive and no longer than counter_sliding_window")]
    CounterUpdateInterval,
}

/// Outcome of [`CircuitBreaker::call`](crate::CircuitBreaker::call) when the
/// wrapped operation did not produce a value.
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// The breaker short-circuited the call without running it.
    #[error("circuit '{circuit}' rejected the request")]
    Rejected { circuit: String },

    /// The wrapped operation ran and failed.
    #[error("circuit call failed")]
    Execution(#[source] E),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_messages_name_the_field() {
        let err = ConfigError::FailureRateThreshold(1.5);
        assert!(err.to_string().contains("failure_rate_threshold"));
        assert!(err.to_string().contains("1.5"));
    }

    #[test]
    fn test_execution_error_keeps_its_source() {
        use std::error::Error as _;

        let inner = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        let err: CircuitError<std::io::Error> = CircuitError::Execution(inner);

        assert!(err.source().is_some());
    }

    #[test]
    fn test_rejected_error_names_the_circuit() {
        let err: CircuitError<std::io::Error> = CircuitError::Rejected {
            circuit: "payments".to_string(),
        };
        assert!(err.to_string().contains("payments"));
    }
}
