//! Observation of state transitions.
//!
//! The breaker publishes every transition to an injected list of listeners,
//! so metrics, logs, or alerting can hang off the state machine without the
//! machine depending on any of them.

use crate::circuit::CircuitState;
use crate::counter::EventCount;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// One state transition, as seen by listeners.
#[derive(Debug, Clone, Copy)]
pub struct TransitionEvent<'a> {
    /// Name of the breaker that transitioned.
    pub circuit: &'a str,
    /// The state just entered.
    pub state: CircuitState,
    /// For CLOSED→OPEN, the counts that breached the threshold.
    pub count: Option<EventCount>,
}

/// A transition sink.
pub type TransitionListener = Arc<dyn Fn(&TransitionEvent<'_>) + Send + Sync>;

/// The breaker's listener list.
#[derive(Clone, Default)]
pub(crate) struct Listeners {
    inner: Vec<TransitionListener>,
}

impl Listeners {
    pub(crate) fn push(&mut self, listener: TransitionListener) {
        self.inner.push(listener);
    }

    /// Notify every listener. A panicking listener must not unwind into the
    /// request path, so each call is isolated.
    pub(crate) fn notify(&self, event: &TransitionEvent<'_>) {
        for listener in &self.inner {
            let call = AssertUnwindSafe(|| listener(event));
            if catch_unwind(call).is_err() {
                tracing::error!(
                    circuit = event.circuit,
                    "transition listener panicked; continuing"
                );
            }
        }
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &self.inner.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_all_listeners_receive_the_event() {
        let seen = Arc::new(AtomicUsize::new(0));
        let mut listeners = Listeners::default();
        for _ in 0..3 {
            let seen = Arc::clone(&seen);
            listeners.push(Arc::new(move |event: &TransitionEvent<'_>| {
                assert_eq!(event.circuit, "db");
                assert_eq!(event.state, CircuitState::Open);
                seen.fetch_add(1, Ordering::SeqCst);
            }));
        }

        listeners.notify(&TransitionEvent {
            circuit: "db",
            state: CircuitState::Open,
            count: Some(EventCount::new(4, 6)),
        });

        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_the_rest() {
        let seen = Arc::new(AtomicUsize::new(0));
        let mut listeners = Listeners::default();

        listeners.push(Arc::new(|_: &TransitionEvent<'_>| {
            panic!("intentional panic in listener");
        }));
        let seen_clone = Arc::clone(&seen);
        listeners.push(Arc::new(move |_: &TransitionEvent<'_>| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        }));

        listeners.notify(&TransitionEvent {
            circuit: "db",
            state: CircuitState::Closed,
            count: None,
        });

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
