//! Failure classification.
//!
//! Not every error says anything about the health of the remote: a
//! validation failure or a 4xx response should usually not push the circuit
//! toward OPEN. A [`FailureClassifier`] decides, per reported cause, whether
//! the failure counts.

use std::any::Any;

/// Context handed to a classifier for one reported failure.
#[derive(Debug)]
pub struct FailureContext<'a> {
    /// Name of the breaker the failure was reported to.
    pub circuit: &'a str,
    /// The opaque cause. Downcast it to inspect concrete error types.
    pub cause: &'a dyn Any,
}

/// Decides whether a reported failure counts toward tripping the circuit.
///
/// The breaker invokes the classifier from
/// [`on_failure_with`](crate::CircuitBreaker::on_failure_with) and guards the
/// call: a classifier that panics is treated as having returned `false`, so
/// a broken classifier can never trip the breaker on its own.
pub trait FailureClassifier: Send + Sync {
    /// Returns `true` if the failure should count, `false` to ignore it.
    fn should_trip(&self, ctx: &FailureContext<'_>) -> bool;
}

/// Classifier that counts every failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl FailureClassifier for DefaultClassifier {
    fn should_trip(&self, _ctx: &FailureContext<'_>) -> bool {
        true
    }
}

/// Closure-backed classifier for common filtering patterns.
///
/// # Examples
///
/// ```rust
/// use tripswitch::{FailureClassifier, FailureContext, PredicateClassifier};
///
/// #[derive(Debug)]
/// struct ApiError {
///     status: u16,
/// }
///
/// // Count server errors only; client errors say nothing about the remote.
/// let classifier = PredicateClassifier::new(|ctx: &FailureContext<'_>| {
///     ctx.cause
///         .downcast_ref::<ApiError>()
///         .map(|e| e.status >= 500)
///         .unwrap_or(true)
/// });
///
/// let ctx = FailureContext {
///     circuit: "api",
///     cause: &ApiError { status: 404 },
/// };
/// assert!(!classifier.should_trip(&ctx));
/// ```
pub struct PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    predicate: F,
}

impl<F> PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> FailureClassifier for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn should_trip(&self, ctx: &FailureContext<'_>) -> bool {
        (self.predicate)(ctx)
    }
}

impl<F> std::fmt::Debug for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateClassifier")
            .field("predicate", &"<closure>")
            .finish()
    }
}
