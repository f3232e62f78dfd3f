use crate::errors::NfResult;
use crate::model::Instance;

/// User-supplied scoring of model instances.
///
/// Implementations are shared across worker threads, so they must be
/// `Send + Sync`. A fixed instance is assumed to always score the same.
pub trait Analysis: Send + Sync {
    /// Log likelihood of `instance`. Errors propagate out of the search.
    fn log_likelihood(&self, instance: &Instance) -> NfResult<f64>;

    /// Render the current best instance. Fire-and-forget.
    fn visualize(&self, _instance: &Instance, _is_final: bool) {}
}
