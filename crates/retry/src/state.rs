//! Per-invocation retry state handed to lifecycle callbacks.

use std::time::Duration;

/// Snapshot of one [`RetryInvoker::invoke`](crate::RetryInvoker::invoke) call.
///
/// Created fresh for every invocation and never shared across calls. The
/// invoker rebuilds it once per attempt and passes it by reference to
/// `on_success`, `on_backoff` and `on_giveup`.
#[derive(Debug)]
pub struct RetryState<'a, E> {
    /// Name of the wrapped call, e.g. `"PullMessages"`.
    pub target: &'static str,
    /// Attempt counter, starting at 1.
    pub tries: u32,
    /// Time since the first attempt started, measured when this attempt began.
    pub elapsed: Duration,
    /// Failure of this attempt, if it failed.
    pub error: Option<&'a E>,
    /// Wait chosen after jitter and clamping, set right before `on_backoff`.
    pub actual_wait: Option<Duration>,
}

impl<'a, E> RetryState<'a, E> {
    pub(crate) fn new(target: &'static str, tries: u32, elapsed: Duration) -> Self {
        Self {
            target,
            tries,
            elapsed,
            error: None,
            actual_wait: None,
        }
    }
}
