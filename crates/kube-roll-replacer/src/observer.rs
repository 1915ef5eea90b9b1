//! Progress notifications for operators.

use crate::lifecycle::CycleState;

/// Receives progress events from a [`Replacer`](crate::Replacer).
///
/// All methods default to doing nothing. Events are observational only; they
/// never influence the run.
pub trait ReplaceObserver: Send + Sync {
    /// The initial snapshot was taken.
    fn on_snapshot(&self, _pods: &[String]) {}

    /// A cycle entered `state`.
    fn on_state(&self, _pod: &str, _state: CycleState) {}

    /// The delete request for `pod` was accepted.
    fn on_delete(&self, _pod: &str) {}

    /// One poll ran while the cycle for `pod` was in `state`.
    fn on_poll_tick(&self, _pod: &str, _state: CycleState) {}

    /// The cycle for `pod` completed; `replacements` were newly finalized.
    fn on_finalized(&self, _pod: &str, _replacements: &[String]) {}
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ReplaceObserver for NoopObserver {}
