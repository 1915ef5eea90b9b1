//! Replacement cycle state machine.
//!
//! Every pod in the initial snapshot goes through one cycle:
//!
//! ```text
//!     ┌─────────────────┐
//!     │    Deleting     │  delete request issued
//!     └────────┬────────┘
//!              │ (accepted or already gone)
//!              ▼
//!     ┌─────────────────────────┐
//!     │  WaitingForTermination  │  poll until the pod is not found
//!     └────────┬────────────────┘
//!              │ (not found)
//!              ▼
//!     ┌──────────────────────────────┐
//!     │  WaitingForReadyReplacement  │  poll until every new pod is Running
//!     └────────┬─────────────────────┘
//!              │ (ready)
//!              ▼
//!     ┌─────────────────┐
//!     │    Finalized    │
//!     └─────────────────┘
//! ```

use std::fmt;

use crate::error::{ReplacerError, Result};

/// State of a single replacement cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CycleState {
    /// The delete request is being issued.
    Deleting,
    /// Waiting for the deleted pod to disappear.
    WaitingForTermination,
    /// Waiting for the replacement pods to be observed and running.
    WaitingForReadyReplacement,
    /// The replacement is confirmed.
    Finalized,
}

impl CycleState {
    /// The state a cycle starts in.
    pub const INITIAL: Self = Self::Deleting;

    /// Check if a transition is allowed. Cycles only move forward, one step at a time.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Deleting, Self::WaitingForTermination)
                | (Self::WaitingForTermination, Self::WaitingForReadyReplacement)
                | (Self::WaitingForReadyReplacement, Self::Finalized)
        )
    }

    /// Kebab-case name used in logs and progress output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deleting => "deleting",
            Self::WaitingForTermination => "waiting-for-termination",
            Self::WaitingForReadyReplacement => "waiting-for-ready-replacement",
            Self::Finalized => "finalized",
        }
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cycle in progress for one pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle {
    pod: String,
    state: CycleState,
}

impl Cycle {
    /// Start a cycle for `pod` in [`CycleState::INITIAL`].
    #[must_use]
    pub fn start(pod: impl Into<String>) -> Self {
        Self {
            pod: pod.into(),
            state: CycleState::INITIAL,
        }
    }

    /// The pod being replaced.
    #[must_use]
    pub fn pod(&self) -> &str {
        &self.pod
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> CycleState {
        self.state
    }

    /// Move to `to`.
    ///
    /// # Errors
    ///
    /// Returns `ReplacerError::InvalidTransition` if the transition is not allowed.
    pub fn advance(&mut self, to: CycleState) -> Result<CycleState> {
        if !self.state.can_transition_to(to) {
            return Err(ReplacerError::InvalidTransition {
                pod: self.pod.clone(),
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(to)
    }
}
