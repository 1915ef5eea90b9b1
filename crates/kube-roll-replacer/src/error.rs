//! Error types for the replacer crate.

use std::time::Duration;

use kube_roll_directory::DirectoryError;
use thiserror::Error;

use crate::lifecycle::CycleState;

/// Errors that can end a rolling replacement.
#[derive(Error, Debug)]
pub enum ReplacerError {
    /// The pod directory failed with a permanent error, or retries ran out.
    #[error("pod directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// A wait exceeded its configured maximum.
    #[error("timed out after {}s waiting for {waiting_for}", .waited.as_secs())]
    Timeout {
        /// What was being waited for.
        waiting_for: String,
        /// How long the wait lasted.
        waited: Duration,
    },

    /// The run was cancelled by the operator.
    #[error("cancelled")]
    Cancelled,

    /// The run configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// A cycle attempted an out-of-order state change.
    #[error("invalid cycle transition for pod {pod}: {from} -> {to}")]
    InvalidTransition {
        /// The pod whose cycle was running.
        pod: String,
        /// Current state.
        from: CycleState,
        /// Attempted state.
        to: CycleState,
    },
}

impl ReplacerError {
    /// Returns true if re-running might get past this error.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        match self {
            Self::Directory(e) => e.is_retriable(),
            Self::Timeout { .. } => true,
            Self::Cancelled | Self::Config(_) | Self::InvalidTransition { .. } => false,
        }
    }

    /// Process exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Directory(_) | Self::InvalidTransition { .. } => 1,
            Self::Config(_) => 2,
            Self::Timeout { .. } => 3,
            Self::Cancelled => 130,
        }
    }
}

/// A specialized Result type for replacer operations.
pub type Result<T> = std::result::Result<T, ReplacerError>;
