//! Run configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ReplacerError, Result};

/// When a cycle with no newly observed pods counts as ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessMode {
    /// No new pod observed yet counts as ready.
    #[default]
    Lenient,
    /// At least one new `Running` pod must be observed.
    Strict,
}

/// Retry policy for transient pod directory errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per call, including the first one.
    #[serde(default = "RetryPolicy::default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before the first retry, in milliseconds.
    #[serde(default = "RetryPolicy::default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound on the backoff, in milliseconds.
    #[serde(default = "RetryPolicy::default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    const fn default_max_attempts() -> u32 {
        5
    }

    const fn default_initial_backoff() -> u64 {
        500
    }

    const fn default_max_backoff() -> u64 {
        10_000
    }

    /// Backoff before the first retry.
    #[must_use]
    pub const fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Backoff following `current`: doubled, capped at the maximum.
    #[must_use]
    pub fn next_backoff(&self, current: Duration) -> Duration {
        current
            .saturating_mul(2)
            .min(Duration::from_millis(self.max_backoff_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
            initial_backoff_ms: Self::default_initial_backoff(),
            max_backoff_ms: Self::default_max_backoff(),
        }
    }
}

/// Configuration for a rolling replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollConfig {
    /// Namespace containing the pods.
    #[serde(default = "RollConfig::default_namespace")]
    pub namespace: String,

    /// Label selector choosing the pods, e.g. `run=hello`.
    pub label_selector: String,

    /// Delay between polls, in seconds.
    #[serde(default = "RollConfig::default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// Maximum duration of each wait, in seconds. `0` waits forever.
    #[serde(default = "RollConfig::default_wait_timeout")]
    pub wait_timeout_seconds: u64,

    /// Readiness rule for cycles without newly observed pods.
    #[serde(default)]
    pub readiness: ReadinessMode,

    /// Retry policy for transient directory errors.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl RollConfig {
    fn default_namespace() -> String {
        "default".to_string()
    }

    const fn default_poll_interval() -> u64 {
        2
    }

    const fn default_wait_timeout() -> u64 {
        600 // 10 minutes
    }

    /// Create a config for `label_selector` in `namespace` with default timings.
    #[must_use]
    pub fn new(namespace: impl Into<String>, label_selector: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            label_selector: label_selector.into(),
            ..Default::default()
        }
    }

    /// Get the poll interval as a `Duration`.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    /// Get the wait timeout as a `Duration`, or `None` when waits are unbounded.
    #[must_use]
    pub const fn wait_timeout(&self) -> Option<Duration> {
        if self.wait_timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.wait_timeout_seconds))
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the selector or namespace is empty, the poll
    /// interval is zero, or the retry policy allows no attempts.
    pub fn validate(&self) -> Result<()> {
        if self.label_selector.trim().is_empty() {
            return Err(ReplacerError::Config(
                "a label selector is required".to_string(),
            ));
        }
        if self.namespace.trim().is_empty() {
            return Err(ReplacerError::Config("namespace must not be empty".to_string()));
        }
        if self.poll_interval_seconds == 0 {
            return Err(ReplacerError::Config(
                "poll interval must be at least one second".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ReplacerError::Config(
                "retry policy must allow at least one attempt".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RollConfig {
    fn default() -> Self {
        Self {
            namespace: Self::default_namespace(),
            label_selector: String::new(),
            poll_interval_seconds: Self::default_poll_interval(),
            wait_timeout_seconds: Self::default_wait_timeout(),
            readiness: ReadinessMode::default(),
            retry: RetryPolicy::default(),
        }
    }
}
