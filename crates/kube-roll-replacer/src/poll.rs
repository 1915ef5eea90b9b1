//! Fixed-interval polling with timeout and cancellation.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ReplacerError, Result};

/// Schedule for a sleep-then-probe loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poller {
    interval: Duration,
    timeout: Option<Duration>,
}

/// Value produced by a successful poll and the number of probes it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polled<T> {
    /// The probe's result.
    pub value: T,
    /// Probes run, including the successful one.
    pub attempts: u32,
}

impl Poller {
    /// Create a poller. A `timeout` of `None` polls until the probe succeeds.
    #[must_use]
    pub const fn new(interval: Duration, timeout: Option<Duration>) -> Self {
        Self { interval, timeout }
    }

    /// Sleep one interval, run `probe`, and repeat until it yields a value.
    ///
    /// The probe is always given a chance to run before the timeout is checked,
    /// so a wait never fails without at least one look.
    ///
    /// # Errors
    ///
    /// Returns the probe's error, `ReplacerError::Timeout` once the timeout has
    /// elapsed, or `ReplacerError::Cancelled` when `cancel` fires.
    pub async fn until<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        waiting_for: &str,
        mut probe: F,
    ) -> Result<Polled<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let started = Instant::now();
        let mut attempts = 0;

        loop {
            tokio::select! {
                () = cancel.cancelled() => return Err(ReplacerError::Cancelled),
                () = tokio::time::sleep(self.interval) => {}
            }

            attempts += 1;
            if let Some(value) = probe().await? {
                return Ok(Polled { value, attempts });
            }

            let waited = started.elapsed();
            if self.timeout.is_some_and(|limit| waited >= limit) {
                return Err(ReplacerError::Timeout {
                    waiting_for: waiting_for.to_string(),
                    waited,
                });
            }
        }
    }
}
