//! Bounded retry with exponential backoff for pod directory calls.

use std::future::Future;

use kube_roll_directory::DirectoryError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::RetryPolicy;
use crate::error::{ReplacerError, Result};

/// Run `call`, retrying transient directory errors according to `policy`.
///
/// # Errors
///
/// Returns the first permanent error, the last transient error once
/// `policy.max_attempts` is reached, or `ReplacerError::Cancelled` if `cancel`
/// fires while a call is in flight or during a backoff.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: &str,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, DirectoryError>>,
{
    let mut attempt = 1;
    let mut backoff = policy.initial_backoff();

    loop {
        // A call that is already complete wins over a concurrent cancellation
        let result = tokio::select! {
            biased;
            result = call() => result,
            () = cancel.cancelled() => return Err(ReplacerError::Cancelled),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retriable() && attempt < policy.max_attempts => {
                warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Transient pod directory error, retrying"
                );

                tokio::select! {
                    () = cancel.cancelled() => return Err(ReplacerError::Cancelled),
                    () = tokio::time::sleep(backoff) => {}
                }

                attempt += 1;
                backoff = policy.next_backoff(backoff);
            }
            Err(err) => return Err(err.into()),
        }
    }
}
