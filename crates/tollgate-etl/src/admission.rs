//! The caller's half of the admission protocol.
//!
//! The limiter only says how long to wait. This module does the waiting on
//! tokio timers, outside any lock, makes the call, and feeds the outcome
//! back so the limiter can back off or heal.

use std::future::Future;
use std::time::Duration;

use tollgate_core::RateLimiter;

use crate::error::{IngestError, IngestResult};

/// How patient a caller is with the limiter.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RetryPolicy {
    /// Abandon the call instead of sleeping longer than this.
    pub max_wait: Option<Duration>,
}

/// Waits until the limiter admits a call for `key`.
///
/// Backoff and quota refusals are slept through and re-asked; a granted
/// admission is slept through once and returned.
///
/// # Errors
/// Returns [`IngestError::WaitExceeded`] when any single wait is longer
/// than `policy.max_wait`. If that wait belonged to a granted admission,
/// the limiter has already counted the call.
pub async fn wait_for_admission(
    limiter: &RateLimiter,
    key: &str,
    policy: &RetryPolicy,
) -> IngestResult<()> {
    loop {
        let admission = limiter.admit(Some(key));
        let wait = admission.wait();

        if let Some(max_wait) = policy.max_wait {
            if wait > max_wait {
                return Err(IngestError::WaitExceeded {
                    key: key.to_string(),
                    wait,
                });
            }
        }

        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        if admission.is_granted() {
            return Ok(());
        }
    }
}

/// Runs `op` for `key` under the limiter, retrying transient failures.
///
/// Each attempt waits for admission, runs the call and reports the outcome.
/// Transient errors (HTTP failures, provider throttling) start a backoff
/// and are retried while [`RateLimiter::should_retry`] allows. Permanent
/// errors are returned as-is and leave the failure state alone, since the
/// provider itself answered.
///
/// # Errors
/// - [`IngestError::RetriesExhausted`] wrapping the last transient error.
/// - [`IngestError::WaitExceeded`] from [`wait_for_admission`].
/// - Any non-transient error returned by `op`.
pub async fn call_with_admission<T, F, Fut>(
    limiter: &RateLimiter,
    key: &str,
    policy: &RetryPolicy,
    mut op: F,
) -> IngestResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = IngestResult<T>>,
{
    let mut attempts = 0u32;

    loop {
        wait_for_admission(limiter, key, policy).await?;
        attempts += 1;

        match op().await {
            Ok(value) => {
                limiter.record_success();
                return Ok(value);
            }
            Err(err) if err.is_transient() => {
                limiter.record_failure(err.is_rate_limit());
                if !limiter.should_retry() {
                    return Err(IngestError::RetriesExhausted {
                        key: key.to_string(),
                        attempts,
                        last: Box::new(err),
                    });
                }
                log::debug!("Attempt {} for {} failed, will retry: {}", attempts, key, err);
            }
            Err(err) => return Err(err),
        }
    }
}
