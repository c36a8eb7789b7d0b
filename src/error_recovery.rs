//! Retry policy for whole visit allocations.
//
// The allocator itself never retries: a retry consumes more frames, so the decision
// belongs to the caller. Only faults reported as retryable by `VisitError` are tried
// again.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::error::VisitError;

/// Defines a policy for retrying an operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// The maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// The delay between attempts.
    pub backoff_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self::default()
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable fault, or the
/// policy's attempts are used up. The last fault is returned.
///
/// `operation` receives the 1-based attempt number.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, VisitError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, VisitError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < attempts => {
                warn!(attempt, max_attempts = attempts, "visit allocation failed, retrying: {err}");
                sleep(policy.backoff_delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
