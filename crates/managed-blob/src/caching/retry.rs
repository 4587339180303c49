use std::future::Future;
use std::time::Duration;

use super::{BlobKey, BlobResult};

/// How often and how patiently a failed write is retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: usize,
    /// The delay after the first failed attempt. Later delays grow linearly.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// The delay to wait after the given (1-based) failed attempt.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let attempt = u32::try_from(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(attempt)
    }
}

/// Run a fallible operation until it succeeds or the [`RetryPolicy`] is exhausted.
///
/// Errors that are not [retryable](super::BlobError::is_retryable) are returned right away.
/// After exhaustion, the error of the last attempt is returned.
pub async fn retry<G, F, T>(policy: &RetryPolicy, key: &BlobKey, mut task_gen: G) -> BlobResult<T>
where
    G: FnMut() -> F,
    F: Future<Output = BlobResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let error = match task_gen().await {
            Ok(value) => break Ok(value),
            Err(error) => error,
        };

        if !error.is_retryable() || attempt >= max_attempts {
            break Err(error);
        }

        let delay = policy.delay_for_attempt(attempt);
        tracing::debug!(
            error = &error as &dyn std::error::Error,
            key = %key,
            attempt,
            "Attempt failed, retrying in {:?}",
            delay
        );
        metric!(counter("blob.write.retry") += 1, "slot" => key.slot.as_str());

        tokio::time::sleep(delay).await;
    }
}
