use crate::domain::error::{AppError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Exponential backoff: attempt `n` (counted from 1) that fails with a
/// retryable error waits `base_delay * 2^n` before attempt `n + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
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
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

/// Runs `operation` until it succeeds, fails with an error `is_retryable`
/// rejects, or the policy runs out of attempts.
pub async fn retry_with_backoff<T, F, Fut, P>(
    policy: &RetryPolicy,
    is_retryable: P,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&AppError) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if is_retryable(&err) => {
                if attempt < max_attempts {
                    let delay = policy.delay_after(attempt);
                    warn!(
                        attempt,
                        delay_secs = delay.as_secs_f64(),
                        error = %err,
                        "Attempt failed with a transient error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                } else {
                    warn!(attempt, error = %err, "Final attempt failed with a transient error");
                }
                last_error = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    let detail = last_error
        .map(|err| format!(" Last error: {}", err.reason()))
        .unwrap_or_default();
    Err(AppError::GenerationExhausted(format!(
        "AI content generation failed after multiple retries.{}",
        detail
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[test]
    fn test_default_schedule_is_two_then_four_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_overloads_then_success() {
        let calls = Mutex::new(Vec::new());
        let policy = RetryPolicy::default();

        let result = retry_with_backoff(&policy, AppError::is_overloaded, || {
            let attempt = {
                let mut calls = calls.lock().unwrap();
                calls.push(Instant::now());
                calls.len()
            };
            async move {
                if attempt < 3 {
                    Err(AppError::LLMOverloaded("503".to_string()))
                } else {
                    Ok("Join us!".to_string())
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "Join us!");
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1] - calls[0], Duration::from_secs(2));
        assert_eq!(calls[2] - calls[1], Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_overload_exhausts_retries() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let result: Result<String> = retry_with_backoff(&policy, AppError::is_overloaded, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::LLMOverloaded("503".to_string())) }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        match result {
            Err(AppError::GenerationExhausted(msg)) => {
                assert!(msg.contains("failed after multiple retries"))
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_are_not_retried() {
        let attempts = AtomicU32::new(0);
        let started = Instant::now();

        let result: Result<String> =
            retry_with_backoff(&RetryPolicy::default(), AppError::is_overloaded, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(AppError::LLMError("API error (400)".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(AppError::LLMError(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
