//! Bounded exponential backoff for upstream calls.

use crate::config::RetryPolicy;
use crate::errors::AppError;
use failsafe::backoff;
use std::future::Future;
use std::time::Duration;

/// Delays to wait between attempts: `max_attempts - 1` exponential steps.
pub fn backoff_schedule(policy: &RetryPolicy) -> impl Iterator<Item = Duration> {
    let retries = policy.max_attempts.saturating_sub(1) as usize;
    backoff::exponential(policy.initial_delay, policy.max_delay.max(policy.initial_delay))
        .take(retries)
}

/// Runs `f` until it succeeds, fails with an error `should_retry` rejects,
/// or the policy runs out of attempts. The last error is returned.
///
/// A `Retry-After` hint longer than the scheduled delay is honoured, up to
/// `policy.max_delay`.
pub async fn retry_if<T, F, Fut, P>(
    policy: &RetryPolicy,
    operation: &str,
    should_retry: P,
    mut f: F,
) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
    P: Fn(&AppError) -> bool,
{
    let mut delays = backoff_schedule(policy);
    let mut attempt: u32 = 1;

    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if should_retry(&err) => {
                let Some(delay) = delays.next() else {
                    tracing::warn!(
                        "❌ {} failed after {} attempt(s): {}",
                        operation,
                        attempt,
                        err
                    );
                    return Err(err);
                };
                let ceiling = policy.max_delay.max(delay);
                let delay = err
                    .retry_after()
                    .map_or(delay, |hint| hint.clamp(delay, ceiling));
                tracing::warn!(
                    "⚠️ {} attempt {} failed ({}), retrying in {:?}",
                    operation,
                    attempt,
                    err,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// [`retry_if`] with the default predicate: rate limits and upstream outages.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, f: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    retry_if(policy, operation, AppError::is_retryable, f).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_schedule_is_bounded() {
        let delays: Vec<Duration> = backoff_schedule(&fast_policy(3)).collect();
        assert_eq!(delays.len(), 2);
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(4)));
        assert_eq!(backoff_schedule(&RetryPolicy::none()).count(), 0);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result = retry(&fast_policy(3), "test op", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(AppError::UpstreamUnavailable("boom".to_string()))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: Result<(), AppError> = retry(&fast_policy(3), "test op", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::RateLimit {
                service: "test".to_string(),
                retry_after: None,
            })
        })
        .await;

        assert!(result.unwrap_err().is_rate_limit());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: Result<(), AppError> = retry(&fast_policy(3), "test op", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::Authentication("bad credentials".to_string()))
        })
        .await;

        assert!(result.unwrap_err().is_authentication());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_is_capped_by_max_delay() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::default();

        let started = tokio::time::Instant::now();
        let result = retry(&policy, "test op", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(AppError::RateLimit {
                    service: "test".to_string(),
                    retry_after: Some(Duration::from_secs(86_400)),
                })
            } else {
                Ok(())
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() <= policy.max_delay + Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_retry_after_does_not_shorten_backoff() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::default();

        let started = tokio::time::Instant::now();
        let _ = retry(&policy, "test op", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err::<(), _>(AppError::RateLimit {
                    service: "test".to_string(),
                    retry_after: Some(Duration::from_millis(10)),
                })
            } else {
                Ok(())
            }
        })
        .await;

        assert!(started.elapsed() >= policy.initial_delay);
    }
}
