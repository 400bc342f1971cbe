//! Bounded retries with a named backoff curve.
//!
//! Ingress writes back off linearly (`base * attempt`); everything on the
//! processing side, credential acquisition included, backs off exponentially
//! (`base * 2^(attempt - 1)`). Only errors that report themselves as
//! transient are retried; anything else is returned on the first failure.

use crate::errors::{InfraError, PipelineError};
use std::{fmt::Display, future::Future, time::Duration};
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub const fn linear(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff: Backoff::Linear,
        }
    }

    pub const fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff: Backoff::Exponential,
        }
    }

    /// Sleep taken after the `failed_attempts`-th consecutive failure (1-based).
    pub fn delay_after(&self, failed_attempts: u32) -> Duration {
        let n = failed_attempts.max(1);
        let factor = match self.backoff {
            Backoff::Linear => n,
            Backoff::Exponential => 1u32.checked_shl(n - 1).unwrap_or(u32::MAX),
        };
        self.base_delay.saturating_mul(factor)
    }
}

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

impl Retryable for InfraError {
    fn is_transient(&self) -> bool {
        InfraError::is_transient(self)
    }
}

impl Retryable for PipelineError {
    fn is_transient(&self) -> bool {
        match self {
            PipelineError::Infrastructure(inner) => inner.is_transient(),
            _ => false,
        }
    }
}

/// Run `op` under `policy`, retrying transient failures.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, operation: &str, op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    retry_if(policy, operation, op, |err: &E| err.is_transient()).await
}

/// Like [`retry`], with the caller deciding which errors are worth another attempt.
pub async fn retry_if<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !should_retry(&err) => return Err(err),
            Err(err) if attempt >= max_attempts => {
                error!(
                    operation,
                    attempts = attempt,
                    error = %err,
                    "giving up after max retries"
                );
                return Err(err);
            }
            Err(err) => {
                let delay = policy.delay_after(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io,
        sync::atomic::{AtomicU32, Ordering},
    };
    use tokio::time::Instant;

    const BASE: Duration = Duration::from_secs(2);

    fn transient() -> InfraError {
        InfraError::Io(io::Error::other("connection reset"))
    }

    #[test]
    fn linear_and_exponential_curves_diverge() {
        let linear = RetryPolicy::linear(5, BASE);
        let exponential = RetryPolicy::exponential(5, BASE);

        let lin: Vec<u64> = (1..=4).map(|n| linear.delay_after(n).as_secs()).collect();
        let exp: Vec<u64> = (1..=4).map(|n| exponential.delay_after(n).as_secs()).collect();

        assert_eq!(lin, vec![2, 4, 6, 8]);
        assert_eq!(exp, vec![2, 4, 8, 16]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_returns_the_last_error_after_two_sleeps() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let start = Instant::now();

        let result: Result<(), InfraError> =
            retry(&RetryPolicy::exponential(3, BASE), "put_item", || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            })
            .await;

        assert!(matches!(result, Err(InfraError::Io(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 2s before attempt 2, 4s before attempt 3, nothing after the last.
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn linear_policy_sleeps_base_times_attempt() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let start = Instant::now();

        let result: Result<(), InfraError> =
            retry(&RetryPolicy::linear(4, BASE), "put_object", || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(2 + 4 + 6));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_when_a_later_attempt_succeeds() {
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result = retry(&RetryPolicy::exponential(3, BASE), "copy_object", || async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(transient())
            } else {
                Ok("copied")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "copied");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let start = Instant::now();

        let result: Result<(), PipelineError> =
            retry(&RetryPolicy::linear(3, BASE), "validate", || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(PipelineError::validation("bad input"))
            })
            .await;

        assert!(matches!(result, Err(PipelineError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_if_uses_the_callers_predicate() {
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), PipelineError> = retry_if(
            &RetryPolicy::exponential(3, BASE),
            "authenticate",
            || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(PipelineError::Authentication("key file unreadable".into()))
            },
            |err| matches!(err, PipelineError::Authentication(_)),
        )
        .await;

        assert!(matches!(result, Err(PipelineError::Authentication(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
