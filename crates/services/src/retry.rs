//! Bounded retry with exponential backoff for control-plane calls.

use std::future::Future;
use std::time::Duration;

use norman_api::ApiError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::ServiceError;

/// Retry settings for socket allocation.
///
/// Only errors the control plane classifies as retryable (transport
/// failures, 5xx, 429) are retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    /// Backoff cap.
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 250,
            max_delay_ms: 5_000,
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Calculates the delay after a failed attempt (1-based),
    /// with ±25% jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let base = self.initial_delay_ms as f64 * self.backoff_factor.powi(exp);
        let capped = base.min(self.max_delay_ms as f64);
        let offset: f64 = rand::thread_rng().gen_range(-1.0..1.0);
        let with_jitter = capped + capped * 0.25 * offset;
        Duration::from_secs_f64(with_jitter.max(0.0) / 1000.0)
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.max_attempts == 0 {
            return Err(ServiceError::Config("retry.max_attempts must be at least 1".into()));
        }
        if !(self.backoff_factor.is_finite() && self.backoff_factor >= 1.0) {
            return Err(ServiceError::Config(format!(
                "retry.backoff_factor must be >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        Ok(())
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// attempts run out. Cancellation interrupts both the call and the backoff.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: &'static str,
    mut op: F,
) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ServiceError::Cancelled);
            }
            result = op() => result,
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "control plane call failed, retrying"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(ServiceError::Cancelled);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn unavailable() -> ApiError {
        ApiError::Api {
            status: 503,
            body: "unavailable".into(),
        }
    }

    #[test]
    fn defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay_ms, 250);
        assert_eq!(policy.max_delay_ms, 5_000);
        assert!((policy.backoff_factor - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn delay_backoff_with_jitter() {
        let policy = RetryPolicy::default();
        // Base delays: 250ms, 500ms, 1s, 2s, 4s, 5s (capped), 5s...
        let expected_base = [0.25, 0.5, 1.0, 2.0, 4.0, 5.0, 5.0];
        for (i, &base) in expected_base.iter().enumerate() {
            let secs = policy.delay_for_attempt((i + 1) as u32).as_secs_f64();
            let lo = base * 0.74;
            let hi = base * 1.26;
            assert!(
                secs >= lo && secs <= hi,
                "attempt {}: {secs:.3}s not in [{lo:.3}, {hi:.3}]",
                i + 1
            );
        }
    }

    #[test]
    fn validate_rejects_zero_attempts() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert!(matches!(policy.validate(), Err(ServiceError::Config(_))));
        assert!(RetryPolicy::none().validate().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_retryable_errors() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let value = with_retry(&RetryPolicy::default(), &cancel, "allocate", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n < 2 { Err(unavailable()) } else { Ok(n) } }
        })
        .await
        .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let err = with_retry(&RetryPolicy::default(), &cancel, "allocate", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(unavailable()) }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, ServiceError::Api(ApiError::Api { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let err = with_retry(&RetryPolicy::default(), &cancel, "allocate", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(ApiError::Api {
                    status: 404,
                    body: "unknown model".into(),
                })
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, ServiceError::Api(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let policy = RetryPolicy {
            initial_delay_ms: 60_000,
            max_delay_ms: 60_000,
            ..RetryPolicy::default()
        };

        let canceller = {
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                cancel.cancel();
            }
        };
        let (result, ()) = tokio::join!(
            with_retry(&policy, &cancel, "allocate", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(unavailable()) }
            }),
            canceller
        );

        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
