// src/utils/retry.rs

//! Retry and timeout helpers for async operations.

use std::future::Future;
use std::time::Duration;

use crate::error::{AppError, Result};

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same delay after every failure
    Fixed,
    /// `base * attempt`
    Linear,
    /// `base * multiplier^(attempt - 1)`
    Exponential { multiplier: f64 },
}

/// Attempt budget and delay schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: Backoff,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            backoff: Backoff::Fixed,
            max_delay: delay,
        }
    }

    pub fn linear(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff: Backoff::Linear,
            max_delay: Duration::from_secs(60),
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff: Backoff::Exponential { multiplier },
            max_delay: Duration::from_secs(60),
        }
    }

    /// A single attempt with no waiting.
    pub fn none() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Linear => self.base_delay.saturating_mul(attempt),
            Backoff::Exponential { multiplier } => {
                let factor = multiplier.max(1.0).powi(attempt as i32 - 1);
                self.base_delay.mul_f64(factor.min(1e6))
            }
        };
        delay.min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::linear(3, Duration::from_secs(1))
    }
}

/// Run `op` until it succeeds or the attempt budget is spent.
///
/// Non-transient errors (see [`AppError::is_transient`]) stop immediately.
/// Returns the last error when every attempt fails.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts && e.is_transient() => {
                let delay = policy.delay_for(attempt);
                log::debug!(
                    "{} failed (attempt {}/{}): {}; retrying in {}ms",
                    label,
                    attempt,
                    attempts,
                    e,
                    delay.as_millis()
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Await `fut`, failing with [`AppError::Timeout`] once `duration` elapses.
pub async fn with_timeout<T, Fut>(duration: Duration, label: &str, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::timeout(label, duration)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn test_delay_schedules() {
        let linear = RetryPolicy::linear(3, Duration::from_millis(1000));
        assert_eq!(linear.delay_for(1), Duration::from_millis(1000));
        assert_eq!(linear.delay_for(2), Duration::from_millis(2000));

        let fixed = RetryPolicy::fixed(3, Duration::from_secs(2));
        assert_eq!(fixed.delay_for(3), Duration::from_secs(2));

        let exp = RetryPolicy::exponential(5, Duration::from_millis(100), 2.0);
        assert_eq!(exp.delay_for(1), Duration::from_millis(100));
        assert_eq!(exp.delay_for(4), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_is_capped() {
        let mut policy = RetryPolicy::exponential(10, Duration::from_secs(1), 10.0);
        policy.max_delay = Duration::from_secs(5);
        assert_eq!(policy.delay_for(8), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(3, Duration::ZERO);
        let value = retry(&policy, "flaky", |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AppError::storage("503"))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(5, Duration::ZERO);
        let result: Result<()> = retry(&policy, "permanent", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::validation("bad input")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_returns_last_error() {
        let policy = RetryPolicy::fixed(2, Duration::ZERO);
        let result: Result<()> = retry(&policy, "always", |attempt| async move {
            Err(AppError::storage(format!("attempt {attempt}")))
        })
        .await;
        assert_eq!(result.unwrap_err().to_string(), "Storage error: attempt 2");
    }

    #[tokio::test]
    async fn test_with_timeout_elapses() {
        let result: Result<()> = with_timeout(Duration::from_millis(10), "probe", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(AppError::Timeout { .. })));
    }
}
