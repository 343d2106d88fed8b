//! Bounded retry with jittered backoff for store operations
//!
//! Retry lives in the adapter layer so the facade and semantic cache stay
//! retry-agnostic; every attempt carries its own timeout.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::domain::CacheError;

/// Bounded retry policy applied around each store operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Base delay for the backoff schedule.
    pub base_delay: Duration,
    /// Cap on any single backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(25),
            max_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Exponential backoff for the given attempt (1-based) with up to 50%
    /// additive jitter, capped at `max_delay`.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(self.max_delay);
        let jitter_micros = capped.as_micros() as u64 / 2;
        let jitter = if jitter_micros == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(rand::thread_rng().gen_range(0..=jitter_micros))
        };
        capped + jitter
    }

    /// Runs `op` up to `max_attempts` times, each attempt bounded by
    /// `op_timeout`. Returns the last error if all attempts fail.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        op_timeout: Duration,
        mut op: F,
    ) -> Result<T, CacheError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CacheError>>,
    {
        let mut last_error = CacheError::timeout(operation);

        for attempt in 1..=self.max_attempts {
            match tokio::time::timeout(op_timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    tracing::debug!(
                        operation,
                        attempt,
                        error = %e,
                        "store operation failed"
                    );
                    last_error = e;
                }
                Err(_) => {
                    tracing::debug!(operation, attempt, "store operation timed out");
                    last_error = CacheError::timeout(operation);
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.backoff_delay(attempt)).await;
            }
        }

        Err(last_error)
    }
}
