//! Bounded exponential backoff.

use crate::error::ResilienceError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt (ms).
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Cap on any single delay (ms).
    pub max_delay_ms: u64,
    /// Spread each delay by up to ±25%.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter: false,
        }
    }
}

/// Why a retried call gave up.
#[derive(Debug)]
pub struct RetryFailure {
    /// Attempts actually made.
    pub attempts: u32,
    /// The last error seen.
    pub error: ResilienceError,
}

impl RetryFailure {
    /// Converts into the error reported for `operation_count` operations.
    ///
    /// Non-recoverable errors stopped the loop at once and pass through
    /// unchanged; exhausted recoverable errors become
    /// [`ResilienceError::BatchOperation`].
    pub fn into_error(self, operation_count: usize) -> ResilienceError {
        if self.error.is_recoverable() {
            ResilienceError::BatchOperation {
                operation_count,
                attempts: self.attempts,
                source: Box::new(self.error),
            }
        } else {
            self.error
        }
    }
}

/// Runs a fallible async call with bounded exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryController {
    config: RetryConfig,
}

impl RetryController {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay to wait after failed attempt number `attempt` (1-based),
    /// before jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let ms = self.config.initial_delay_ms as f64 * self.config.backoff_multiplier.powi(exp);
        Duration::from_millis(ms.min(self.config.max_delay_ms as f64) as u64)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.config.jitter || delay.is_zero() {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(0.75..=1.25);
        delay.mul_f64(factor)
    }

    /// Calls `attempt_fn` until it succeeds, fails non-recoverably, or the
    /// attempt budget runs out. `attempt_fn` receives the 1-based attempt
    /// number. The backoff sleep is a plain tokio sleep; dropping the
    /// returned future cancels the loop.
    pub async fn run<T, F, Fut>(&self, mut attempt_fn: F) -> Result<T, RetryFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match attempt_fn(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if !error.is_recoverable() => {
                    debug!(attempt, %error, "non-recoverable error, not retrying");
                    return Err(RetryFailure {
                        attempts: attempt,
                        error,
                    });
                }
                Err(error) if attempt >= max_attempts => {
                    warn!(attempts = attempt, %error, "retries exhausted");
                    return Err(RetryFailure {
                        attempts: attempt,
                        error,
                    });
                }
                Err(error) => {
                    let delay = self.jittered(self.delay_for(attempt));
                    debug!(attempt, ?delay, %error, "recoverable error, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryController {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
