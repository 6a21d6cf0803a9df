//! Retry Executor
//!
//! Bounded retries with linearly increasing backoff for oracle calls.
//!
//! **Algorithm:**
//! 1. Attempt operation
//! 2. If successful, return result
//! 3. On a transient failure:
//!    a. If attempts remain: log WARN, sleep `base_delay * attempt`, retry
//!    b. Otherwise: log ERROR, return a terminal failure naming the last cause
//!
//! Sleeping goes through [`Sleeper`] so tests can record delays instead of waiting.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use super::{AttemptError, TerminalOracleFailure};

/// Attempts per item before giving up
pub const MAX_RETRIES: u32 = 3;

/// Delay unit multiplied by the attempt number
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1500);

/// Retry policy: attempt bound and backoff as a function of attempt number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay after failed attempt `attempt` (1-based), before the next one
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(MAX_RETRIES, DEFAULT_BASE_DELAY)
    }
}

/// Suspension point between attempts
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real sleeping on the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Records requested delays without sleeping
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in order
    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(duration);
        }
    }
}

/// Run `operation` under `policy`.
///
/// `operation` receives the 1-based attempt number.
pub async fn retry_with_backoff<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    mut operation: F,
) -> Result<T, TerminalOracleFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        if attempt > 1 {
            tracing::debug!(operation = operation_name, attempt, "Retrying oracle call");
        }

        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        "Oracle call succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(cause) => {
                if attempt >= policy.max_attempts {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        error = %cause,
                        "Oracle call failed: retries exhausted"
                    );
                    return Err(TerminalOracleFailure {
                        attempts: attempt,
                        last_cause: cause,
                    });
                }

                let backoff = policy.backoff(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %cause,
                    "Oracle attempt failed, will retry after backoff"
                );

                sleeper.sleep(backoff).await;
            }
        }
    }
}
