//! Exponential backoff for GitHub reads and for polling computed state.
//!
//! Two fixed schedules are used:
//!
//! - `DEFAULT`: 3 retries at 2s, 4s, 8s for transient API failures on reads.
//! - `MERGEABILITY`: 5 polls at 2s, 4s, 8s, 16s, 30s while GitHub is still
//!   computing a PR's `mergeable` flag (about one minute in total).
//!
//! Only transient errors are retried. Permanent errors and SHA mismatches
//! return immediately, and mutations are never retried at this layer.

use std::future::Future;
use std::time::Duration;

use super::error::{GitHubApiError, GitHubErrorKind};

/// Configuration for exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Cap for the exponential growth.
    pub max_delay: Duration,

    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Retry schedule for transient failures on reads: 2s, 4s, 8s.
    pub const DEFAULT: Self = Self {
        max_retries: 3,
        initial_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(16),
        backoff_multiplier: 2.0,
    };

    /// Poll schedule while mergeability is unknown: 2s doubling, 30s cap,
    /// 60s total.
    pub const MERGEABILITY: Self = Self {
        max_retries: 5,
        initial_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(30),
        backoff_multiplier: 2.0,
    };

    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// A schedule that never sleeps, for tests.
    pub fn immediate(max_retries: u32) -> Self {
        Self::new(max_retries, Duration::ZERO, Duration::ZERO, 1.0)
    }

    /// Computes the delay for the given retry attempt (0-indexed).
    ///
    /// `initial_delay * backoff_multiplier^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.powi(attempt as i32);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        let capped_secs = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped_secs)
    }

    /// Returns an iterator over all retry delays.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).map(|attempt| self.delay_for_attempt(attempt))
    }

    /// Sum of all delays.
    pub fn total_max_wait(&self) -> Duration {
        self.delays().sum()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Retry policy for controlling retry behavior at runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Retry transient errors with exponential backoff.
    #[default]
    RetryTransient,

    /// Do not retry: return errors immediately.
    NoRetry,
}

/// Result of a retried operation.
#[derive(Debug)]
pub enum RetryResult<T> {
    Success(T),

    /// A transient error persisted through every attempt.
    ExhaustedRetries {
        last_error: GitHubApiError,
        /// Attempts made, including the initial one.
        attempts: u32,
    },

    PermanentError(GitHubApiError),

    /// The PR head moved under a SHA-guarded merge.
    ShaMismatch(GitHubApiError),
}

impl<T> RetryResult<T> {
    /// Converts to a Result, treating every non-success outcome as Err.
    pub fn into_result(self) -> Result<T, GitHubApiError> {
        match self {
            RetryResult::Success(v) => Ok(v),
            RetryResult::ExhaustedRetries { last_error, .. } => Err(last_error),
            RetryResult::PermanentError(e) => Err(e),
            RetryResult::ShaMismatch(e) => Err(e),
        }
    }
}

/// Executes an async operation, retrying transient errors per `config`.
pub async fn retry_with_backoff<T, F, Fut>(
    config: RetryConfig,
    policy: RetryPolicy,
    mut operation: F,
) -> RetryResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GitHubApiError>>,
{
    let mut attempt = 0;
    let max_attempts = if policy == RetryPolicy::NoRetry {
        1
    } else {
        config.max_retries + 1
    };

    loop {
        match operation().await {
            Ok(value) => return RetryResult::Success(value),
            Err(e) => {
                attempt += 1;

                match e.kind {
                    GitHubErrorKind::Permanent => return RetryResult::PermanentError(e),
                    GitHubErrorKind::ShaMismatch => return RetryResult::ShaMismatch(e),
                    GitHubErrorKind::Transient => {
                        if attempt >= max_attempts {
                            return RetryResult::ExhaustedRetries {
                                last_error: e,
                                attempts: attempt,
                            };
                        }

                        let delay = config.delay_for_attempt(attempt - 1);
                        tracing::debug!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "retrying transient GitHub error"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}
