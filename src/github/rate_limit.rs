//! Client-side quota gate for the GitHub REST API.
//!
//! GitHub reports the remaining budget and the reset time on every response
//! (`x-ratelimit-remaining`, `x-ratelimit-reset`). The limiter mirrors those
//! values and makes callers sleep until the window resets once the budget
//! drops to the configured reserve. The reserve keeps some quota available for
//! humans sharing the token.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use http::HeaderMap;
use serde::Serialize;

const REMAINING_HEADER: &str = "x-ratelimit-remaining";
const RESET_HEADER: &str = "x-ratelimit-reset";

/// Calls left to spend before the first response tells us the real figure.
const OPTIMISTIC_HEADROOM: u64 = 500;

/// The last known quota state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Budget {
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

/// Blocks callers when the API quota is nearly spent.
#[derive(Debug)]
pub struct RateLimiter {
    budget: Mutex<Budget>,
    reserve: u64,
    margin: Duration,
}

impl RateLimiter {
    /// Default number of calls held back from the bot.
    pub const DEFAULT_RESERVE: u64 = 250;

    /// Slack added after the advertised reset time before calling again.
    pub const DEFAULT_MARGIN: Duration = Duration::from_secs(60);

    pub fn new(reserve: u64, margin: Duration) -> Self {
        let budget = Budget {
            remaining: reserve + OPTIMISTIC_HEADROOM,
            reset_at: Utc::now() + chrono::Duration::minutes(1),
        };
        Self::with_budget(budget, reserve, margin)
    }

    pub fn with_budget(budget: Budget, reserve: u64, margin: Duration) -> Self {
        Self {
            budget: Mutex::new(budget),
            reserve,
            margin,
        }
    }

    pub fn budget(&self) -> Budget {
        *self.budget.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits for permission to issue one request.
    ///
    /// While the budget is above the reserve this decrements it and returns.
    /// Otherwise it sleeps until `reset_at + margin`; a reset time already in
    /// the past means no sleep at all. The budget is not re-checked after the
    /// sleep: the next response overwrites it with the server's figure.
    pub async fn acquire(&self) {
        let wait = {
            let mut budget = self.budget.lock().unwrap_or_else(PoisonError::into_inner);
            if budget.remaining > self.reserve {
                budget.remaining -= 1;
                return;
            }
            let wake_at = budget.reset_at
                + chrono::Duration::from_std(self.margin).unwrap_or_else(|_| chrono::Duration::zero());
            (wake_at - Utc::now()).to_std().ok().map(|d| (d, budget.reset_at))
        };

        if let Some((sleep_for, reset_at)) = wait {
            tracing::error!(
                sleep_secs = sleep_for.as_secs_f64(),
                reset_at = %reset_at,
                reserve = self.reserve,
                "*****************************************************************\n\
                 GitHub API quota exhausted: sleeping until the rate limit resets.\n\
                 The submit queue is polling too aggressively for its token.\n\
                 *****************************************************************"
            );
            tokio::time::sleep(sleep_for).await;
        }
    }

    /// Records the quota reported by a response.
    ///
    /// The server is authoritative, so the stored values are overwritten.
    /// Responses missing either header leave the budget untouched.
    pub fn after_response(&self, headers: &HeaderMap) {
        let remaining = header_u64(headers, REMAINING_HEADER);
        let reset = header_u64(headers, RESET_HEADER)
            .and_then(|epoch| Utc.timestamp_opt(epoch as i64, 0).single());
        if let (Some(remaining), Some(reset_at)) = (remaining, reset) {
            self.update(remaining, reset_at);
        }
    }

    pub fn update(&self, remaining: u64, reset_at: DateTime<Utc>) {
        let mut budget = self.budget.lock().unwrap_or_else(PoisonError::into_inner);
        *budget = Budget {
            remaining,
            reset_at,
        };
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_RESERVE, Self::DEFAULT_MARGIN)
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use tokio::time::Instant;

    #[tokio::test]
    async fn acquire_spends_budget_above_reserve() {
        let limiter = RateLimiter::with_budget(
            Budget {
                remaining: 12,
                reset_at: Utc::now(),
            },
            10,
            Duration::ZERO,
        );
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(limiter.budget().remaining, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_sleeps_until_reset() {
        let limiter = RateLimiter::with_budget(
            Budget {
                remaining: 0,
                reset_at: Utc::now() + chrono::Duration::seconds(2),
            },
            0,
            Duration::ZERO,
        );

        let start = Instant::now();
        limiter.acquire().await;
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(1500), "slept {:?}", elapsed);
        assert!(elapsed <= Duration::from_millis(2500), "slept {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn past_reset_does_not_sleep() {
        let limiter = RateLimiter::with_budget(
            Budget {
                remaining: 0,
                reset_at: Utc::now() - chrono::Duration::seconds(30),
            },
            0,
            Duration::ZERO,
        );

        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[test]
    fn response_headers_overwrite_budget() {
        let limiter = RateLimiter::default();
        let mut headers = HeaderMap::new();
        headers.insert(REMAINING_HEADER, HeaderValue::from_static("4711"));
        headers.insert(RESET_HEADER, HeaderValue::from_static("1700000000"));
        limiter.after_response(&headers);

        let budget = limiter.budget();
        assert_eq!(budget.remaining, 4711);
        assert_eq!(budget.reset_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn missing_headers_leave_budget_alone() {
        let limiter = RateLimiter::with_budget(
            Budget {
                remaining: 42,
                reset_at: Utc::now(),
            },
            0,
            Duration::ZERO,
        );
        let mut headers = HeaderMap::new();
        headers.insert(REMAINING_HEADER, HeaderValue::from_static("7"));
        limiter.after_response(&headers);
        assert_eq!(limiter.budget().remaining, 42);
    }
}
