//! GitHub API client and effect interpreter.
//!
//! This module provides the `GitHubInterpreter` implementation the engine
//! runs against in production.
//!
//! Key features:
//! - Quota gate fed by the `x-ratelimit-*` response headers
//! - ETag / max-age response cache, in memory or on disk
//! - Per-call-kind usage counters
//! - Exponential backoff retry for transient failures on reads
//! - Distinguishes transient vs permanent errors

mod analytics;
mod cache;
mod client;
mod error;
mod interpreter;
mod rate_limit;
mod retry;

pub use analytics::{ApiAnalytics, ApiCall, ApiStats, CallCount};
pub use cache::{CacheStore, CachedResponse, ResponseCache, normalize_key};
pub use client::{DEFAULT_CACHE_BYTES, Mutation, OctocrabClient};
pub use error::{GitHubApiError, GitHubErrorKind};
pub use rate_limit::{Budget, RateLimiter};
pub use retry::{RetryConfig, RetryPolicy, RetryResult, retry_with_backoff};
