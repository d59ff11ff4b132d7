//! Per-call-kind API usage counters.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::effects::GitHubEffect;

use super::rate_limit::Budget;

/// The kinds of remote call the engine makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ApiCall {
    GetIssue,
    GetPr,
    ListCommits,
    ListEvents,
    ListComments,
    GetCombinedStatus,
    ListOpenPrs,
    ListBranchCommits,
    PostComment,
    Merge,
}

impl ApiCall {
    pub fn of(effect: &GitHubEffect) -> Self {
        match effect {
            GitHubEffect::GetIssue { .. } => ApiCall::GetIssue,
            GitHubEffect::GetPr { .. } => ApiCall::GetPr,
            GitHubEffect::ListCommits { .. } => ApiCall::ListCommits,
            GitHubEffect::ListEvents { .. } => ApiCall::ListEvents,
            GitHubEffect::ListComments { .. } => ApiCall::ListComments,
            GitHubEffect::GetCombinedStatus { .. } => ApiCall::GetCombinedStatus,
            GitHubEffect::ListOpenPrs => ApiCall::ListOpenPrs,
            GitHubEffect::ListBranchCommits { .. } => ApiCall::ListBranchCommits,
            GitHubEffect::PostComment { .. } => ApiCall::PostComment,
            GitHubEffect::Merge { .. } => ApiCall::Merge,
        }
    }
}

impl fmt::Display for ApiCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CallCount {
    pub count: u64,
    /// Requests answered from the cache (locally or by a `304`).
    pub cached: u64,
}

#[derive(Debug)]
struct Counters {
    since: DateTime<Utc>,
    calls: BTreeMap<ApiCall, CallCount>,
}

/// Shared API usage counters.
#[derive(Debug)]
pub struct ApiAnalytics {
    counters: Mutex<Counters>,
}

/// Point-in-time view of API usage, served by `GET /api/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct ApiStats {
    pub since: DateTime<Utc>,
    pub total: u64,
    pub cached: u64,
    pub api_per_sec: f64,
    pub calls: BTreeMap<ApiCall, CallCount>,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

impl ApiAnalytics {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(Counters {
                since: Utc::now(),
                calls: BTreeMap::new(),
            }),
        }
    }

    pub fn record(&self, call: ApiCall, cached: bool) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = counters.calls.entry(call).or_default();
        entry.count += 1;
        if cached {
            entry.cached += 1;
        }
    }

    /// Zeroes all counters and restarts the rate window.
    pub fn reset(&self) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters.calls.clear();
        counters.since = Utc::now();
    }

    pub fn count(&self, call: ApiCall) -> CallCount {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters.calls.get(&call).copied().unwrap_or_default()
    }

    pub fn snapshot(&self, budget: Budget) -> ApiStats {
        self.snapshot_at(budget, Utc::now())
    }

    fn snapshot_at(&self, budget: Budget, now: DateTime<Utc>) -> ApiStats {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let total: u64 = counters.calls.values().map(|c| c.count).sum();
        let cached: u64 = counters.calls.values().map(|c| c.cached).sum();
        let elapsed = (now - counters.since).num_milliseconds() as f64 / 1000.0;
        let api_per_sec = if elapsed > 0.0 {
            (total - cached) as f64 / elapsed
        } else {
            0.0
        };
        ApiStats {
            since: counters.since,
            total,
            cached,
            api_per_sec,
            calls: counters.calls.clone(),
            remaining: budget.remaining,
            reset_at: budget.reset_at,
        }
    }
}

impl Default for ApiAnalytics {
    fn default() -> Self {
        Self::new()
    }
}
