//! Merges-per-day estimate.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

const HALF_LIFE_HOURS: f64 = 2.0;

/// Merges closer together than this do not move the estimate.
const MIN_GAP_SECS: i64 = 5 * 60;

/// Exponentially weighted merges-per-day estimate.
///
/// Each merge contributes an instantaneous rate of `24h / gap`, weighted by
/// `1 - 0.5^(gap / 2h)`: a long gap mostly replaces the old estimate, a
/// short one barely moves it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MergeRate {
    per_day: f64,
    last_merge: DateTime<Utc>,
}

impl MergeRate {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self::with_rate(0.0, now)
    }

    pub fn with_rate(per_day: f64, last_merge: DateTime<Utc>) -> Self {
        Self {
            per_day,
            last_merge,
        }
    }

    pub fn per_day(&self) -> f64 {
        self.per_day
    }

    pub fn last_merge(&self) -> DateTime<Utc> {
        self.last_merge
    }

    /// Folds in a merge that happened at `now`.
    pub fn record_merge(&mut self, now: DateTime<Utc>) {
        let gap = now - self.last_merge;
        if gap < Duration::seconds(MIN_GAP_SECS) {
            return;
        }
        self.per_day = blend(self.per_day, gap);
        self.last_merge = now;
    }

    /// The estimate as of `now`, counting the current quiet stretch once it
    /// runs longer than the gap the estimate predicts.
    pub fn with_tail(&self, now: DateTime<Utc>) -> f64 {
        if self.per_day <= 0.0 {
            return self.per_day;
        }
        let since = now - self.last_merge;
        let expected_hours = 24.0 / self.per_day;
        if hours(since) <= expected_hours {
            return self.per_day;
        }
        blend(self.per_day, since)
    }
}

fn hours(d: Duration) -> f64 {
    d.num_milliseconds() as f64 / 3_600_000.0
}

fn blend(previous: f64, gap: Duration) -> f64 {
    let gap_hours = hours(gap);
    if gap_hours <= 0.0 {
        return previous;
    }
    let instant = 24.0 / gap_hours;
    let weight = 1.0 - 0.5f64.powf(gap_hours / HALF_LIFE_HOURS);
    weight * instant + (1.0 - weight) * previous
}
