//! Aggregate CI health.
//!
//! Stability is a cross-PR signal: when a gating CI job on the base branch
//! is not green, nothing may merge. Every full poll pass appends a
//! [`HealthRecord`]; records older than a day are dropped and the
//! [`HealthSummary`] is recomputed from what remains.

mod rate;
mod source;

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

pub use rate::MergeRate;
pub use source::BranchStatusSource;

const HISTORY_HOURS: i64 = 24;

/// Last known state of one CI job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    Stable,
    NotStable,
    /// Not reported yet, or the check itself failed.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildInfo {
    pub state: BuildState,
    pub gating: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl BuildInfo {
    pub fn is_stable(&self) -> bool {
        self.state == BuildState::Stable
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthRecord {
    pub time: DateTime<Utc>,
    pub stable: bool,
    pub jobs: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HealthSummary {
    pub total_loops: u64,
    pub num_stable: u64,
    pub num_stable_per_job: BTreeMap<String, u64>,
    pub merge_possible_now: bool,
}

/// Build states, pass history and merge rate.
#[derive(Debug, Clone)]
pub struct CiHealth {
    builds: BTreeMap<String, BuildInfo>,
    history: VecDeque<HealthRecord>,
    summary: HealthSummary,
    merge_rate: MergeRate,
}

impl CiHealth {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            builds: BTreeMap::new(),
            history: VecDeque::new(),
            summary: HealthSummary::default(),
            merge_rate: MergeRate::new(now),
        }
    }

    pub fn set_builds(&mut self, builds: BTreeMap<String, BuildInfo>) {
        self.builds = builds;
    }

    pub fn builds(&self) -> &BTreeMap<String, BuildInfo> {
        &self.builds
    }

    /// True when every gating job is known to be green.
    pub fn is_stable(&self) -> bool {
        self.builds
            .values()
            .filter(|b| b.gating)
            .all(BuildInfo::is_stable)
    }

    /// Appends a record for one poll pass and drops records older than a day.
    pub fn record_pass(&mut self, now: DateTime<Utc>) {
        let stable = self.is_stable();
        self.history.push_back(HealthRecord {
            time: now,
            stable,
            jobs: self
                .builds
                .iter()
                .map(|(name, info)| (name.clone(), info.is_stable()))
                .collect(),
        });
        let cutoff = now - Duration::hours(HISTORY_HOURS);
        while self.history.front().is_some_and(|r| r.time < cutoff) {
            self.history.pop_front();
        }

        let mut summary = HealthSummary {
            merge_possible_now: stable,
            ..HealthSummary::default()
        };
        for record in &self.history {
            summary.total_loops += 1;
            if record.stable {
                summary.num_stable += 1;
            }
            for (job, job_stable) in &record.jobs {
                let count = summary.num_stable_per_job.entry(job.clone()).or_default();
                if *job_stable {
                    *count += 1;
                }
            }
        }
        self.summary = summary;
    }

    pub fn history(&self) -> impl Iterator<Item = &HealthRecord> {
        self.history.iter()
    }

    pub fn summary(&self) -> &HealthSummary {
        &self.summary
    }

    pub fn record_merge(&mut self, now: DateTime<Utc>) {
        self.merge_rate.record_merge(now);
    }

    pub fn merge_rate(&self) -> &MergeRate {
        &self.merge_rate
    }
}

/// Everything the status endpoint shows about CI health.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub stable: bool,
    pub builds: BTreeMap<String, BuildInfo>,
    pub summary: HealthSummary,
    pub history: Vec<HealthRecord>,
    pub merge_rate: f64,
    pub merge_rate_with_tail: f64,
    pub last_merge: DateTime<Utc>,
}

/// [`CiHealth`] shared between the poll loop, the merge worker and the
/// batch tick.
#[derive(Debug, Clone)]
pub struct SharedHealth(Arc<Mutex<CiHealth>>);

impl SharedHealth {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Arc::new(Mutex::new(CiHealth::new(now))))
    }

    fn with<T>(&self, f: impl FnOnce(&mut CiHealth) -> T) -> T {
        let mut health = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut health)
    }

    pub fn is_stable(&self) -> bool {
        self.with(|h| h.is_stable())
    }

    pub fn builds(&self) -> BTreeMap<String, BuildInfo> {
        self.with(|h| h.builds().clone())
    }

    /// Stores fresh build states. Returns the resulting stability.
    pub fn update_builds(&self, builds: BTreeMap<String, BuildInfo>) -> bool {
        self.with(|h| {
            h.set_builds(builds);
            h.is_stable()
        })
    }

    pub fn record_pass(&self, now: DateTime<Utc>) {
        self.with(|h| h.record_pass(now));
    }

    pub fn record_merge(&self, now: DateTime<Utc>) {
        self.with(|h| h.record_merge(now));
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> HealthSnapshot {
        self.with(|h| HealthSnapshot {
            stable: h.is_stable(),
            builds: h.builds().clone(),
            summary: h.summary().clone(),
            history: h.history().cloned().collect(),
            merge_rate: h.merge_rate().per_day(),
            merge_rate_with_tail: h.merge_rate().with_tail(now),
            last_merge: h.merge_rate().last_merge(),
        })
    }
}
