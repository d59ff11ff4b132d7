//! Loop intervals for the engine.
//!
//! - **Full pass**: every open PR re-evaluated, 10 minutes by default
//!   (`SUBMIT_QUEUE_POLL_INTERVAL_MINS`), with 0-20% jitter keyed on the repo
//! - **Changed pass**: only PRs the change trackers report, every 30 seconds
//!   (`SUBMIT_QUEUE_CHANGED_POLL_SECS`)
//! - **CI tick**: base branch stability refreshed every minute
//! - **Batch tick**: batch-job results read every minute

use std::hash::{Hash, Hasher};
use std::time::Duration;

use crate::types::RepoId;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 600;
const DEFAULT_CHANGED_INTERVAL_SECS: u64 = 30;
const DEFAULT_CI_INTERVAL_SECS: u64 = 60;
const DEFAULT_BATCH_INTERVAL_SECS: u64 = 60;
const DEFAULT_JITTER_PERCENT: u8 = 20;

#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Interval between full passes over every open PR.
    pub poll_interval: Duration,

    /// Interval between passes over PRs reported changed by webhooks.
    pub changed_interval: Duration,

    /// Interval between base branch CI stability checks.
    pub ci_interval: Duration,

    /// Interval between batch-job reads.
    pub batch_interval: Duration,

    /// Jitter added to the full pass interval (0-100).
    pub jitter_percent: u8,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PollConfig {
    pub fn new() -> Self {
        PollConfig {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            changed_interval: Duration::from_secs(DEFAULT_CHANGED_INTERVAL_SECS),
            ci_interval: Duration::from_secs(DEFAULT_CI_INTERVAL_SECS),
            batch_interval: Duration::from_secs(DEFAULT_BATCH_INTERVAL_SECS),
            jitter_percent: DEFAULT_JITTER_PERCENT,
        }
    }

    /// Full pass interval with a jitter that is stable for a given repo.
    ///
    /// `interval * (1 + (hash(repo) % jitter_percent) / 100)`
    pub fn poll_interval_with_jitter(&self, repo: &RepoId) -> Duration {
        if self.jitter_percent == 0 {
            return self.poll_interval;
        }
        let mut hasher = std::hash::DefaultHasher::new();
        repo.hash(&mut hasher);
        let jitter = (hasher.finish() % u64::from(self.jitter_percent)) as f64 / 100.0;
        Duration::try_from_secs_f64(self.poll_interval.as_secs_f64() * (1.0 + jitter))
            .unwrap_or(self.poll_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PollConfig::new();
        assert_eq!(config.poll_interval, Duration::from_secs(600));
        assert_eq!(config.changed_interval, Duration::from_secs(30));
        assert_eq!(config.ci_interval, Duration::from_secs(60));
        assert_eq!(config.batch_interval, Duration::from_secs(60));
    }

    #[test]
    fn jitter_is_stable_and_bounded() {
        let config = PollConfig::new();
        let repo = RepoId::new("owner", "repo");

        let first = config.poll_interval_with_jitter(&repo);
        assert_eq!(first, config.poll_interval_with_jitter(&repo));
        assert!(first >= config.poll_interval);
        assert!(first <= config.poll_interval.mul_f64(1.2));
    }

    #[test]
    fn zero_jitter_returns_exact_interval() {
        let config = PollConfig {
            jitter_percent: 0,
            ..PollConfig::new()
        };
        assert_eq!(
            config.poll_interval_with_jitter(&RepoId::new("o", "r")),
            config.poll_interval
        );
    }
}
