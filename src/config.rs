//! Environment-driven configuration.
//!
//! [`Config::from_env`] reads the process environment; [`Config::from_lookup`]
//! takes any key lookup so tests can inject values without touching the real
//! environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::github::RateLimiter;
use crate::types::{InvalidRepoId, RepoId};
use crate::worker::PollConfig;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_CACHE_SIZE_MB: u64 = 1000;

/// Comment that asks the CI bot to re-run the tests of a PR.
pub const DEFAULT_RETEST_COMMENT: &str =
    "@k8s-bot test this [submit-queue is verifying that this PR is safe to merge]";

/// Errors from reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Repo(#[from] InvalidRepoId),
}

/// Label names the admission checks and queue ordering look for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels {
    pub cla: String,
    pub lgtm: String,
    pub do_not_merge: String,
    /// Skips the re-test contexts and the pre-merge re-test.
    pub retest_not_required: String,
    /// Prefix of numeric priority labels, e.g. `priority/P` for `priority/P0`.
    pub priority_prefix: String,
}

impl Default for Labels {
    fn default() -> Self {
        Self {
            cla: "cla: yes".to_string(),
            lgtm: "lgtm".to_string(),
            do_not_merge: "do-not-merge".to_string(),
            retest_not_required: "retest-not-required".to_string(),
            priority_prefix: "priority/P".to_string(),
        }
    }
}

/// Policy knobs of the queue itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Contexts that must be green before a PR is admitted.
    pub required_contexts: Vec<String>,
    /// Contexts re-run by the re-test comment and waited on before merging.
    pub retest_contexts: Vec<String>,
    /// CI jobs whose failure blocks the whole queue.
    pub gating_jobs: Vec<String>,
    /// CI jobs tracked for health reporting only.
    pub nongating_jobs: Vec<String>,
    pub do_not_merge_milestones: Vec<String>,
    /// Branch PRs merge into. Its combined status drives CI health.
    pub base_branch: String,
    pub retest_comment: String,
    /// Name recorded in the audit comment of each merge.
    pub actor: String,
    pub labels: Labels,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            required_contexts: Vec::new(),
            retest_contexts: Vec::new(),
            gating_jobs: Vec::new(),
            nongating_jobs: Vec::new(),
            do_not_merge_milestones: Vec::new(),
            base_branch: "master".to_string(),
            retest_comment: DEFAULT_RETEST_COMMENT.to_string(),
            actor: "submit-queue".to_string(),
            labels: Labels::default(),
        }
    }
}

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub github_token: String,
    pub repo: RepoId,
    pub webhook_secret: Vec<u8>,
    pub listen_addr: SocketAddr,
    pub poll: PollConfig,
    pub queue: QueueConfig,
    /// Batch-job JSON endpoint. Batch merging is off when unset.
    pub batch_url: Option<String>,
    /// On-disk response cache directory. In-memory when unset.
    pub cache_dir: Option<PathBuf>,
    pub cache_bytes: u64,
    pub token_reserve: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let github_token = required("GITHUB_TOKEN")?;
        let repo: RepoId = required("SUBMIT_QUEUE_REPO")?.parse()?;
        let webhook_secret = required("SUBMIT_QUEUE_WEBHOOK_SECRET")?.into_bytes();

        let listen_raw = get("SUBMIT_QUEUE_LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.into());
        let listen_addr = listen_raw.parse().map_err(|e: std::net::AddrParseError| {
            ConfigError::Invalid {
                key: "SUBMIT_QUEUE_LISTEN_ADDR",
                value: listen_raw.clone(),
                reason: e.to_string(),
            }
        })?;

        let defaults = PollConfig::new();
        let poll_secs = parse_scaled(
            &get,
            "SUBMIT_QUEUE_POLL_INTERVAL_MINS",
            defaults.poll_interval.as_secs() / 60,
            60,
        )?;
        let changed_secs = parse_scaled(
            &get,
            "SUBMIT_QUEUE_CHANGED_POLL_SECS",
            defaults.changed_interval.as_secs(),
            1,
        )?;
        let poll = PollConfig {
            poll_interval: Duration::from_secs(poll_secs),
            changed_interval: Duration::from_secs(changed_secs),
            ..defaults
        };

        let list = |key: &str| get(key).map(|v| split_list(&v)).unwrap_or_default();
        let queue = QueueConfig {
            required_contexts: list("SUBMIT_QUEUE_REQUIRED_CONTEXTS"),
            retest_contexts: list("SUBMIT_QUEUE_RETEST_CONTEXTS"),
            gating_jobs: list("SUBMIT_QUEUE_GATING_JOBS"),
            nongating_jobs: list("SUBMIT_QUEUE_NONGATING_JOBS"),
            do_not_merge_milestones: list("SUBMIT_QUEUE_DO_NOT_MERGE_MILESTONES"),
            base_branch: get("SUBMIT_QUEUE_BASE_BRANCH").unwrap_or_else(|| "master".to_string()),
            retest_comment: get("SUBMIT_QUEUE_RETEST_COMMENT")
                .unwrap_or_else(|| DEFAULT_RETEST_COMMENT.to_string()),
            ..QueueConfig::default()
        };

        let cache_bytes = parse_scaled(
            &get,
            "SUBMIT_QUEUE_CACHE_SIZE_MB",
            DEFAULT_CACHE_SIZE_MB,
            1024 * 1024,
        )?;
        let token_reserve =
            parse_number(&get, "SUBMIT_QUEUE_TOKEN_RESERVE", RateLimiter::DEFAULT_RESERVE)?;

        Ok(Config {
            github_token,
            repo,
            webhook_secret,
            listen_addr,
            poll,
            queue,
            batch_url: get("SUBMIT_QUEUE_BATCH_URL"),
            cache_dir: get("SUBMIT_QUEUE_CACHE_DIR").map(PathBuf::from),
            cache_bytes,
            token_reserve,
        })
    }
}

fn parse_number(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: std::num::ParseIntError| {
            ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }
        }),
    }
}

/// A non-zero number multiplied into its base unit.
fn parse_scaled(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: u64,
    unit: u64,
) -> Result<u64, ConfigError> {
    let value = parse_number(get, key, default)?;
    let invalid = |reason: &str| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    };
    if value == 0 {
        return Err(invalid("must be non-zero"));
    }
    value.checked_mul(unit).ok_or_else(|| invalid("too large"))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const BASE: [(&str, &str); 3] = [
        ("GITHUB_TOKEN", "ghp_test"),
        ("SUBMIT_QUEUE_REPO", "kubernetes/kubernetes"),
        ("SUBMIT_QUEUE_WEBHOOK_SECRET", "s3cret"),
    ];

    #[test]
    fn defaults_apply() {
        let config = Config::from_lookup(lookup(&BASE)).unwrap();
        assert_eq!(config.repo, RepoId::new("kubernetes", "kubernetes"));
        assert_eq!(config.listen_addr.port(), 3000);
        assert_eq!(config.poll.poll_interval, Duration::from_secs(600));
        assert_eq!(config.poll.changed_interval, Duration::from_secs(30));
        assert_eq!(config.cache_bytes, 1000 * 1024 * 1024);
        assert_eq!(config.token_reserve, 250);
        assert!(config.batch_url.is_none());
        assert!(config.cache_dir.is_none());
        assert_eq!(config.queue.retest_comment, DEFAULT_RETEST_COMMENT);
        assert_eq!(config.queue.labels.cla, "cla: yes");
        assert_eq!(config.queue.base_branch, "master");
    }

    #[test]
    fn lists_are_split_and_trimmed() {
        let mut pairs = BASE.to_vec();
        pairs.push(("SUBMIT_QUEUE_REQUIRED_CONTEXTS", "cla/linuxfoundation, Jenkins unit,,"));
        pairs.push(("SUBMIT_QUEUE_DO_NOT_MERGE_MILESTONES", "Blocked"));
        let config = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(
            config.queue.required_contexts,
            vec!["cla/linuxfoundation", "Jenkins unit"]
        );
        assert_eq!(config.queue.do_not_merge_milestones, vec!["Blocked"]);
    }

    #[test]
    fn missing_token_is_reported() {
        let err = Config::from_lookup(lookup(&BASE[1..])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("GITHUB_TOKEN")));
    }

    #[test]
    fn malformed_number_is_rejected() {
        let mut pairs = BASE.to_vec();
        pairs.push(("SUBMIT_QUEUE_POLL_INTERVAL_MINS", "ten"));
        let err = Config::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { key: "SUBMIT_QUEUE_POLL_INTERVAL_MINS", .. }
        ));
    }

    fn invalid_key(pairs: &[(&str, &str)]) -> Option<&'static str> {
        let mut all: Vec<(&str, &str)> = BASE.to_vec();
        all.extend_from_slice(pairs);
        match Config::from_lookup(lookup(&all)) {
            Err(ConfigError::Invalid { key, .. }) => Some(key),
            _ => None,
        }
    }

    #[test]
    fn zero_intervals_and_cache_are_rejected() {
        for key in [
            "SUBMIT_QUEUE_POLL_INTERVAL_MINS",
            "SUBMIT_QUEUE_CHANGED_POLL_SECS",
            "SUBMIT_QUEUE_CACHE_SIZE_MB",
        ] {
            assert_eq!(invalid_key(&[(key, "0")]), Some(key));
        }
    }

    #[test]
    fn overflowing_numbers_are_rejected() {
        let max = u64::MAX.to_string();
        assert_eq!(
            invalid_key(&[("SUBMIT_QUEUE_CACHE_SIZE_MB", &max)]),
            Some("SUBMIT_QUEUE_CACHE_SIZE_MB")
        );
        assert_eq!(
            invalid_key(&[("SUBMIT_QUEUE_POLL_INTERVAL_MINS", &max)]),
            Some("SUBMIT_QUEUE_POLL_INTERVAL_MINS")
        );
        assert_eq!(
            invalid_key(&[("SUBMIT_QUEUE_CACHE_SIZE_MB", "18446744073709551616")]),
            Some("SUBMIT_QUEUE_CACHE_SIZE_MB")
        );
    }

    #[test]
    fn non_numeric_values_are_rejected() {
        assert_eq!(
            invalid_key(&[("SUBMIT_QUEUE_CHANGED_POLL_SECS", "-5")]),
            Some("SUBMIT_QUEUE_CHANGED_POLL_SECS")
        );
        assert_eq!(
            invalid_key(&[("SUBMIT_QUEUE_CACHE_SIZE_MB", "1.5")]),
            Some("SUBMIT_QUEUE_CACHE_SIZE_MB")
        );
        assert_eq!(
            invalid_key(&[("SUBMIT_QUEUE_TOKEN_RESERVE", "lots")]),
            Some("SUBMIT_QUEUE_TOKEN_RESERVE")
        );
    }

    #[test]
    fn custom_intervals_are_scaled() {
        let mut pairs = BASE.to_vec();
        pairs.push(("SUBMIT_QUEUE_POLL_INTERVAL_MINS", "3"));
        pairs.push(("SUBMIT_QUEUE_CHANGED_POLL_SECS", "7"));
        pairs.push(("SUBMIT_QUEUE_CACHE_SIZE_MB", "2"));
        let config = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.poll.poll_interval, Duration::from_secs(180));
        assert_eq!(config.poll.changed_interval, Duration::from_secs(7));
        assert_eq!(config.cache_bytes, 2 * 1024 * 1024);
    }

    #[test]
    fn malformed_repo_is_rejected() {
        let pairs = [
            ("GITHUB_TOKEN", "t"),
            ("SUBMIT_QUEUE_REPO", "no-slash"),
            ("SUBMIT_QUEUE_WEBHOOK_SECRET", "s"),
        ];
        assert!(matches!(
            Config::from_lookup(lookup(&pairs)),
            Err(ConfigError::Repo(_))
        ));
    }
}
