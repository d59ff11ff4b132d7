//! Per-PR cached view over remote data.
//!
//! A `PrView` is created for one PR during a poll pass (or a merge attempt)
//! and fills its fields on demand: the PR sub-resource, commits, events,
//! comments and the combined CI status. Everything except the combined
//! status stays cached until [`PrView::refresh`]; the combined status is
//! re-fetched once it is older than the configured TTL.
//!
//! The view holds only the narrow [`GitHub`] capability, never the client,
//! cache or engine state behind it.

pub mod merge;
pub mod status;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::effects::{Freshness, GitHub, fetch};
use crate::github::{GitHubApiError, RetryConfig};
use crate::types::{
    CombinedStatus, CommentData, CommitData, IssueData, IssueEventData, PrData, PrNumber, Sha,
};

pub use merge::{MAX_COMMENT_LEN, clean_issue_body, merge_message};
pub use status::{CiState, compute_status};

/// Timing knobs for a [`PrView`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewConfig {
    /// How long a fetched combined status is served before re-fetching.
    pub status_ttl: Duration,
    /// Poll interval while waiting for CI to start or finish.
    pub wait_interval: Duration,
    /// Overall limit for one wait.
    pub wait_timeout: Duration,
    /// Poll schedule while GitHub computes mergeability.
    pub mergeable_retry: RetryConfig,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            status_ttl: Duration::from_secs(5),
            wait_interval: Duration::from_secs(30),
            wait_timeout: Duration::from_secs(2 * 60 * 60),
            mergeable_retry: RetryConfig::MERGEABILITY,
        }
    }
}

impl ViewConfig {
    /// Near-zero delays for tests.
    pub fn immediate() -> Self {
        Self {
            status_ttl: Duration::ZERO,
            wait_interval: Duration::from_millis(1),
            wait_timeout: Duration::from_secs(5),
            mergeable_retry: RetryConfig::immediate(5),
        }
    }
}

/// Whether GitHub can merge the PR without conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Mergeability {
    Mergeable,
    Conflicting,
    /// GitHub did not finish computing it within the retry schedule.
    Undetermined,
}

/// How a CI wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Reached,
    /// The PR was closed while waiting. Treated as done by callers.
    PrClosed,
    TimedOut,
}

/// Lazily-populated view over one PR.
pub struct PrView<G> {
    github: Arc<G>,
    config: ViewConfig,
    issue: IssueData,
    pr: Option<PrData>,
    commits: Option<Vec<CommitData>>,
    events: Option<Vec<IssueEventData>>,
    comments: Option<Vec<CommentData>>,
    status: Option<(CombinedStatus, Instant)>,
}

impl<G: GitHub> PrView<G> {
    /// Fetches the issue and wraps it in a view.
    pub async fn load(
        github: Arc<G>,
        config: ViewConfig,
        number: PrNumber,
    ) -> Result<Self, GitHubApiError> {
        let issue = fetch::fetch_issue(&*github, number, Freshness::Cached).await?;
        Ok(Self::from_issue(github, config, issue))
    }

    pub fn from_issue(github: Arc<G>, config: ViewConfig, issue: IssueData) -> Self {
        Self {
            github,
            config,
            issue,
            pr: None,
            commits: None,
            events: None,
            comments: None,
            status: None,
        }
    }

    pub fn number(&self) -> PrNumber {
        self.issue.number
    }

    pub fn issue(&self) -> &IssueData {
        &self.issue
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.issue.has_label(label)
    }

    pub fn config(&self) -> &ViewConfig {
        &self.config
    }

    /// Re-fetches the issue and PR sub-resource, bypassing the cache, and
    /// drops every other cached field.
    pub async fn refresh(&mut self) -> Result<(), GitHubApiError> {
        let number = self.number();
        self.issue = fetch::fetch_issue(&*self.github, number, Freshness::Fresh).await?;
        self.pr = None;
        self.commits = None;
        self.events = None;
        self.comments = None;
        self.status = None;
        if self.issue.is_pull_request {
            self.pr = Some(fetch::fetch_pr(&*self.github, number, Freshness::Fresh).await?);
        }
        Ok(())
    }

    pub async fn pr(&mut self) -> Result<&PrData, GitHubApiError> {
        if self.pr.is_none() {
            let pr = fetch::fetch_pr(&*self.github, self.number(), Freshness::Cached).await?;
            self.pr = Some(pr);
        }
        self.pr
            .as_ref()
            .ok_or_else(|| GitHubApiError::permanent_without_source("pull request not loaded"))
    }

    /// Re-fetches the PR sub-resource with `max-age=0`.
    async fn fresh_pr(&mut self) -> Result<&PrData, GitHubApiError> {
        let pr = fetch::fetch_pr(&*self.github, self.number(), Freshness::Fresh).await?;
        Ok(&*self.pr.insert(pr))
    }

    pub async fn head_sha(&mut self) -> Result<Sha, GitHubApiError> {
        Ok(self.pr().await?.head_sha.clone())
    }

    pub async fn is_merged(&mut self) -> Result<bool, GitHubApiError> {
        Ok(self.pr().await?.merged)
    }

    pub async fn commits(&mut self) -> Result<&[CommitData], GitHubApiError> {
        if self.commits.is_none() {
            self.commits = Some(fetch::list_commits(&*self.github, self.number()).await?);
        }
        Ok(self.commits.as_deref().unwrap_or_default())
    }

    pub async fn events(&mut self) -> Result<&[IssueEventData], GitHubApiError> {
        if self.events.is_none() {
            self.events = Some(fetch::list_events(&*self.github, self.number()).await?);
        }
        Ok(self.events.as_deref().unwrap_or_default())
    }

    pub async fn comments(&mut self) -> Result<&[CommentData], GitHubApiError> {
        if self.comments.is_none() {
            self.comments = Some(fetch::list_comments(&*self.github, self.number()).await?);
        }
        Ok(self.comments.as_deref().unwrap_or_default())
    }

    /// The combined status of the PR head, at most `status_ttl` old.
    pub async fn combined_status(&mut self) -> Result<&CombinedStatus, GitHubApiError> {
        let stale = match &self.status {
            Some((_, fetched_at)) => fetched_at.elapsed() >= self.config.status_ttl,
            None => true,
        };
        if stale {
            let head = self.head_sha().await?;
            let status =
                fetch::combined_status(&*self.github, head.as_str(), Freshness::Fresh).await?;
            self.status = Some((status, Instant::now()));
        }
        self.status
            .as_ref()
            .map(|(status, _)| status)
            .ok_or_else(|| GitHubApiError::permanent_without_source("combined status not loaded"))
    }

    /// CI verdict over `required` contexts.
    pub async fn status_state(&mut self, required: &[String]) -> Result<CiState, GitHubApiError> {
        let status = self.combined_status().await?;
        Ok(compute_status(status, required))
    }

    pub async fn is_status_success(&mut self, required: &[String]) -> Result<bool, GitHubApiError> {
        Ok(self.status_state(required).await? == CiState::Success)
    }

    /// Latest committer date across the PR's commits.
    pub async fn last_modified_time(&mut self) -> Result<Option<DateTime<Utc>>, GitHubApiError> {
        let number = self.number();
        let commits = self.commits().await?;
        let mut last = None;
        for commit in commits {
            match commit.committed_at {
                Some(at) if last.is_none_or(|l| at > l) => last = Some(at),
                Some(_) => {}
                None => warn!(pr = %number, sha = %commit.sha, "commit without committer date"),
            }
        }
        Ok(last)
    }

    /// When `label` was most recently applied.
    pub async fn label_time(&mut self, label: &str) -> Result<Option<DateTime<Utc>>, GitHubApiError> {
        let events = self.events().await?;
        Ok(events
            .iter()
            .filter(|e| e.event == "labeled" && e.label.as_deref() == Some(label))
            .map(|e| e.created_at)
            .max())
    }

    /// Asks GitHub whether the PR merges cleanly.
    ///
    /// GitHub computes this lazily and reports `null` until it is done, so
    /// an unknown answer is re-polled (with a fresh fetch) on the
    /// `mergeable_retry` schedule before giving up as undetermined.
    pub async fn is_mergeable(&mut self) -> Result<Mergeability, GitHubApiError> {
        if !self.issue.is_pull_request {
            return Ok(Mergeability::Conflicting);
        }
        let schedule = self.config.mergeable_retry;
        let mut delays = schedule.delays();
        let mut mergeable = self.fresh_pr().await?.mergeable;

        loop {
            match mergeable {
                Some(true) => return Ok(Mergeability::Mergeable),
                Some(false) => return Ok(Mergeability::Conflicting),
                None => {}
            }
            let Some(delay) = delays.next() else {
                warn!(pr = %self.number(), "no mergeability information, skipping");
                return Ok(Mergeability::Undetermined);
            };
            debug!(pr = %self.number(), delay_secs = delay.as_secs_f64(), "waiting for mergeability");
            tokio::time::sleep(delay).await;
            self.refresh().await?;
            mergeable = self.pr().await?.mergeable;
        }
    }

    /// Polls until the required contexts report `pending` (CI started).
    pub async fn wait_for_pending(&mut self, required: &[String]) -> WaitOutcome {
        self.wait_for_status(required, true).await
    }

    /// Polls until the required contexts are no longer `pending`.
    pub async fn wait_for_not_pending(&mut self, required: &[String]) -> WaitOutcome {
        self.wait_for_status(required, false).await
    }

    async fn wait_for_status(&mut self, required: &[String], pending: bool) -> WaitOutcome {
        let deadline = Instant::now() + self.config.wait_timeout;
        let number = self.number();

        loop {
            match self.status_state(required).await {
                Ok(state) if (state == CiState::Pending) == pending => return WaitOutcome::Reached,
                Ok(state) => debug!(pr = %number, state = %state, pending, "waiting on CI"),
                Err(e) => warn!(pr = %number, error = %e, "status fetch failed while waiting"),
            }

            if Instant::now() + self.config.wait_interval > deadline {
                tracing::error!(pr = %number, pending, "timed out waiting on CI");
                return WaitOutcome::TimedOut;
            }
            tokio::time::sleep(self.config.wait_interval).await;

            match self.refresh().await {
                Ok(()) if !self.issue.state.is_open() => return WaitOutcome::PrClosed,
                Ok(()) => {}
                Err(e) => warn!(pr = %number, error = %e, "refresh failed while waiting"),
            }
        }
    }

    /// Posts a comment, truncated to GitHub's maximum length.
    pub async fn write_comment(&mut self, body: &str) -> Result<(), GitHubApiError> {
        let number = self.number();
        let truncated = merge::truncate_comment(body);
        if truncated.len() < body.len() {
            info!(pr = %number, max = MAX_COMMENT_LEN, "comment truncated");
        }
        fetch::post_comment(&*self.github, number, truncated.to_string()).await?;
        self.comments = None;
        Ok(())
    }

    /// Posts the audit comment and merges the PR with a merge commit.
    ///
    /// If GitHub reports that the base branch moved, mergeability is
    /// recomputed and the merge is retried exactly once.
    pub async fn merge_pr(&mut self, actor: &str) -> Result<Sha, GitHubApiError> {
        let number = self.number();
        let head = self.head_sha().await?;
        let first_commit = self
            .commits()
            .await?
            .first()
            .map(|c| c.message.clone())
            .unwrap_or_default();
        let message = merge_message(actor, &self.issue.title, &self.issue.body, &first_commit);

        self.write_comment(&merge::audit_comment(actor)).await?;

        info!(pr = %number, sha = %head.short(), "merging");
        let result =
            fetch::merge(&*self.github, number, message.clone(), Some(head.clone())).await;
        match result {
            Err(e) if e.is_branch_modified() => {
                warn!(pr = %number, error = %e, "base moved during merge, rechecking mergeability");
                if self.is_mergeable().await? == Mergeability::Mergeable {
                    fetch::merge(&*self.github, number, message, Some(head)).await
                } else {
                    Err(e)
                }
            }
            other => other,
        }
    }
}
