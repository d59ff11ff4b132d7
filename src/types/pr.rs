//! Snapshots of remote issue, pull request, commit and status data.
//!
//! These are the shapes the rest of the crate works with. The GitHub
//! interpreter converts raw API payloads into them; tests build them directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{CommentId, PrNumber, Sha};

/// Open/closed state shared by issues and pull requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueState {
    Open,
    Closed,
}

impl IssueState {
    pub fn is_open(&self) -> bool {
        matches!(self, IssueState::Open)
    }
}

/// Issue-level metadata of a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueData {
    pub number: PrNumber,
    pub title: String,
    pub body: String,
    pub state: IssueState,
    pub labels: Vec<String>,
    pub assignees: Vec<String>,
    pub milestone: Option<String>,
    /// Login of the author.
    pub user: String,
    pub html_url: String,
    /// False for plain issues. The submit queue ignores those.
    pub is_pull_request: bool,
}

impl IssueData {
    /// Returns true if the issue carries the given label (exact match).
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// Pull-request-specific metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrData {
    pub number: PrNumber,
    pub state: IssueState,
    pub head_sha: Sha,
    pub head_ref: String,
    /// `owner:branch` of the head, unique across forks.
    pub head_label: String,
    pub base_sha: Sha,
    pub base_ref: String,
    /// GitHub computes this asynchronously; `None` means "not yet known".
    pub mergeable: Option<bool>,
    pub merged: bool,
}

/// A commit as returned by the commits listing endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitData {
    pub sha: Sha,
    pub message: String,
    pub parents: Vec<Sha>,
    pub committed_at: Option<DateTime<Utc>>,
}

/// An entry of an issue's event timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueEventData {
    /// Event name, e.g. `labeled`, `unlabeled`, `closed`.
    pub event: String,
    pub label: Option<String>,
    pub actor: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An issue comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentData {
    pub id: CommentId,
    pub author: String,
    pub body: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// The state of a single status context, as reported by GitHub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusState {
    Pending,
    Success,
    Failure,
    Error,
}

impl StatusState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusState::Pending => "pending",
            StatusState::Success => "success",
            StatusState::Failure => "failure",
            StatusState::Error => "error",
        }
    }

    /// Parses GitHub's state string. Unknown strings yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(StatusState::Pending),
            "success" => Some(StatusState::Success),
            "failure" => Some(StatusState::Failure),
            "error" => Some(StatusState::Error),
            _ => None,
        }
    }
}

impl fmt::Display for StatusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One context's entry in a combined status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextStatus {
    pub context: String,
    pub state: StatusState,
    pub target_url: Option<String>,
    pub description: Option<String>,
}

/// The aggregate of all CI contexts reported against one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinedStatus {
    pub sha: Sha,
    pub state: StatusState,
    pub statuses: Vec<ContextStatus>,
}

impl CombinedStatus {
    /// Returns the state reported for a context, if any.
    pub fn context_state(&self, context: &str) -> Option<StatusState> {
        self.statuses
            .iter()
            .find(|s| s.context == context)
            .map(|s| s.state)
    }
}
