//! GitHub effect interpreter over the REST API.
//!
//! Reads are retried on transient failures; mutations are sent once. Raw
//! GitHub JSON is decoded into private wire structs and converted into the
//! crate's snapshot types here, so nothing else sees GitHub's field names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::effects::{Freshness, GitHubEffect, GitHubInterpreter, GitHubResponse};
use crate::types::{
    CombinedStatus, CommentData, CommentId, CommitData, ContextStatus, IssueData, IssueEventData,
    IssueState, PrData, PrNumber, Sha, StatusState,
};

use super::analytics::ApiCall;
use super::client::{Mutation, OctocrabClient};
use super::error::GitHubApiError;
use super::retry::{RetryPolicy, retry_with_backoff};

const PER_PAGE: usize = 100;

/// Safety limit to prevent runaway pagination.
const MAX_PAGES: u32 = 10;

// ─── Wire Types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RawLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawMilestone {
    title: String,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    number: u64,
    #[serde(default)]
    title: String,
    body: Option<String>,
    state: String,
    #[serde(default)]
    labels: Vec<RawLabel>,
    #[serde(default)]
    assignees: Vec<RawUser>,
    milestone: Option<RawMilestone>,
    user: Option<RawUser>,
    #[serde(default)]
    html_url: String,
    pull_request: Option<serde_json::Value>,
}

impl From<RawIssue> for IssueData {
    fn from(raw: RawIssue) -> Self {
        IssueData {
            number: PrNumber(raw.number),
            title: raw.title,
            body: raw.body.unwrap_or_default(),
            state: parse_issue_state(&raw.state),
            labels: raw.labels.into_iter().map(|l| l.name).collect(),
            assignees: raw.assignees.into_iter().map(|u| u.login).collect(),
            milestone: raw.milestone.map(|m| m.title),
            user: raw.user.map(|u| u.login).unwrap_or_default(),
            html_url: raw.html_url,
            is_pull_request: raw.pull_request.is_some(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawBranch {
    sha: String,
    #[serde(rename = "ref")]
    ref_field: String,
    #[serde(default)]
    label: String,
}

#[derive(Debug, Deserialize)]
struct RawPull {
    number: u64,
    state: String,
    #[serde(default)]
    merged: bool,
    mergeable: Option<bool>,
    head: RawBranch,
    base: RawBranch,
}

impl From<RawPull> for PrData {
    fn from(raw: RawPull) -> Self {
        PrData {
            number: PrNumber(raw.number),
            state: parse_issue_state(&raw.state),
            head_sha: Sha(raw.head.sha),
            head_ref: raw.head.ref_field,
            head_label: raw.head.label,
            base_sha: Sha(raw.base.sha),
            base_ref: raw.base.ref_field,
            mergeable: raw.mergeable,
            merged: raw.merged,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawPullNumber {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct RawCommitter {
    date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct RawCommitDetail {
    #[serde(default)]
    message: String,
    committer: Option<RawCommitter>,
}

#[derive(Debug, Deserialize)]
struct RawParent {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct RawCommit {
    sha: String,
    commit: RawCommitDetail,
    #[serde(default)]
    parents: Vec<RawParent>,
}

impl From<RawCommit> for CommitData {
    fn from(raw: RawCommit) -> Self {
        CommitData {
            sha: Sha(raw.sha),
            message: raw.commit.message,
            parents: raw.parents.into_iter().map(|p| Sha(p.sha)).collect(),
            committed_at: raw.commit.committer.and_then(|c| c.date),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    event: String,
    label: Option<RawLabel>,
    actor: Option<RawUser>,
    created_at: DateTime<Utc>,
}

impl From<RawEvent> for IssueEventData {
    fn from(raw: RawEvent) -> Self {
        IssueEventData {
            event: raw.event,
            label: raw.label.map(|l| l.name),
            actor: raw.actor.map(|u| u.login),
            created_at: raw.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawComment {
    id: u64,
    user: Option<RawUser>,
    body: Option<String>,
    created_at: Option<DateTime<Utc>>,
}

impl From<RawComment> for CommentData {
    fn from(raw: RawComment) -> Self {
        CommentData {
            id: CommentId(raw.id),
            author: raw.user.map(|u| u.login).unwrap_or_default(),
            body: raw.body.unwrap_or_default(),
            created_at: raw.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawContextStatus {
    context: String,
    state: String,
    target_url: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCombinedStatus {
    sha: String,
    state: String,
    #[serde(default)]
    statuses: Vec<RawContextStatus>,
}

impl TryFrom<RawCombinedStatus> for CombinedStatus {
    type Error = GitHubApiError;

    fn try_from(raw: RawCombinedStatus) -> Result<Self, Self::Error> {
        let statuses = raw
            .statuses
            .into_iter()
            .map(|s| {
                Ok(ContextStatus {
                    state: parse_status_state(&s.state)?,
                    context: s.context,
                    target_url: s.target_url,
                    description: s.description,
                })
            })
            .collect::<Result<Vec<_>, GitHubApiError>>()?;
        Ok(CombinedStatus {
            sha: Sha(raw.sha),
            state: parse_status_state(&raw.state)?,
            statuses,
        })
    }
}

#[derive(Debug, Serialize)]
struct CommentRequest<'a> {
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct CommentResponse {
    id: u64,
}

#[derive(Debug, Serialize)]
struct MergeRequest<'a> {
    commit_message: &'a str,
    merge_method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct MergeResponse {
    sha: Option<String>,
    merged: bool,
    message: Option<String>,
}

fn parse_issue_state(state: &str) -> IssueState {
    if state.eq_ignore_ascii_case("closed") {
        IssueState::Closed
    } else {
        IssueState::Open
    }
}

fn parse_status_state(state: &str) -> Result<StatusState, GitHubApiError> {
    StatusState::parse(state).ok_or_else(|| {
        GitHubApiError::permanent_without_source(format!("unknown status state '{}'", state))
    })
}

// ─── Interpreter Implementation ───────────────────────────────────────────────

impl GitHubInterpreter for OctocrabClient {
    type Error = GitHubApiError;

    async fn interpret(&self, effect: GitHubEffect) -> Result<GitHubResponse, Self::Error> {
        let policy = if effect.is_mutation() {
            RetryPolicy::NoRetry
        } else {
            RetryPolicy::RetryTransient
        };
        retry_with_backoff(self.retry_config(), policy, || {
            execute_effect(self, effect.clone())
        })
        .await
        .into_result()
    }
}

/// Executes a single effect without retry logic.
async fn execute_effect(
    client: &OctocrabClient,
    effect: GitHubEffect,
) -> Result<GitHubResponse, GitHubApiError> {
    let call = ApiCall::of(&effect);
    match effect {
        GitHubEffect::GetIssue { pr, freshness } => {
            let path = client.repo_path(&format!("/issues/{}", pr.0));
            let raw: RawIssue = client.get_json(call, &path, freshness).await?;
            Ok(GitHubResponse::Issue(raw.into()))
        }
        GitHubEffect::GetPr { pr, freshness } => {
            let path = client.repo_path(&format!("/pulls/{}", pr.0));
            let raw: RawPull = client.get_json(call, &path, freshness).await?;
            Ok(GitHubResponse::Pr(raw.into()))
        }
        GitHubEffect::ListCommits { pr } => {
            let path = client.repo_path(&format!("/pulls/{}/commits", pr.0));
            let raw: Vec<RawCommit> = get_paginated(client, call, &path).await?;
            Ok(GitHubResponse::Commits(
                raw.into_iter().map(Into::into).collect(),
            ))
        }
        GitHubEffect::ListEvents { pr } => {
            let path = client.repo_path(&format!("/issues/{}/events", pr.0));
            let raw: Vec<RawEvent> = get_paginated(client, call, &path).await?;
            Ok(GitHubResponse::Events(
                raw.into_iter().map(Into::into).collect(),
            ))
        }
        GitHubEffect::ListComments { pr } => {
            let path = client.repo_path(&format!("/issues/{}/comments", pr.0));
            let raw: Vec<RawComment> = get_paginated(client, call, &path).await?;
            Ok(GitHubResponse::Comments(
                raw.into_iter().map(Into::into).collect(),
            ))
        }
        GitHubEffect::GetCombinedStatus {
            reference,
            freshness,
        } => {
            let path = client.repo_path(&format!(
                "/commits/{}/status",
                urlencoding::encode(&reference)
            ));
            let raw: RawCombinedStatus = client.get_json(call, &path, freshness).await?;
            Ok(GitHubResponse::CombinedStatus(raw.try_into()?))
        }
        GitHubEffect::ListOpenPrs => {
            let path = client.repo_path("/pulls?state=open");
            let raw: Vec<RawPullNumber> = get_paginated(client, call, &path).await?;
            Ok(GitHubResponse::PrNumbers(
                raw.into_iter().map(|p| PrNumber(p.number)).collect(),
            ))
        }
        GitHubEffect::ListBranchCommits { branch, limit } => {
            let path = client.repo_path(&format!(
                "/commits?sha={}&per_page={}",
                urlencoding::encode(&branch),
                limit.min(PER_PAGE as u32)
            ));
            let raw: Vec<RawCommit> = client.get_json(call, &path, Freshness::Fresh).await?;
            Ok(GitHubResponse::Commits(
                raw.into_iter().map(Into::into).collect(),
            ))
        }
        GitHubEffect::PostComment { pr, body } => {
            let path = client.repo_path(&format!("/issues/{}/comments", pr.0));
            let response: CommentResponse = client
                .send_json(call, Mutation::Post, &path, &CommentRequest { body: &body })
                .await?;
            client.invalidate(&path);
            Ok(GitHubResponse::CommentPosted {
                id: CommentId(response.id),
            })
        }
        GitHubEffect::Merge {
            pr,
            commit_message,
            expected_sha,
        } => merge(client, call, pr, &commit_message, expected_sha).await,
    }
}

async fn get_paginated<T: serde::de::DeserializeOwned>(
    client: &OctocrabClient,
    call: ApiCall,
    path: &str,
) -> Result<Vec<T>, GitHubApiError> {
    let separator = if path.contains('?') { '&' } else { '?' };
    let mut all = Vec::new();

    for page in 1..=MAX_PAGES {
        let url = format!("{}{}per_page={}&page={}", path, separator, PER_PAGE, page);
        let items: Vec<T> = client.get_json(call, &url, Freshness::Cached).await?;
        let is_last_page = items.len() < PER_PAGE;
        all.extend(items);
        if is_last_page {
            return Ok(all);
        }
    }

    tracing::warn!(
        call = %call,
        path,
        max_pages = MAX_PAGES,
        "pagination limit reached, results truncated"
    );
    Ok(all)
}

/// Returns true if a merge failure says the head moved under a SHA guard.
fn is_sha_mismatch_error(message: &str) -> bool {
    message.to_lowercase().contains("head branch was modified")
}

async fn merge(
    client: &OctocrabClient,
    call: ApiCall,
    pr: PrNumber,
    commit_message: &str,
    expected_sha: Option<Sha>,
) -> Result<GitHubResponse, GitHubApiError> {
    let path = client.repo_path(&format!("/pulls/{}/merge", pr.0));
    let request = MergeRequest {
        commit_message,
        merge_method: "merge",
        sha: expected_sha.as_ref().map(Sha::as_str),
    };

    let result: Result<MergeResponse, _> = client
        .send_json(call, Mutation::Put, &path, &request)
        .await;

    // Whatever happened, the cached PR and issue are suspect now.
    client.invalidate(&client.repo_path(&format!("/pulls/{}", pr.0)));
    client.invalidate(&client.repo_path(&format!("/issues/{}", pr.0)));

    match result {
        Ok(response) if response.merged => {
            let sha = response.sha.ok_or_else(|| {
                GitHubApiError::permanent_without_source(format!(
                    "merge of PR {} returned no commit SHA",
                    pr
                ))
            })?;
            Ok(GitHubResponse::Merged { sha: Sha(sha) })
        }
        Ok(response) => Err(GitHubApiError::permanent_without_source(format!(
            "merge request returned merged=false: {}",
            response.message.as_deref().unwrap_or("unknown reason")
        ))),
        Err(e) => match &expected_sha {
            Some(expected) if is_sha_mismatch_error(&e.message) => {
                Err(GitHubApiError::sha_mismatch(pr, expected, &e.message))
            }
            _ => Err(e),
        },
    }
}
