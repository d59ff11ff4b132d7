//! Typed helpers over [`GitHubInterpreter`].
//!
//! Each helper issues one effect and unwraps the matching response variant.
//! Together they are the narrow capability `PrView`, the merge worker and the
//! batch reconciler depend on: none of them see the client, the cache or the
//! configuration behind it.

use crate::github::GitHubApiError;
use crate::types::{
    CombinedStatus, CommentData, CommentId, CommitData, IssueData, IssueEventData, PrData,
    PrNumber, Sha,
};

use super::github::{Freshness, GitHubEffect, GitHubResponse};
use super::interpreter::GitHubInterpreter;

/// Shorthand bound for interpreters the engine can share across tasks.
pub trait GitHub: GitHubInterpreter<Error = GitHubApiError> + Send + Sync + 'static {}

impl<T> GitHub for T where T: GitHubInterpreter<Error = GitHubApiError> + Send + Sync + 'static {}

fn unexpected(effect: &'static str, response: &GitHubResponse) -> GitHubApiError {
    GitHubApiError::permanent_without_source(format!(
        "unexpected {} response to {}",
        response.kind(),
        effect
    ))
}

pub async fn fetch_issue<G: GitHub>(
    github: &G,
    pr: PrNumber,
    freshness: Freshness,
) -> Result<IssueData, GitHubApiError> {
    match github
        .interpret(GitHubEffect::GetIssue { pr, freshness })
        .await?
    {
        GitHubResponse::Issue(issue) => Ok(issue),
        other => Err(unexpected("GetIssue", &other)),
    }
}

pub async fn fetch_pr<G: GitHub>(
    github: &G,
    pr: PrNumber,
    freshness: Freshness,
) -> Result<PrData, GitHubApiError> {
    match github.interpret(GitHubEffect::GetPr { pr, freshness }).await? {
        GitHubResponse::Pr(data) => Ok(data),
        other => Err(unexpected("GetPr", &other)),
    }
}

pub async fn list_commits<G: GitHub>(
    github: &G,
    pr: PrNumber,
) -> Result<Vec<CommitData>, GitHubApiError> {
    match github.interpret(GitHubEffect::ListCommits { pr }).await? {
        GitHubResponse::Commits(commits) => Ok(commits),
        other => Err(unexpected("ListCommits", &other)),
    }
}

pub async fn list_events<G: GitHub>(
    github: &G,
    pr: PrNumber,
) -> Result<Vec<IssueEventData>, GitHubApiError> {
    match github.interpret(GitHubEffect::ListEvents { pr }).await? {
        GitHubResponse::Events(events) => Ok(events),
        other => Err(unexpected("ListEvents", &other)),
    }
}

pub async fn list_comments<G: GitHub>(
    github: &G,
    pr: PrNumber,
) -> Result<Vec<CommentData>, GitHubApiError> {
    match github.interpret(GitHubEffect::ListComments { pr }).await? {
        GitHubResponse::Comments(comments) => Ok(comments),
        other => Err(unexpected("ListComments", &other)),
    }
}

/// Fetches the combined status of a SHA or branch name.
pub async fn combined_status<G: GitHub>(
    github: &G,
    reference: &str,
    freshness: Freshness,
) -> Result<CombinedStatus, GitHubApiError> {
    let effect = GitHubEffect::GetCombinedStatus {
        reference: reference.to_string(),
        freshness,
    };
    match github.interpret(effect).await? {
        GitHubResponse::CombinedStatus(status) => Ok(status),
        other => Err(unexpected("GetCombinedStatus", &other)),
    }
}

pub async fn list_open_prs<G: GitHub>(github: &G) -> Result<Vec<PrNumber>, GitHubApiError> {
    match github.interpret(GitHubEffect::ListOpenPrs).await? {
        GitHubResponse::PrNumbers(numbers) => Ok(numbers),
        other => Err(unexpected("ListOpenPrs", &other)),
    }
}

/// Lists commits reachable from `branch`, newest first.
pub async fn list_branch_commits<G: GitHub>(
    github: &G,
    branch: &str,
    limit: u32,
) -> Result<Vec<CommitData>, GitHubApiError> {
    let effect = GitHubEffect::ListBranchCommits {
        branch: branch.to_string(),
        limit,
    };
    match github.interpret(effect).await? {
        GitHubResponse::Commits(commits) => Ok(commits),
        other => Err(unexpected("ListBranchCommits", &other)),
    }
}

pub async fn post_comment<G: GitHub>(
    github: &G,
    pr: PrNumber,
    body: String,
) -> Result<CommentId, GitHubApiError> {
    match github
        .interpret(GitHubEffect::PostComment { pr, body })
        .await?
    {
        GitHubResponse::CommentPosted { id } => Ok(id),
        other => Err(unexpected("PostComment", &other)),
    }
}

/// Merges a PR and returns the merge commit SHA.
pub async fn merge<G: GitHub>(
    github: &G,
    pr: PrNumber,
    commit_message: String,
    expected_sha: Option<Sha>,
) -> Result<Sha, GitHubApiError> {
    let effect = GitHubEffect::Merge {
        pr,
        commit_message,
        expected_sha,
    };
    match github.interpret(effect).await? {
        GitHubResponse::Merged { sha } => Ok(sha),
        other => Err(unexpected("Merge", &other)),
    }
}
