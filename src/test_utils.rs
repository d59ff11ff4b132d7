//! Shared test utilities: a scripted in-memory GitHub, data builders, and
//! arbitrary generators for property-based testing.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

use crate::effects::{Freshness, GitHubEffect, GitHubInterpreter, GitHubResponse};
use crate::github::{ApiCall, GitHubApiError};
use crate::types::{
    CombinedStatus, CommentData, CommentId, CommitData, ContextStatus, IssueData, IssueEventData,
    IssueState, PrData, PrNumber, Sha, StatusState,
};

// ─── Generators ───────────────────────────────────────────────────────────────

pub fn arb_pr_number() -> impl Strategy<Value = PrNumber> {
    (1u64..100_000).prop_map(PrNumber)
}

pub fn arb_sha() -> impl Strategy<Value = Sha> {
    "[0-9a-f]{40}".prop_map(Sha)
}

// ─── Builders ─────────────────────────────────────────────────────────────────

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap()
}

/// An issue plus its pull request sub-resource.
#[derive(Debug, Clone)]
pub struct FakePr {
    pub issue: IssueData,
    pub pr: PrData,
}

impl FakePr {
    pub fn with_labels(mut self, labels: &[&str]) -> Self {
        self.issue.labels = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn with_milestone(mut self, milestone: &str) -> Self {
        self.issue.milestone = Some(milestone.to_string());
        self
    }

    pub fn with_mergeable(mut self, mergeable: Option<bool>) -> Self {
        self.pr.mergeable = mergeable;
        self
    }
}

/// An open, mergeable PR on `master` with head `head`.
pub fn open_pr(number: u64, head: &str) -> FakePr {
    FakePr {
        issue: IssueData {
            number: PrNumber(number),
            title: format!("PR {}", number),
            body: String::new(),
            state: IssueState::Open,
            labels: Vec::new(),
            assignees: Vec::new(),
            milestone: None,
            user: "author".to_string(),
            html_url: format!("https://github.com/o/r/pull/{}", number),
            is_pull_request: true,
        },
        pr: PrData {
            number: PrNumber(number),
            state: IssueState::Open,
            head_sha: Sha::from(head),
            head_ref: format!("pr-{}", number),
            head_label: format!("author:pr-{}", number),
            base_sha: Sha::from("base"),
            base_ref: "master".to_string(),
            mergeable: Some(true),
            merged: false,
        },
    }
}

pub fn commit_at(sha: &str, secs: i64) -> CommitData {
    CommitData {
        sha: Sha::from(sha),
        message: format!("commit {}", sha),
        parents: Vec::new(),
        committed_at: Some(at(secs)),
    }
}

/// A commit with explicit parents, for commit-graph tests. Two-parent
/// commits get a GitHub-style merge message.
pub fn commit_with_parents(sha: &str, parents: &[&str]) -> CommitData {
    let message = if parents.len() == 2 {
        format!("Merge pull request from {}", parents[1])
    } else {
        format!("commit {}", sha)
    };
    CommitData {
        sha: Sha::from(sha),
        message,
        parents: parents.iter().map(|p| Sha::from(*p)).collect(),
        committed_at: None,
    }
}

pub fn labeled_event(label: &str, secs: i64) -> IssueEventData {
    IssueEventData {
        event: "labeled".to_string(),
        label: Some(label.to_string()),
        actor: Some("reviewer".to_string()),
        created_at: at(secs),
    }
}

/// A combined status whose overall state is the worst reported one.
pub fn status_of(sha: &str, contexts: &[(&str, StatusState)]) -> CombinedStatus {
    let overall = [
        StatusState::Pending,
        StatusState::Error,
        StatusState::Failure,
    ]
    .into_iter()
    .find(|s| contexts.iter().any(|(_, state)| state == s))
    .unwrap_or(StatusState::Success);
    CombinedStatus {
        sha: Sha::from(sha),
        state: overall,
        statuses: contexts
            .iter()
            .map(|(context, state)| ContextStatus {
                context: context.to_string(),
                state: *state,
                target_url: None,
                description: None,
            })
            .collect(),
    }
}

// ─── FakeGitHub ───────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct FakeState {
    issues: HashMap<PrNumber, IssueData>,
    prs: HashMap<PrNumber, PrData>,
    mergeable: HashMap<PrNumber, VecDeque<Option<bool>>>,
    commits: HashMap<PrNumber, Vec<CommitData>>,
    events: HashMap<PrNumber, Vec<IssueEventData>>,
    comments: HashMap<PrNumber, Vec<CommentData>>,
    statuses: HashMap<String, VecDeque<CombinedStatus>>,
    branch_commits: HashMap<String, Vec<CommitData>>,
    merges: Vec<(PrNumber, String)>,
    merge_errors: VecDeque<GitHubApiError>,
    calls: Vec<ApiCall>,
    pr_fetches: Vec<Freshness>,
    next_comment_id: u64,
}

/// Pops the front of a script, keeping the last entry as the steady state.
fn next_scripted<T: Clone>(script: &mut VecDeque<T>) -> Option<T> {
    if script.len() > 1 {
        script.pop_front()
    } else {
        script.front().cloned()
    }
}

/// A scripted, in-memory GitHub.
#[derive(Debug, Default)]
pub struct FakeGitHub {
    state: Mutex<FakeState>,
}

impl FakeGitHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_pr(&self, fake: FakePr) {
        let mut state = self.lock();
        let number = fake.issue.number;
        state.issues.insert(number, fake.issue);
        state.prs.insert(number, fake.pr);
    }

    pub fn set_labels(&self, pr: PrNumber, labels: &[&str]) {
        if let Some(issue) = self.lock().issues.get_mut(&pr) {
            issue.labels = labels.iter().map(|l| l.to_string()).collect();
        }
    }

    pub fn close_pr(&self, pr: PrNumber) {
        let mut state = self.lock();
        if let Some(issue) = state.issues.get_mut(&pr) {
            issue.state = IssueState::Closed;
        }
        if let Some(data) = state.prs.get_mut(&pr) {
            data.state = IssueState::Closed;
        }
    }

    pub fn set_head(&self, pr: PrNumber, head: &str) {
        if let Some(data) = self.lock().prs.get_mut(&pr) {
            data.head_sha = Sha::from(head);
        }
    }

    /// Successive `GetPr` calls report these mergeable values in order; the
    /// last one repeats.
    pub fn script_mergeable(&self, pr: PrNumber, values: Vec<Option<bool>>) {
        self.lock().mergeable.insert(pr, values.into());
    }

    pub fn set_commits(&self, pr: PrNumber, commits: Vec<CommitData>) {
        self.lock().commits.insert(pr, commits);
    }

    pub fn set_events(&self, pr: PrNumber, events: Vec<IssueEventData>) {
        self.lock().events.insert(pr, events);
    }

    /// Appends a combined status for a SHA or branch. Each fetch consumes
    /// one entry; the last one repeats.
    pub fn push_status(&self, reference: &str, status: CombinedStatus) {
        self.lock()
            .statuses
            .entry(reference.to_string())
            .or_default()
            .push_back(status);
    }

    pub fn set_branch_commits(&self, branch: &str, commits: Vec<CommitData>) {
        self.lock()
            .branch_commits
            .insert(branch.to_string(), commits);
    }

    pub fn fail_next_merge(&self, error: GitHubApiError) {
        self.lock().merge_errors.push_back(error);
    }

    pub fn comments_on(&self, pr: PrNumber) -> Vec<String> {
        self.lock()
            .comments
            .get(&pr)
            .map(|c| c.iter().map(|c| c.body.clone()).collect())
            .unwrap_or_default()
    }

    /// Successful merges as (PR, commit message).
    pub fn merges(&self) -> Vec<(PrNumber, String)> {
        self.lock().merges.clone()
    }

    pub fn merged_prs(&self) -> Vec<PrNumber> {
        self.lock().merges.iter().map(|(pr, _)| *pr).collect()
    }

    /// Number of interpreted effects of the named kind.
    pub fn calls(&self, kind: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.to_string() == kind)
            .count()
    }

    /// Freshness of every `GetPr`, in call order.
    pub fn pr_fetches(&self) -> Vec<Freshness> {
        self.lock().pr_fetches.clone()
    }

    fn execute(&self, effect: GitHubEffect) -> Result<GitHubResponse, GitHubApiError> {
        let mut state = self.lock();
        state.calls.push(ApiCall::of(&effect));
        let not_found = |what: &str| GitHubApiError::from_status(404, format!("{} Not Found", what));

        match effect {
            GitHubEffect::GetIssue { pr, .. } => state
                .issues
                .get(&pr)
                .cloned()
                .map(GitHubResponse::Issue)
                .ok_or_else(|| not_found("issue")),
            GitHubEffect::GetPr { pr, freshness } => {
                state.pr_fetches.push(freshness);
                let scripted = state.mergeable.get_mut(&pr).and_then(next_scripted);
                let mut data = state.prs.get(&pr).cloned().ok_or_else(|| not_found("pull"))?;
                if let Some(mergeable) = scripted {
                    data.mergeable = mergeable;
                }
                Ok(GitHubResponse::Pr(data))
            }
            GitHubEffect::ListCommits { pr } => Ok(GitHubResponse::Commits(
                state.commits.get(&pr).cloned().unwrap_or_default(),
            )),
            GitHubEffect::ListEvents { pr } => Ok(GitHubResponse::Events(
                state.events.get(&pr).cloned().unwrap_or_default(),
            )),
            GitHubEffect::ListComments { pr } => Ok(GitHubResponse::Comments(
                state.comments.get(&pr).cloned().unwrap_or_default(),
            )),
            GitHubEffect::GetCombinedStatus { reference, .. } => {
                let status = state
                    .statuses
                    .get_mut(&reference)
                    .and_then(next_scripted)
                    .unwrap_or_else(|| CombinedStatus {
                        sha: Sha::from(reference.as_str()),
                        state: StatusState::Pending,
                        statuses: Vec::new(),
                    });
                Ok(GitHubResponse::CombinedStatus(status))
            }
            GitHubEffect::ListOpenPrs => {
                let mut open: Vec<PrNumber> = state
                    .issues
                    .values()
                    .filter(|i| i.state.is_open() && i.is_pull_request)
                    .map(|i| i.number)
                    .collect();
                open.sort_unstable();
                Ok(GitHubResponse::PrNumbers(open))
            }
            GitHubEffect::ListBranchCommits { branch, limit } => {
                let commits = state.branch_commits.get(&branch).cloned().unwrap_or_default();
                Ok(GitHubResponse::Commits(
                    commits.into_iter().take(limit as usize).collect(),
                ))
            }
            GitHubEffect::PostComment { pr, body } => {
                state.next_comment_id += 1;
                let id = CommentId(state.next_comment_id);
                state.comments.entry(pr).or_default().push(CommentData {
                    id,
                    author: "submit-queue".to_string(),
                    body,
                    created_at: Some(Utc::now()),
                });
                Ok(GitHubResponse::CommentPosted { id })
            }
            GitHubEffect::Merge {
                pr,
                commit_message,
                expected_sha,
            } => {
                if let Some(error) = state.merge_errors.pop_front() {
                    return Err(error);
                }
                let data = state.prs.get_mut(&pr).ok_or_else(|| not_found("pull"))?;
                if let Some(expected) = &expected_sha
                    && *expected != data.head_sha
                {
                    return Err(GitHubApiError::sha_mismatch(
                        pr,
                        expected,
                        "Head branch was modified. Review and try the merge again.",
                    ));
                }
                data.merged = true;
                data.state = IssueState::Closed;
                if let Some(issue) = state.issues.get_mut(&pr) {
                    issue.state = IssueState::Closed;
                }
                state.merges.push((pr, commit_message));
                Ok(GitHubResponse::Merged {
                    sha: Sha::new(format!("merge-{}", pr.0)),
                })
            }
        }
    }
}

impl GitHubInterpreter for FakeGitHub {
    type Error = GitHubApiError;

    fn interpret(
        &self,
        effect: GitHubEffect,
    ) -> impl Future<Output = Result<GitHubResponse, Self::Error>> + Send {
        let result = self.execute(effect);
        async move { result }
    }
}
