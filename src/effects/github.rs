//! GitHub API effect types.
//!
//! These describe the remote operations the submit queue performs, without
//! executing them. Effects are repo-scoped: the interpreter is constructed
//! with a `RepoId`, so effects don't carry it.

use serde::{Deserialize, Serialize};

use crate::types::{
    CombinedStatus, CommentData, CommentId, CommitData, IssueData, IssueEventData, PrData,
    PrNumber, Sha,
};

/// How much staleness a read tolerates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// A cached response inside its max-age is acceptable.
    #[default]
    Cached,
    /// Always revalidate with the server (`Cache-Control: max-age=0`).
    Fresh,
}

/// A GitHub API effect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GitHubEffect {
    // ─── Queries ──────────────────────────────────────────────────────────────
    /// Fetch the issue metadata of a PR.
    GetIssue { pr: PrNumber, freshness: Freshness },

    /// Fetch the pull request sub-resource.
    GetPr { pr: PrNumber, freshness: Freshness },

    /// List the commits of a PR, oldest first.
    ListCommits { pr: PrNumber },

    /// List the issue event timeline of a PR.
    ListEvents { pr: PrNumber },

    /// List the conversation comments of a PR.
    ListComments { pr: PrNumber },

    /// Fetch the combined status of a commit SHA or branch name.
    GetCombinedStatus { reference: String, freshness: Freshness },

    /// List the numbers of all open pull requests.
    ListOpenPrs,

    /// List up to `limit` commits reachable from a branch, newest first.
    ListBranchCommits { branch: String, limit: u32 },

    // ─── Mutations ────────────────────────────────────────────────────────────
    /// Post a comment on a PR.
    PostComment { pr: PrNumber, body: String },

    /// Merge a PR with a merge commit carrying `commit_message`.
    Merge {
        pr: PrNumber,
        commit_message: String,
        /// When set, GitHub refuses the merge if the head moved.
        expected_sha: Option<Sha>,
    },
}

impl GitHubEffect {
    /// Returns true for effects that change remote state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            GitHubEffect::PostComment { .. } | GitHubEffect::Merge { .. }
        )
    }
}

/// Response from executing a GitHub effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitHubResponse {
    Issue(IssueData),
    Pr(PrData),
    Commits(Vec<CommitData>),
    Events(Vec<IssueEventData>),
    Comments(Vec<CommentData>),
    CombinedStatus(CombinedStatus),
    PrNumbers(Vec<PrNumber>),
    CommentPosted { id: CommentId },
    Merged { sha: Sha },
}

impl GitHubResponse {
    /// Short name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            GitHubResponse::Issue(_) => "issue",
            GitHubResponse::Pr(_) => "pr",
            GitHubResponse::Commits(_) => "commits",
            GitHubResponse::Events(_) => "events",
            GitHubResponse::Comments(_) => "comments",
            GitHubResponse::CombinedStatus(_) => "combined_status",
            GitHubResponse::PrNumbers(_) => "pr_numbers",
            GitHubResponse::CommentPosted { .. } => "comment_posted",
            GitHubResponse::Merged { .. } => "merged",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effect_serializes_with_type_tag() {
        let effect = GitHubEffect::GetPr {
            pr: PrNumber(7),
            freshness: Freshness::Fresh,
        };
        let json = serde_json::to_value(&effect).unwrap();
        assert_eq!(json["type"], "get_pr");
        assert_eq!(json["pr"], 7);
        assert_eq!(json["freshness"], "fresh");
    }

    #[test]
    fn only_comment_and_merge_mutate() {
        assert!(
            GitHubEffect::PostComment {
                pr: PrNumber(1),
                body: "hi".into()
            }
            .is_mutation()
        );
        assert!(
            GitHubEffect::Merge {
                pr: PrNumber(1),
                commit_message: String::new(),
                expected_sha: None,
            }
            .is_mutation()
        );
        assert!(!GitHubEffect::ListOpenPrs.is_mutation());
    }
}
