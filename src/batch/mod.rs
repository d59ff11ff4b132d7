//! Batch merging.
//!
//! CI may test several queued PRs merged together onto one base commit. A
//! [`Batch`] is that claim: base branch and SHA plus the PRs, in merge order,
//! with the head SHA each was tested at. Before trusting a passing batch the
//! reconciler proves the base branch history is still compatible with it
//! ([`Batch::matches_commits`]).

mod jobs;
mod reconciler;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::github::GitHubApiError;
use crate::types::{CommitData, PrNumber, Sha};

pub use jobs::{BatchJob, HttpJobSource, complete_batches};
pub use reconciler::{BatchReconciler, BatchStatus, SharedBatchStatus};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("bad batch descriptor {0:?}")]
    BadDescriptor(String),

    #[error("no commits")]
    NoCommits,

    #[error("ran out of commits (missing ref {0})")]
    MissingCommit(Sha),

    #[error("merge of something not in batch ({0})")]
    OutsideBatch(Sha),

    #[error("unknown non-merge commit {0}")]
    NonMergeCommit(Sha),

    #[error("batch PRs merged out of order")]
    OutOfOrder,

    #[error("PR {pr} head changed: {actual} instead of {expected}")]
    HeadChanged {
        pr: PrNumber,
        expected: Sha,
        actual: Sha,
    },

    #[error("failed to get branch commits: {0}")]
    GitHub(#[from] GitHubApiError),

    #[error("failed to read batch jobs: {0}")]
    Jobs(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchPull {
    pub number: PrNumber,
    pub sha: Sha,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Batch {
    pub base_name: String,
    pub base_sha: Sha,
    pub pulls: Vec<BatchPull>,
}

impl FromStr for Batch {
    type Err = BatchError;

    /// Parses `base:sha,pr:sha,pr:sha,...`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || BatchError::BadDescriptor(s.to_string());
        let mut parts = s.split(',').map(|part| {
            let (name, sha) = part.split_once(':').ok_or_else(bad)?;
            if name.is_empty() || sha.is_empty() || sha.contains(':') {
                return Err(bad());
            }
            Ok((name, Sha::from(sha)))
        });

        let (base_name, base_sha) = parts.next().ok_or_else(bad)??;
        let pulls = parts
            .map(|part| {
                let (number, sha) = part?;
                let number = number.parse::<u64>().map_err(|_| bad())?;
                Ok(BatchPull {
                    number: PrNumber(number),
                    sha,
                })
            })
            .collect::<Result<Vec<_>, BatchError>>()?;

        Ok(Batch {
            base_name: base_name.to_string(),
            base_sha,
            pulls,
        })
    }
}

impl fmt::Display for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.base_name, self.base_sha)?;
        for pull in &self.pulls {
            write!(f, ",{}:{}", pull.number.0, pull.sha)?;
        }
        Ok(())
    }
}

impl Batch {
    /// Checks the batch against the base branch history, newest first.
    ///
    /// Walking back from the tip, every commit down to the batch's base SHA
    /// must be a merge commit whose second parent is the head of a batch PR,
    /// and those PRs must be the batch's leading PRs in batch order. Returns
    /// how many of them are already merged.
    pub fn matches_commits(&self, commits: &[CommitData]) -> Result<usize, BatchError> {
        let tip = commits.first().ok_or(BatchError::NoCommits)?;

        let sha_to_pr: HashMap<&Sha, PrNumber> =
            self.pulls.iter().map(|p| (&p.sha, p.number)).collect();
        let dag: HashMap<&Sha, &CommitData> = commits.iter().map(|c| (&c.sha, c)).collect();

        // Newest merge first.
        let mut merged: Vec<PrNumber> = Vec::new();
        let mut reference = &tip.sha;
        while *reference != self.base_sha {
            let commit = dag
                .get(reference)
                .ok_or_else(|| BatchError::MissingCommit(reference.clone()))?;
            let is_merge = commit.parents.len() == 2 && commit.message.starts_with("Merge");
            if !is_merge {
                return Err(BatchError::NonMergeCommit(reference.clone()));
            }
            let pr = sha_to_pr
                .get(&commit.parents[1])
                .ok_or_else(|| BatchError::OutsideBatch(commit.parents[1].clone()))?;
            merged.push(*pr);
            reference = &commit.parents[0];
        }

        let count = merged.len();
        if count > self.pulls.len() {
            return Err(BatchError::OutOfOrder);
        }
        let in_order = merged
            .iter()
            .rev()
            .zip(&self.pulls)
            .all(|(merged, pull)| *merged == pull.number);
        if !in_order {
            return Err(BatchError::OutOfOrder);
        }
        Ok(count)
    }
}
