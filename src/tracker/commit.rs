//! Commit-keyed change tracking.
//!
//! Each PR is associated with at most one current head commit. A CI status
//! notification for a commit marks every PR currently at that commit as
//! changed; the poll loop drains the changed set to decide what to
//! re-evaluate.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use crate::types::{PrNumber, Sha};

#[derive(Debug, Default)]
struct CommitState {
    /// Reverse index: commit → PRs whose current head it is.
    issues: HashMap<Sha, HashSet<PrNumber>>,
    /// Forward index: PR → current head commit.
    commits: HashMap<PrNumber, Sha>,
    changed: HashSet<PrNumber>,
}

/// Maps commit SHAs to the PRs whose head they are.
#[derive(Debug, Default)]
pub struct CommitChangeTracker {
    state: Mutex<CommitState>,
}

impl CommitChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `commit` as the current head of `pr`.
    ///
    /// The PR is removed from its previous commit's set first, so a later
    /// change to the old commit no longer reports it.
    pub fn update_commit(&self, pr: PrNumber, commit: Sha) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = state.commits.insert(pr, commit.clone()) {
            if previous == commit {
                return;
            }
            if let Some(prs) = state.issues.get_mut(&previous) {
                prs.remove(&pr);
                if prs.is_empty() {
                    state.issues.remove(&previous);
                }
            }
        }
        state.issues.entry(commit).or_default().insert(pr);
    }

    /// Marks every PR currently at `commit` as changed. Unknown commits are
    /// ignored.
    pub fn change(&self, commit: &Sha) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let CommitState {
            issues, changed, ..
        } = &mut *state;
        if let Some(prs) = issues.get(commit) {
            changed.extend(prs.iter().copied());
        }
    }

    /// Forgets a PR entirely (closed or merged).
    pub fn forget(&self, pr: PrNumber) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.changed.remove(&pr);
        if let Some(commit) = state.commits.remove(&pr)
            && let Some(prs) = state.issues.get_mut(&commit)
        {
            prs.remove(&pr);
            if prs.is_empty() {
                state.issues.remove(&commit);
            }
        }
    }

    /// Drains the changed set, in ascending PR order.
    pub fn pop_changed(&self) -> Vec<PrNumber> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut changed: Vec<PrNumber> = state.changed.drain().collect();
        changed.sort_unstable();
        changed
    }

    /// Current head commit recorded for `pr`.
    pub fn commit_of(&self, pr: PrNumber) -> Option<Sha> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.commits.get(&pr).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn sha(s: &str) -> Sha {
        Sha::from(s)
    }

    #[test]
    fn change_reports_prs_at_commit() {
        let tracker = CommitChangeTracker::new();
        tracker.update_commit(PrNumber(1), sha("a"));
        tracker.update_commit(PrNumber(2), sha("a"));
        tracker.update_commit(PrNumber(3), sha("b"));

        tracker.change(&sha("a"));
        assert_eq!(tracker.pop_changed(), vec![PrNumber(1), PrNumber(2)]);
    }

    #[test]
    fn moved_pr_is_not_reported_for_old_commit() {
        let tracker = CommitChangeTracker::new();
        tracker.update_commit(PrNumber(1), sha("a"));
        tracker.update_commit(PrNumber(1), sha("b"));

        tracker.change(&sha("a"));
        assert!(tracker.pop_changed().is_empty());

        tracker.change(&sha("b"));
        assert_eq!(tracker.pop_changed(), vec![PrNumber(1)]);
    }

    #[test]
    fn repeated_changes_report_once() {
        let tracker = CommitChangeTracker::new();
        tracker.update_commit(PrNumber(5), sha("a"));
        tracker.change(&sha("a"));
        tracker.change(&sha("a"));
        assert_eq!(tracker.pop_changed(), vec![PrNumber(5)]);
        assert!(tracker.pop_changed().is_empty());
    }

    #[test]
    fn unknown_commit_is_ignored() {
        let tracker = CommitChangeTracker::new();
        tracker.change(&sha("nope"));
        assert!(tracker.pop_changed().is_empty());
    }

    #[test]
    fn forget_drops_pending_change() {
        let tracker = CommitChangeTracker::new();
        tracker.update_commit(PrNumber(1), sha("a"));
        tracker.change(&sha("a"));
        tracker.forget(PrNumber(1));
        assert!(tracker.pop_changed().is_empty());
        assert_eq!(tracker.commit_of(PrNumber(1)), None);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Update(u64, u8),
        Change(u8),
        Pop,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u64..6, 0u8..4).prop_map(|(pr, c)| Op::Update(pr, c)),
            (0u8..4).prop_map(Op::Change),
            Just(Op::Pop),
        ]
    }

    proptest! {
        /// Against a simple model: a pop reports exactly the PRs whose
        /// current commit was changed since the previous pop.
        #[test]
        fn pop_matches_model(ops in prop::collection::vec(op(), 0..60)) {
            let tracker = CommitChangeTracker::new();
            let mut heads: HashMap<u64, u8> = HashMap::new();
            let mut pending: BTreeSet<u64> = BTreeSet::new();

            for op in ops {
                match op {
                    Op::Update(pr, c) => {
                        tracker.update_commit(PrNumber(pr), sha(&c.to_string()));
                        heads.insert(pr, c);
                    }
                    Op::Change(c) => {
                        tracker.change(&sha(&c.to_string()));
                        pending.extend(heads.iter().filter(|(_, h)| **h == c).map(|(pr, _)| *pr));
                    }
                    Op::Pop => {
                        let expected: Vec<PrNumber> =
                            std::mem::take(&mut pending).into_iter().map(PrNumber).collect();
                        prop_assert_eq!(tracker.pop_changed(), expected);
                    }
                }
            }

            let expected: Vec<PrNumber> = pending.into_iter().map(PrNumber).collect();
            prop_assert_eq!(tracker.pop_changed(), expected);
            prop_assert!(tracker.pop_changed().is_empty());
        }
    }
}
