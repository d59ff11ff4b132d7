//! Ref-keyed change tracking.
//!
//! Status webhooks arrive keyed by commit SHA, but the association between a
//! SHA and a PR is only known through the branch ref that pointed at it. This
//! tracker follows ref heads through push events and attributes a status
//! change to a PR only if its ref still points at the changed commit when the
//! changes are drained. Notifications for commits a ref has since moved away
//! from are dropped.
//!
//! Refs are keyed by GitHub's `owner:branch` label, so same-named branches in
//! different forks never collide.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use crate::types::{PrNumber, Sha};

#[derive(Debug, Default)]
struct RefState {
    /// ref → PR it belongs to.
    refs: HashMap<String, PrNumber>,
    /// commit → refs currently pointing at it.
    heads: HashMap<Sha, HashSet<String>>,
    /// ref → commit it currently points at.
    ref_heads: HashMap<String, Sha>,
    /// (ref, commit) pairs whose status changed since the last drain.
    changed: HashSet<(String, Sha)>,
}

impl RefState {
    fn unlink(&mut self, reference: &str, head: &Sha) {
        if let Some(refs) = self.heads.get_mut(head) {
            refs.remove(reference);
            if refs.is_empty() {
                self.heads.remove(head);
            }
        }
    }
}

/// Maps branch refs to PRs and commits to refs.
#[derive(Debug, Default)]
pub struct RefChangeTracker {
    state: Mutex<RefState>,
}

impl RefChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associates `reference` with `pr`.
    ///
    /// Returns true if the ref was not tracked before, in which case the
    /// caller should seed its current head with
    /// [`update_ref_head`](Self::update_ref_head).
    pub fn set_pull_request_ref(&self, pr: PrNumber, reference: &str) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.refs.insert(reference.to_string(), pr).is_none()
    }

    /// Moves `reference` from `previous` to `new`.
    ///
    /// `previous` is what the pusher saw; the tracker also drops whatever
    /// head it had recorded, so a missed push cannot leave a stale link.
    pub fn update_ref_head(&self, reference: &str, previous: Option<&Sha>, new: Sha) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = previous {
            state.unlink(reference, previous);
        }
        if let Some(recorded) = state.ref_heads.insert(reference.to_string(), new.clone())
            && recorded != new
        {
            state.unlink(reference, &recorded);
        }
        state
            .heads
            .entry(new)
            .or_default()
            .insert(reference.to_string());
    }

    /// Records a CI status change for `commit` against every ref at it.
    pub fn commit_status_changed(&self, commit: &Sha) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(refs) = state.heads.get(commit) else {
            return;
        };
        let pairs: Vec<(String, Sha)> = refs
            .iter()
            .map(|reference| (reference.clone(), commit.clone()))
            .collect();
        state.changed.extend(pairs);
    }

    /// Stops tracking `reference` (its PR closed).
    pub fn forget_ref(&self, reference: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.refs.remove(reference);
        if let Some(head) = state.ref_heads.remove(reference) {
            state.unlink(reference, &head);
        }
        state.changed.retain(|(r, _)| r != reference);
    }

    /// Drains pending changes into PR numbers, in ascending order.
    ///
    /// A change is kept only if its ref still points at the changed commit
    /// and still belongs to a PR.
    pub fn pop_changed(&self) -> Vec<PrNumber> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let changed: Vec<(String, Sha)> = state.changed.drain().collect();
        let mut prs: Vec<PrNumber> = changed
            .into_iter()
            .filter(|(reference, commit)| state.ref_heads.get(reference) == Some(commit))
            .filter_map(|(reference, _)| state.refs.get(&reference).copied())
            .collect();
        prs.sort_unstable();
        prs.dedup();
        prs
    }

    /// The commit `reference` currently points at, if known.
    pub fn head_of(&self, reference: &str) -> Option<Sha> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.ref_heads.get(reference).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sha(s: &str) -> Sha {
        Sha::from(s)
    }

    #[test]
    fn first_sight_of_ref_is_reported() {
        let tracker = RefChangeTracker::new();
        assert!(tracker.set_pull_request_ref(PrNumber(1), "refs/heads/feature"));
        assert!(!tracker.set_pull_request_ref(PrNumber(1), "refs/heads/feature"));
    }

    #[test]
    fn status_change_maps_to_pr_through_ref() {
        let tracker = RefChangeTracker::new();
        tracker.set_pull_request_ref(PrNumber(7), "feature");
        tracker.update_ref_head("feature", None, sha("a"));

        tracker.commit_status_changed(&sha("a"));
        assert_eq!(tracker.pop_changed(), vec![PrNumber(7)]);
        assert!(tracker.pop_changed().is_empty());
    }

    #[test]
    fn moved_ref_drops_stale_notification() {
        let tracker = RefChangeTracker::new();
        tracker.set_pull_request_ref(PrNumber(7), "feature");
        tracker.update_ref_head("feature", None, sha("a"));

        tracker.commit_status_changed(&sha("a"));
        tracker.update_ref_head("feature", Some(&sha("a")), sha("b"));

        assert!(tracker.pop_changed().is_empty());
        assert_eq!(tracker.head_of("feature"), Some(sha("b")));
    }

    #[test]
    fn status_for_old_head_after_move_is_ignored() {
        let tracker = RefChangeTracker::new();
        tracker.set_pull_request_ref(PrNumber(7), "feature");
        tracker.update_ref_head("feature", None, sha("a"));
        tracker.update_ref_head("feature", Some(&sha("a")), sha("b"));

        tracker.commit_status_changed(&sha("a"));
        assert!(tracker.pop_changed().is_empty());
    }

    #[test]
    fn untracked_ref_head_is_not_a_pr() {
        let tracker = RefChangeTracker::new();
        tracker.update_ref_head("master", None, sha("m"));
        tracker.commit_status_changed(&sha("m"));
        assert!(tracker.pop_changed().is_empty());
    }

    #[test]
    fn forgotten_ref_stops_reporting() {
        let tracker = RefChangeTracker::new();
        tracker.set_pull_request_ref(PrNumber(3), "feature");
        tracker.update_ref_head("feature", None, sha("a"));
        tracker.commit_status_changed(&sha("a"));
        tracker.forget_ref("feature");
        assert!(tracker.pop_changed().is_empty());
        assert!(tracker.set_pull_request_ref(PrNumber(3), "feature"));
    }

    proptest! {
        #[test]
        fn pop_is_draining(
            pushes in prop::collection::vec((0u8..3, 0u8..4), 0..30),
            statuses in prop::collection::vec(0u8..4, 0..30),
        ) {
            let tracker = RefChangeTracker::new();
            for r in 0u8..3 {
                tracker.set_pull_request_ref(PrNumber(u64::from(r)), &format!("ref{}", r));
            }
            for (r, c) in pushes {
                let reference = format!("ref{}", r);
                let previous = tracker.head_of(&reference);
                tracker.update_ref_head(&reference, previous.as_ref(), sha(&c.to_string()));
            }
            for c in statuses {
                tracker.commit_status_changed(&sha(&c.to_string()));
            }

            let first = tracker.pop_changed();
            for pr in &first {
                let head = tracker.head_of(&format!("ref{}", pr.0));
                prop_assert!(head.is_some());
            }
            let mut deduped = first.clone();
            deduped.dedup();
            prop_assert_eq!(&first, &deduped);
            prop_assert!(tracker.pop_changed().is_empty());
        }
    }
}
