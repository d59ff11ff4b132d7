//! "What changed" bookkeeping fed by webhooks and drained by the poll loop.
//!
//! Webhook handlers only ever touch these trackers; they never see the queue
//! or the merge lock. Each tracker guards its maps with one short-held mutex.

mod commit;
mod refs;

use std::sync::Arc;

use crate::types::{PrNumber, Sha};

pub use commit::CommitChangeTracker;
pub use refs::RefChangeTracker;

/// Both trackers, shared by the webhook handler and the engine.
#[derive(Debug, Clone, Default)]
pub struct ChangeTrackers {
    pub commits: Arc<CommitChangeTracker>,
    pub refs: Arc<RefChangeTracker>,
}

impl ChangeTrackers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records what the poll loop learned about an open PR. `head_label` is
    /// the `owner:branch` of its head.
    pub fn observe(&self, pr: PrNumber, head_label: &str, head: Sha) {
        self.commits.update_commit(pr, head.clone());
        if self.refs.set_pull_request_ref(pr, head_label) {
            self.refs.update_ref_head(head_label, None, head);
        }
    }

    /// A status webhook for `commit`.
    pub fn status_changed(&self, commit: &Sha) {
        self.commits.change(commit);
        self.refs.commit_status_changed(commit);
    }

    /// A push webhook moving `reference` (`owner:branch`) from `before` to
    /// `after`.
    pub fn pushed(&self, reference: &str, before: Option<&Sha>, after: Sha) {
        self.refs.update_ref_head(reference, before, after);
    }

    /// Stops tracking a closed PR.
    pub fn forget(&self, pr: PrNumber, head_label: Option<&str>) {
        self.commits.forget(pr);
        if let Some(reference) = head_label {
            self.refs.forget_ref(reference);
        }
    }

    /// PRs either tracker reports, ascending and without duplicates.
    pub fn pop_changed(&self) -> Vec<PrNumber> {
        let mut changed = self.commits.pop_changed();
        changed.extend(self.refs.pop_changed());
        changed.sort_unstable();
        changed.dedup();
        changed
    }
}
