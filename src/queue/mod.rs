//! Shared queue state: the status board, the re-test queue and the merge
//! lock.
//!
//! One std mutex guards the board and the queue together so that setting a
//! status and the queue cleanup it implies happen atomically. Nothing awaits
//! while holding it. The merge lock is separate and async: it is held across
//! the merge call by whichever of the merge worker or the batch reconciler
//! is merging.

mod merge_worker;
mod retest;
mod status;

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::admission::SubmitReason;
use crate::types::{IssueData, PrNumber};

pub use merge_worker::MergeWorker;
pub use retest::{Priority, QueueEntry, RetestQueue};
pub use status::{PrStatus, StatusBoard};

#[derive(Debug, Default)]
struct QueueState {
    board: StatusBoard,
    retest: RetestQueue,
}

/// What `GET /api` shows about the queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub prs: Vec<PrStatus>,
    pub queue: Vec<QueueEntry>,
    pub running: Option<PrNumber>,
}

#[derive(Debug, Default)]
pub struct SubmitQueue {
    state: Mutex<QueueState>,
    merge_lock: tokio::sync::Mutex<()>,
    wakeup: Notify,
}

impl SubmitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a new full pass on the status board.
    pub fn begin_pass(&self) {
        self.lock().board.rotate();
    }

    /// Records a PR's status. Any status other than the three queue states
    /// takes the PR out of the re-test queue.
    pub fn set_status(&self, issue: &IssueData, reason: SubmitReason) {
        let mut state = self.lock();
        Self::cleanup(&mut state, issue.number, &reason);
        state.board.set(PrStatus::new(issue, reason));
    }

    /// Like [`set_status`](Self::set_status) for a PR whose issue data is
    /// not at hand.
    pub fn set_reason(&self, number: PrNumber, reason: SubmitReason) {
        let mut state = self.lock();
        Self::cleanup(&mut state, number, &reason);
        state.board.set_reason(number, reason);
    }

    fn cleanup(state: &mut QueueState, number: PrNumber, reason: &SubmitReason) {
        if !reason.is_queue_state() && state.retest.remove(number).is_some() {
            debug!(pr = %number, reason = %reason, "removed from re-test queue");
        }
    }

    pub fn status_of(&self, number: PrNumber) -> Option<SubmitReason> {
        self.lock().board.get(number).map(|s| s.reason.clone())
    }

    /// Admits a PR to the re-test queue and wakes the merge worker.
    ///
    /// A PR the worker is already handling keeps its in-flight status.
    pub fn enqueue(&self, issue: &IssueData, priority: Priority) {
        {
            let mut state = self.lock();
            state.retest.insert(QueueEntry::new(issue, priority));
            if state.retest.running() != Some(issue.number) {
                state.board.set(PrStatus::new(issue, SubmitReason::Queued));
            }
        }
        self.wakeup.notify_one();
    }

    pub fn is_queued(&self, number: PrNumber) -> bool {
        self.lock().retest.contains(number)
    }

    /// Marks every queued PR with `reason` and empties the queue.
    pub fn flush(&self, reason: SubmitReason) -> Vec<PrNumber> {
        let mut state = self.lock();
        let flushed: Vec<PrNumber> = state.retest.drain().iter().map(|e| e.number).collect();
        for number in &flushed {
            state.board.set_reason(*number, reason.clone());
        }
        if !flushed.is_empty() {
            warn!(count = flushed.len(), reason = %reason, "flushed re-test queue");
        }
        flushed
    }

    /// Picks the head of the queue and marks it running.
    pub fn start_next(&self) -> Option<QueueEntry> {
        let mut state = self.lock();
        let head = state.retest.head().cloned()?;
        state.retest.set_running(Some(head.number));
        Some(head)
    }

    /// Removes the PR the worker just finished, whatever the outcome.
    pub fn finish(&self, number: PrNumber) {
        let mut state = self.lock();
        state.retest.remove(number);
        if state.retest.running() == Some(number) {
            state.retest.set_running(None);
        }
    }

    pub fn running(&self) -> Option<PrNumber> {
        self.lock().retest.running()
    }

    /// Waits until something was enqueued since the last wakeup.
    pub async fn wait_for_work(&self) {
        self.wakeup.notified().await;
    }

    /// Serializes merges across the merge worker and the batch reconciler.
    pub async fn merge_lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.merge_lock.lock().await
    }

    pub fn queued(&self) -> Vec<QueueEntry> {
        self.lock().retest.ordered()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.lock();
        QueueSnapshot {
            prs: state.board.snapshot(),
            queue: state.retest.ordered(),
            running: state.retest.running(),
        }
    }
}
