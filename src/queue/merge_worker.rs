//! The single worker that re-tests the head of the queue and merges it.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use super::{QueueEntry, SubmitQueue};
use crate::admission::SubmitReason;
use crate::config::QueueConfig;
use crate::effects::GitHub;
use crate::health::SharedHealth;
use crate::pr_view::{Mergeability, PrView, ViewConfig, WaitOutcome};
use crate::types::{PrNumber, Sha};

pub struct MergeWorker<G> {
    github: Arc<G>,
    queue: Arc<SubmitQueue>,
    health: SharedHealth,
    config: Arc<QueueConfig>,
    view_config: ViewConfig,
}

impl<G: GitHub> MergeWorker<G> {
    pub fn new(
        github: Arc<G>,
        queue: Arc<SubmitQueue>,
        health: SharedHealth,
        config: Arc<QueueConfig>,
        view_config: ViewConfig,
    ) -> Self {
        Self {
            github,
            queue,
            health,
            config,
            view_config,
        }
    }

    /// Drains the queue one PR at a time until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        info!("merge worker started");
        loop {
            while let Some(entry) = self.queue.start_next() {
                if cancel.is_cancelled() {
                    self.queue.finish(entry.number);
                    break;
                }
                self.process(&entry).await;
                self.queue.finish(entry.number);
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.queue.wait_for_work() => {}
            }
        }
        info!("merge worker stopped");
    }

    /// Re-tests and merges one PR, recording the outcome on the board.
    pub async fn process(&self, entry: &QueueEntry) -> SubmitReason {
        let reason = self.verify_and_merge(entry.number).await;
        self.queue.set_reason(entry.number, reason.clone());
        reason
    }

    #[instrument(skip(self), fields(pr = %number))]
    async fn verify_and_merge(&self, number: PrNumber) -> SubmitReason {
        let mut view =
            match PrView::load(self.github.clone(), self.view_config, number).await {
                Ok(view) => view,
                Err(e) => {
                    warn!(error = %e, "failed to load PR");
                    return SubmitReason::Unknown;
                }
            };
        if let Err(e) = view.refresh().await {
            warn!(error = %e, "failed to refresh PR");
            return SubmitReason::Unknown;
        }

        match view.is_merged().await {
            Ok(true) => return SubmitReason::Merged,
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, "failed to read merged state");
                return SubmitReason::Unknown;
            }
        }
        if !view.issue().state.is_open() {
            info!("PR closed while queued");
            return SubmitReason::Unknown;
        }

        match view.is_mergeable().await {
            Ok(Mergeability::Mergeable) => {}
            Ok(Mergeability::Conflicting) => return SubmitReason::Unmergeable,
            Ok(Mergeability::Undetermined) => return SubmitReason::UndeterminedMergeability,
            Err(e) => {
                warn!(error = %e, "failed to check mergeability");
                return SubmitReason::Unknown;
            }
        }

        let tested = match view.head_sha().await {
            Ok(sha) => sha,
            Err(e) => {
                warn!(error = %e, "failed to read head");
                return SubmitReason::Unknown;
            }
        };
        let skip_retest = view.has_label(&self.config.labels.retest_not_required)
            || self.config.retest_contexts.is_empty();
        if !skip_retest && let Some(reason) = self.retest(&mut view).await {
            return reason;
        }

        if !self.health.is_stable() {
            self.queue.flush(SubmitReason::E2eFailure);
            return SubmitReason::E2eFailure;
        }

        self.merge(&mut view, &tested).await
    }

    /// Asks CI to re-run and waits for the result. `None` means green.
    async fn retest(&self, view: &mut PrView<G>) -> Option<SubmitReason> {
        let number = view.number();
        if let Err(e) = view.write_comment(&self.config.retest_comment).await {
            warn!(error = %e, "failed to request re-test");
            return Some(SubmitReason::Unknown);
        }

        let contexts = &self.config.retest_contexts;
        self.queue.set_reason(number, SubmitReason::WaitingStart);
        if view.wait_for_pending(contexts).await == WaitOutcome::TimedOut {
            return Some(SubmitReason::WaitFailed(
                "Failed waiting for PR to start testing: timed out".to_string(),
            ));
        }

        self.queue.set_reason(number, SubmitReason::Running);
        if view.wait_for_not_pending(contexts).await == WaitOutcome::TimedOut {
            return Some(SubmitReason::WaitFailed(
                "Failed waiting for PR to finish testing: timed out".to_string(),
            ));
        }

        match view.is_status_success(contexts).await {
            Ok(true) => None,
            Ok(false) => Some(SubmitReason::RetestFailed),
            Err(e) => {
                warn!(error = %e, "failed to read re-test result");
                Some(SubmitReason::Unknown)
            }
        }
    }

    /// Merges `tested`, the head the re-test ran against.
    async fn merge(&self, view: &mut PrView<G>, tested: &Sha) -> SubmitReason {
        let _guard = self.queue.merge_lock().await;

        // A batch merge may have landed this PR while we waited for the lock.
        if let Err(e) = view.refresh().await {
            warn!(error = %e, "failed to refresh PR before merging");
            return SubmitReason::Unknown;
        }
        if matches!(view.is_merged().await, Ok(true)) {
            return SubmitReason::Merged;
        }
        match view.head_sha().await {
            Ok(head) if head == *tested => {}
            Ok(head) => {
                info!(tested = %tested.short(), head = %head.short(), "head moved since re-test");
                return SubmitReason::HeadChanged;
            }
            Err(e) => {
                warn!(error = %e, "failed to read head before merging");
                return SubmitReason::Unknown;
            }
        }

        match view.merge_pr(&self.config.actor).await {
            Ok(sha) => {
                info!(sha = %sha.short(), "merged");
                self.health.record_merge(Utc::now());
                SubmitReason::Merged
            }
            Err(e) => {
                error!(error = %e, "merge failed");
                SubmitReason::MergeFailed(format!("Merge failed: {}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::health::{BuildInfo, BuildState};
    use crate::queue::Priority;
    use crate::test_utils::{FakeGitHub, commit_at, open_pr, status_of};
    use crate::types::StatusState;

    fn config() -> QueueConfig {
        QueueConfig {
            required_contexts: vec!["ci/unit".to_string()],
            retest_contexts: vec!["ci/e2e".to_string()],
            ..QueueConfig::default()
        }
    }

    fn worker(github: &Arc<FakeGitHub>, queue: &Arc<SubmitQueue>, health: &SharedHealth) -> MergeWorker<FakeGitHub> {
        MergeWorker::new(
            github.clone(),
            queue.clone(),
            health.clone(),
            Arc::new(config()),
            ViewConfig::immediate(),
        )
    }

    fn setup(labels: &[&str]) -> (Arc<FakeGitHub>, Arc<SubmitQueue>, SharedHealth, QueueEntry) {
        let github = Arc::new(FakeGitHub::new());
        let pr = open_pr(1, "h1").with_labels(labels);
        let issue = pr.issue.clone();
        github.add_pr(pr);
        github.set_commits(PrNumber(1), vec![commit_at("h1", 100)]);
        let queue = Arc::new(SubmitQueue::new());
        queue.enqueue(&issue, Priority::DEFAULT);
        let entry = queue.start_next().unwrap();
        (github, queue, SharedHealth::new(Utc::now()), entry)
    }

    fn script_retest(github: &FakeGitHub, outcome: StatusState) {
        for state in [StatusState::Success, StatusState::Pending, outcome] {
            github.push_status("h1", status_of("h1", &[("ci/e2e", state)]));
        }
    }

    #[tokio::test]
    async fn green_retest_merges() {
        let (github, queue, health, entry) = setup(&["cla: yes", "lgtm"]);
        script_retest(&github, StatusState::Success);

        let reason = worker(&github, &queue, &health).process(&entry).await;
        assert_eq!(reason, SubmitReason::Merged);
        assert_eq!(github.merged_prs(), vec![PrNumber(1)]);
        let comments = github.comments_on(PrNumber(1));
        assert_eq!(comments[0], config().retest_comment);
        assert_eq!(comments[1], "Automatic merge from submit-queue");
        assert_eq!(queue.status_of(PrNumber(1)), Some(SubmitReason::Merged));
    }

    #[tokio::test]
    async fn push_during_retest_blocks_the_merge() {
        let (github, queue, health, entry) = setup(&["cla: yes", "lgtm"]);
        github.push_status("h1", status_of("h1", &[("ci/e2e", StatusState::Success)]));
        github.push_status("h2", status_of("h2", &[("ci/e2e", StatusState::Pending)]));
        github.push_status("h2", status_of("h2", &[("ci/e2e", StatusState::Success)]));

        let pushing = github.clone();
        let worker = worker(&github, &queue, &health);
        let process = worker.process(&entry);
        let push = async move {
            while pushing.comments_on(PrNumber(1)).is_empty() {
                tokio::task::yield_now().await;
            }
            pushing.set_head(PrNumber(1), "h2");
        };
        let (reason, ()) = tokio::join!(process, push);

        assert_eq!(reason, SubmitReason::HeadChanged);
        assert!(github.merged_prs().is_empty());
        assert_eq!(queue.status_of(PrNumber(1)), Some(SubmitReason::HeadChanged));
    }

    #[tokio::test]
    async fn red_retest_does_not_merge() {
        let (github, queue, health, entry) = setup(&[]);
        script_retest(&github, StatusState::Failure);

        let reason = worker(&github, &queue, &health).process(&entry).await;
        assert_eq!(reason, SubmitReason::RetestFailed);
        assert!(github.merged_prs().is_empty());
    }

    #[tokio::test]
    async fn skip_retest_label_merges_without_comment() {
        let (github, queue, health, entry) = setup(&["retest-not-required"]);

        let reason = worker(&github, &queue, &health).process(&entry).await;
        assert_eq!(reason, SubmitReason::Merged);
        assert_eq!(github.comments_on(PrNumber(1)), vec!["Automatic merge from submit-queue"]);
    }

    #[tokio::test]
    async fn already_merged_pr_is_reported_merged() {
        let (github, queue, health, entry) = setup(&[]);
        fetch_merge(&github).await;

        let reason = worker(&github, &queue, &health).process(&entry).await;
        assert_eq!(reason, SubmitReason::Merged);
        assert_eq!(github.calls("Merge"), 1);
    }

    async fn fetch_merge(github: &Arc<FakeGitHub>) {
        crate::effects::fetch::merge(&**github, PrNumber(1), "manual".to_string(), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unstable_ci_flushes_queue() {
        let (github, queue, health, entry) = setup(&["retest-not-required"]);
        queue.enqueue(&open_pr(2, "h2").issue, Priority::DEFAULT);
        let mut builds = BTreeMap::new();
        builds.insert(
            "e2e".to_string(),
            BuildInfo {
                state: BuildState::NotStable,
                gating: true,
                url: None,
                detail: None,
            },
        );
        health.update_builds(builds);

        let reason = worker(&github, &queue, &health).process(&entry).await;
        assert_eq!(reason, SubmitReason::E2eFailure);
        assert!(github.merged_prs().is_empty());
        assert!(!queue.is_queued(PrNumber(2)));
        assert_eq!(queue.status_of(PrNumber(2)), Some(SubmitReason::E2eFailure));
    }

    #[tokio::test]
    async fn conflicting_pr_is_not_retested() {
        let (github, queue, health, entry) = setup(&[]);
        github.script_mergeable(PrNumber(1), vec![Some(false)]);

        let reason = worker(&github, &queue, &health).process(&entry).await;
        assert_eq!(reason, SubmitReason::Unmergeable);
        assert!(github.comments_on(PrNumber(1)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn retest_that_never_starts_times_out() {
        let (github, queue, health, entry) = setup(&[]);
        github.push_status("h1", status_of("h1", &[("ci/e2e", StatusState::Success)]));

        let reason = worker(&github, &queue, &health).process(&entry).await;
        assert!(matches!(reason, SubmitReason::WaitFailed(ref text) if text.contains("start testing")));
    }

    #[tokio::test]
    async fn run_drains_queue_and_stops_on_cancel() {
        let (github, queue, health, entry) = setup(&["retest-not-required"]);
        queue.finish(entry.number);
        queue.enqueue(&open_pr(1, "h1").issue, Priority::SKIP_RETEST);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(worker(&github, &queue, &health).run(cancel.clone()));
        for _ in 0..100 {
            if !github.merged_prs().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(github.merged_prs(), vec![PrNumber(1)]);
        assert!(queue.queued().is_empty());
    }
}
