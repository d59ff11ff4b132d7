//! Turns passing batch results into merges.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use super::{Batch, BatchError, BatchJob, complete_batches};
use crate::admission::{AdmissionContext, AdmissionPipeline, SubmitReason, Verdict};
use crate::config::QueueConfig;
use crate::effects::{GitHub, fetch};
use crate::health::SharedHealth;
use crate::pr_view::{PrView, ViewConfig};
use crate::queue::SubmitQueue;

/// How many base branch commits are read when checking a batch.
const BRANCH_HISTORY: u32 = 100;

/// Outcome of the latest batch tick, for the status endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchStatus {
    /// Last error per batch descriptor.
    pub errors: BTreeMap<String, String>,
    pub merges: u64,
}

/// [`BatchStatus`] shared with the status endpoint.
#[derive(Debug, Clone, Default)]
pub struct SharedBatchStatus(Arc<Mutex<BatchStatus>>);

impl SharedBatchStatus {
    pub fn snapshot(&self) -> BatchStatus {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_errors(&self, errors: BTreeMap<String, String>) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).errors = errors;
    }

    fn record_merge(&self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).merges += 1;
    }
}

pub struct BatchReconciler<G: GitHub> {
    github: Arc<G>,
    queue: Arc<SubmitQueue>,
    health: SharedHealth,
    config: Arc<QueueConfig>,
    view_config: ViewConfig,
    pipeline: Arc<AdmissionPipeline<G>>,
    status: SharedBatchStatus,
}

impl<G: GitHub> BatchReconciler<G> {
    pub fn new(
        github: Arc<G>,
        queue: Arc<SubmitQueue>,
        health: SharedHealth,
        config: Arc<QueueConfig>,
        view_config: ViewConfig,
        pipeline: Arc<AdmissionPipeline<G>>,
    ) -> Self {
        Self {
            github,
            queue,
            health,
            config,
            view_config,
            pipeline,
            status: SharedBatchStatus::default(),
        }
    }

    pub fn status(&self) -> BatchStatus {
        self.status.snapshot()
    }

    pub fn shared_status(&self) -> SharedBatchStatus {
        self.status.clone()
    }

    /// Handles one round of job results.
    pub async fn tick(&self, jobs: &[BatchJob]) {
        let batches = complete_batches(
            jobs,
            &self.config.required_contexts,
            &self.config.retest_contexts,
        );
        let mut errors = BTreeMap::new();
        for batch in batches {
            if !self.intersects_queue(&batch) {
                continue;
            }
            if let Err(e) = self.applicable(&batch).await {
                errors.insert(batch.to_string(), e.to_string());
                continue;
            }
            self.merge_batch(&batch).await;
        }
        self.status.set_errors(errors);
    }

    fn intersects_queue(&self, batch: &Batch) -> bool {
        batch.pulls.iter().any(|p| self.queue.is_queued(p.number))
    }

    /// Number of batch PRs already merged, if the branch history allows
    /// trusting the batch.
    async fn applicable(&self, batch: &Batch) -> Result<usize, BatchError> {
        let commits =
            fetch::list_branch_commits(&*self.github, &batch.base_name, BRANCH_HISTORY).await?;
        batch.matches_commits(&commits)
    }

    /// Merges the unmerged suffix of the batch under the merge lock.
    #[instrument(skip(self), fields(batch = %batch))]
    async fn merge_batch(&self, batch: &Batch) {
        let _guard = self.queue.merge_lock().await;

        let merged = match self.applicable(batch).await {
            Ok(merged) => merged,
            Err(e) => {
                error!(error = %e, "batch stopped applying inside the merge lock");
                return;
            }
        };
        let ci_stable = self.health.is_stable();
        if !ci_stable {
            warn!("CI unstable, not merging batch");
            return;
        }

        let ctx = AdmissionContext::for_batch(&self.config, ci_stable);
        let mut views = Vec::new();
        for pull in &batch.pulls[merged..] {
            let mut view =
                match PrView::load(self.github.clone(), self.view_config, pull.number).await {
                    Ok(view) => view,
                    Err(e) => {
                        error!(pr = %pull.number, error = %e, "failed to load batch PR");
                        return;
                    }
                };
            match view.head_sha().await {
                Ok(head) if head == pull.sha => {}
                Ok(head) => {
                    let e = BatchError::HeadChanged {
                        pr: pull.number,
                        expected: pull.sha.clone(),
                        actual: head,
                    };
                    error!(error = %e, "batch PR moved");
                    return;
                }
                Err(e) => {
                    error!(pr = %pull.number, error = %e, "failed to read batch PR head");
                    return;
                }
            }
            match self.pipeline.evaluate(&ctx, &mut view).await {
                Ok(Verdict::Continue) => views.push(view),
                Ok(verdict) => {
                    if let Some(reason) = verdict.reason() {
                        self.queue.set_status(view.issue(), reason.clone());
                    }
                    return;
                }
                Err(e) => {
                    warn!(pr = %pull.number, error = %e, "failed to validate batch PR");
                    return;
                }
            }
        }

        for mut view in views {
            let number = view.number();
            match view.merge_pr(&self.config.actor).await {
                Ok(sha) => {
                    info!(pr = %number, sha = %sha.short(), "merged as part of batch");
                    self.queue.set_status(view.issue(), SubmitReason::MergedBatch);
                    self.health.record_merge(Utc::now());
                    self.status.record_merge();
                }
                Err(e) => {
                    error!(pr = %number, error = %e, "batch merge failed");
                    self.queue.set_status(
                        view.issue(),
                        SubmitReason::MergeFailed(format!("Merge failed: {}", e)),
                    );
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Priority;
    use crate::test_utils::{
        FakeGitHub, commit_at, commit_with_parents, labeled_event, open_pr, status_of,
    };
    use crate::types::{PrNumber, StatusState};

    fn config() -> QueueConfig {
        QueueConfig {
            required_contexts: vec!["unit".to_string()],
            ..QueueConfig::default()
        }
    }

    fn job(refs: &str) -> BatchJob {
        BatchJob {
            kind: "batch".to_string(),
            repo: "o/r".to_string(),
            refs: refs.to_string(),
            state: "success".to_string(),
            context: "unit".to_string(),
        }
    }

    fn reconciler(github: &Arc<FakeGitHub>, queue: &Arc<SubmitQueue>) -> BatchReconciler<FakeGitHub> {
        BatchReconciler::new(
            github.clone(),
            queue.clone(),
            SharedHealth::new(Utc::now()),
            Arc::new(config()),
            ViewConfig::immediate(),
            Arc::new(AdmissionPipeline::standard()),
        )
    }

    /// Two admitted PRs at heads "a" and "b", both queued, on a branch
    /// whose tip is "base".
    fn setup() -> (Arc<FakeGitHub>, Arc<SubmitQueue>) {
        let github = Arc::new(FakeGitHub::new());
        let queue = Arc::new(SubmitQueue::new());
        for (n, head) in [(1, "a"), (2, "b")] {
            let pr = open_pr(n, head).with_labels(&["cla: yes", "lgtm"]);
            queue.enqueue(&pr.issue, Priority::DEFAULT);
            github.add_pr(pr);
            github.set_commits(PrNumber(n), vec![commit_at(head, 100)]);
            github.set_events(PrNumber(n), vec![labeled_event("lgtm", 200)]);
            // Red on its own; the batch result stands in for it.
            github.push_status(head, status_of(head, &[("unit", StatusState::Failure)]));
        }
        github.set_branch_commits("master", vec![commit_with_parents("base", &["older"])]);
        (github, queue)
    }

    #[tokio::test]
    async fn passing_batch_merges_in_order() {
        let (github, queue) = setup();
        let reconciler = reconciler(&github, &queue);

        reconciler.tick(&[job("master:base,1:a,2:b")]).await;

        assert_eq!(github.merged_prs(), vec![PrNumber(1), PrNumber(2)]);
        assert_eq!(reconciler.status().merges, 2);
        assert!(reconciler.status().errors.is_empty());
        assert_eq!(queue.status_of(PrNumber(1)), Some(SubmitReason::MergedBatch));
        assert!(!queue.is_queued(PrNumber(2)));
    }

    #[tokio::test]
    async fn partially_merged_batch_merges_the_rest() {
        let (github, queue) = setup();
        github.set_branch_commits(
            "master",
            vec![
                commit_with_parents("m1", &["base", "a"]),
                commit_with_parents("base", &["older"]),
            ],
        );
        let reconciler = reconciler(&github, &queue);

        reconciler.tick(&[job("master:base,1:a,2:b")]).await;
        assert_eq!(github.merged_prs(), vec![PrNumber(2)]);
    }

    #[tokio::test]
    async fn moved_head_aborts_the_batch() {
        let (github, queue) = setup();
        github.set_head(PrNumber(2), "b2");
        let reconciler = reconciler(&github, &queue);

        reconciler.tick(&[job("master:base,1:a,2:b")]).await;
        assert!(github.merged_prs().is_empty());
    }

    #[tokio::test]
    async fn history_mismatch_is_recorded() {
        let (github, queue) = setup();
        github.set_branch_commits(
            "master",
            vec![
                commit_with_parents("direct", &["base"]),
                commit_with_parents("base", &["older"]),
            ],
        );
        let reconciler = reconciler(&github, &queue);

        reconciler.tick(&[job("master:base,1:a,2:b")]).await;
        assert!(github.merged_prs().is_empty());
        let errors = reconciler.status().errors;
        assert!(errors["master:base,1:a,2:b"].contains("non-merge"));
    }

    #[tokio::test]
    async fn batch_outside_queue_is_ignored() {
        let (github, queue) = setup();
        let reconciler = reconciler(&github, &queue);

        reconciler.tick(&[job("master:base,7:x")]).await;
        assert!(github.merged_prs().is_empty());
        assert!(reconciler.status().errors.is_empty());
        assert_eq!(github.calls("ListBranchCommits"), 0);
    }

    #[tokio::test]
    async fn rejected_pr_stops_the_batch() {
        let (github, queue) = setup();
        github.set_labels(PrNumber(2), &["cla: yes"]);
        let reconciler = reconciler(&github, &queue);

        reconciler.tick(&[job("master:base,1:a,2:b")]).await;
        assert!(github.merged_prs().is_empty());
        assert_eq!(queue.status_of(PrNumber(2)), Some(SubmitReason::NoLgtm));
    }
}
