//! The process-wide engine: poll loop, changed-PR fast path, CI tick, batch
//! tick and the merge worker.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use thiserror::Error;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::PollConfig;
use crate::admission::{AdmissionContext, AdmissionPipeline, SubmitReason, Verdict};
use crate::batch::{BatchError, BatchReconciler, HttpJobSource, SharedBatchStatus};
use crate::config::QueueConfig;
use crate::effects::{GitHub, fetch};
use crate::github::GitHubApiError;
use crate::health::{BranchStatusSource, SharedHealth};
use crate::pr_view::{PrView, ViewConfig};
use crate::queue::{MergeWorker, Priority, SubmitQueue};
use crate::tracker::ChangeTrackers;
use crate::types::{PrNumber, RepoId};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to list open PRs: {0}")]
    ListOpenPrs(#[from] GitHubApiError),

    #[error("batch tick failed: {0}")]
    Batch(#[from] BatchError),
}

struct BatchLoop<G: GitHub> {
    source: HttpJobSource,
    reconciler: BatchReconciler<G>,
}

pub struct Engine<G: GitHub> {
    github: Arc<G>,
    repo: RepoId,
    config: Arc<QueueConfig>,
    poll: PollConfig,
    view_config: ViewConfig,
    queue: Arc<SubmitQueue>,
    health: SharedHealth,
    trackers: ChangeTrackers,
    pipeline: Arc<AdmissionPipeline<G>>,
    ci_source: BranchStatusSource<G>,
    batch: Option<Arc<BatchLoop<G>>>,
    /// Open PRs seen by the last passes, with their `owner:branch` head label.
    known: Mutex<HashMap<PrNumber, String>>,
}

impl<G: GitHub> Engine<G> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        github: Arc<G>,
        repo: RepoId,
        config: Arc<QueueConfig>,
        poll: PollConfig,
        view_config: ViewConfig,
        queue: Arc<SubmitQueue>,
        health: SharedHealth,
        trackers: ChangeTrackers,
    ) -> Self {
        let ci_source = BranchStatusSource::new(
            github.clone(),
            config.base_branch.clone(),
            config.gating_jobs.clone(),
            config.nongating_jobs.clone(),
        );
        Self {
            github,
            repo,
            config,
            poll,
            view_config,
            queue,
            health,
            trackers,
            pipeline: Arc::new(AdmissionPipeline::standard()),
            ci_source,
            batch: None,
            known: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the standard admission checks.
    pub fn with_pipeline(mut self, pipeline: AdmissionPipeline<G>) -> Self {
        self.pipeline = Arc::new(pipeline);
        self
    }

    /// Enables batch merging from the given job source.
    pub fn with_batch_source(mut self, source: HttpJobSource) -> Self {
        let reconciler = BatchReconciler::new(
            self.github.clone(),
            self.queue.clone(),
            self.health.clone(),
            self.config.clone(),
            self.view_config,
            self.pipeline.clone(),
        );
        self.batch = Some(Arc::new(BatchLoop { source, reconciler }));
        self
    }

    pub fn batch_status(&self) -> Option<SharedBatchStatus> {
        self.batch.as_ref().map(|b| b.reconciler.shared_status())
    }

    /// Runs every loop until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(repo = %self.repo, "engine started");

        let worker = MergeWorker::new(
            self.github.clone(),
            self.queue.clone(),
            self.health.clone(),
            self.config.clone(),
            self.view_config,
        );
        let worker = tokio::spawn(worker.run(cancel.clone()));
        let batch = self.batch.clone().map(|batch| {
            let engine = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { engine.run_batch_loop(&batch, cancel).await })
        });

        self.run_poll_loop(&cancel).await;

        if let Err(e) = worker.await {
            error!(error = %e, "merge worker task failed");
        }
        if let Some(batch) = batch
            && let Err(e) = batch.await
        {
            error!(error = %e, "batch task failed");
        }
        info!("engine stopped");
    }

    async fn run_poll_loop(&self, cancel: &CancellationToken) {
        let mut full = interval(self.poll.poll_interval_with_jitter(&self.repo));
        let mut changed = interval(self.poll.changed_interval);
        let mut ci = interval(self.poll.ci_interval);
        for timer in [&mut full, &mut changed, &mut ci] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ci.tick() => self.ci_tick().await,
                _ = full.tick() => {
                    if let Err(e) = self.full_pass().await {
                        error!(error = %e, "full pass failed");
                    }
                }
                _ = changed.tick() => {
                    let evaluated = self.changed_pass().await;
                    if evaluated > 0 {
                        debug!(prs = evaluated, "changed pass done");
                    }
                }
            }
        }
    }

    async fn run_batch_loop(&self, batch: &BatchLoop<G>, cancel: CancellationToken) {
        let mut tick = interval(self.poll.batch_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    if let Err(e) = self.batch_tick(batch).await {
                        warn!(error = %e, "batch tick failed");
                    }
                }
            }
        }
    }

    /// Re-evaluates every open PR and records one health sample.
    #[instrument(skip(self), fields(repo = %self.repo))]
    pub async fn full_pass(&self) -> Result<usize, EngineError> {
        let open = fetch::list_open_prs(&*self.github).await?;
        self.queue.begin_pass();
        self.health.record_pass(Utc::now());

        for number in &open {
            self.evaluate_pr(*number).await;
        }

        let open: BTreeSet<PrNumber> = open.into_iter().collect();
        let gone: Vec<(PrNumber, String)> = {
            let mut known = self.known.lock().unwrap_or_else(PoisonError::into_inner);
            let gone = known
                .iter()
                .filter(|(number, _)| !open.contains(number))
                .map(|(number, label)| (*number, label.clone()))
                .collect::<Vec<_>>();
            for (number, _) in &gone {
                known.remove(number);
            }
            gone
        };
        for (number, label) in gone {
            self.trackers.forget(number, Some(&label));
        }

        debug!(prs = open.len(), "full pass done");
        Ok(open.len())
    }

    /// Re-evaluates only the PRs the trackers report changed.
    pub async fn changed_pass(&self) -> usize {
        let changed = self.trackers.pop_changed();
        if !changed.is_empty() {
            debug!(prs = ?changed, "re-evaluating changed PRs");
        }
        for number in &changed {
            self.evaluate_pr(*number).await;
        }
        changed.len()
    }

    /// Refreshes base branch CI health. Instability flushes the queue.
    pub async fn ci_tick(&self) {
        let was_stable = self.health.is_stable();
        let builds = self.ci_source.poll(&self.health.builds()).await;
        let stable = self.health.update_builds(builds);
        if was_stable && !stable {
            warn!("CI became unstable, blocking the queue");
        } else if !was_stable && stable {
            info!("CI stable again");
        }
        if !stable {
            self.queue.flush(SubmitReason::E2eFailure);
        }
    }

    async fn batch_tick(&self, batch: &BatchLoop<G>) -> Result<(), EngineError> {
        let jobs = batch
            .source
            .successful_batch_jobs(&self.repo.to_string())
            .await?;
        batch.reconciler.tick(&jobs).await;
        Ok(())
    }

    /// Runs admission for one PR and applies the verdict to the queue.
    ///
    /// Remote errors skip the PR until the next pass.
    #[instrument(skip(self), fields(pr = %number))]
    pub async fn evaluate_pr(&self, number: PrNumber) {
        let mut view = match PrView::load(self.github.clone(), self.view_config, number).await {
            Ok(view) => view,
            Err(e) => {
                warn!(error = %e, "failed to load PR, skipping");
                return;
            }
        };
        if !view.issue().is_pull_request || !view.issue().state.is_open() {
            self.forget(number);
            return;
        }

        match view.pr().await {
            Ok(pr) => {
                let (label, head) = (pr.head_label.clone(), pr.head_sha.clone());
                self.trackers.observe(number, &label, head);
                self.known
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(number, label);
            }
            Err(e) => {
                warn!(error = %e, "failed to load pull request, skipping");
                return;
            }
        }

        let ctx = AdmissionContext::new(&self.config, self.health.is_stable());
        match self.pipeline.evaluate(&ctx, &mut view).await {
            Ok(Verdict::Continue) => {
                let priority = Priority::from_labels(&view.issue().labels, &self.config.labels);
                self.queue.enqueue(view.issue(), priority);
            }
            Ok(Verdict::Reject(reason)) => self.queue.set_status(view.issue(), reason),
            Ok(Verdict::Halt(reason)) => {
                self.queue.flush(reason.clone());
                self.queue.set_status(view.issue(), reason);
            }
            Err(e) => warn!(error = %e, "admission check failed, skipping"),
        }
    }

    fn forget(&self, number: PrNumber) {
        let label = self
            .known
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&number);
        self.trackers.forget(number, label.as_deref());
    }
}
