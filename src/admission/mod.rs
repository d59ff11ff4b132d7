//! Admission control: the ordered checks a PR clears before it may be
//! queued for its final re-test.
//!
//! Each check is a [`Policy`]. The [`AdmissionPipeline`] runs its policies
//! in order and stops at the first one that does not say
//! [`Verdict::Continue`]. A PR that every policy lets through is admitted.
//!
//! Policies only read through the [`PrView`]; they never mutate the queue.
//! A [`Verdict::Halt`] is the caller's cue to flush the whole queue.

mod policies;
mod reason;

use async_trait::async_trait;
use tracing::debug;

use crate::config::QueueConfig;
use crate::effects::GitHub;
use crate::github::GitHubApiError;
use crate::pr_view::PrView;

pub use policies::{
    CiPolicy, ClaPolicy, DoNotMergePolicy, LgtmFreshnessPolicy, LgtmPolicy, MergeablePolicy,
    StabilityPolicy,
};
pub use reason::SubmitReason;

/// What one policy decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    /// This PR may not merge now.
    Reject(SubmitReason),
    /// Nothing may merge now; the queue should be flushed with this reason.
    Halt(SubmitReason),
}

impl Verdict {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Verdict::Continue)
    }

    pub fn reason(&self) -> Option<&SubmitReason> {
        match self {
            Verdict::Continue => None,
            Verdict::Reject(reason) | Verdict::Halt(reason) => Some(reason),
        }
    }
}

/// Inputs shared by every policy during one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionContext<'a> {
    pub config: &'a QueueConfig,
    /// Current aggregate CI health.
    pub ci_stable: bool,
    /// False when a batch result stands in for the PR's own CI.
    pub check_ci: bool,
}

impl<'a> AdmissionContext<'a> {
    pub fn new(config: &'a QueueConfig, ci_stable: bool) -> Self {
        Self {
            config,
            ci_stable,
            check_ci: true,
        }
    }

    pub fn for_batch(config: &'a QueueConfig, ci_stable: bool) -> Self {
        Self {
            check_ci: false,
            ..Self::new(config, ci_stable)
        }
    }
}

/// One named admission check.
#[async_trait]
pub trait Policy<G: GitHub>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn evaluate(
        &self,
        ctx: &AdmissionContext<'_>,
        view: &mut PrView<G>,
    ) -> Result<Verdict, GitHubApiError>;
}

/// An ordered, short-circuiting list of policies.
pub struct AdmissionPipeline<G: GitHub> {
    policies: Vec<Box<dyn Policy<G>>>,
}

impl<G: GitHub> AdmissionPipeline<G> {
    pub fn new(policies: Vec<Box<dyn Policy<G>>>) -> Self {
        Self { policies }
    }

    /// The built-in checks, in their fixed order.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(ClaPolicy),
            Box::new(MergeablePolicy),
            Box::new(CiPolicy),
            Box::new(DoNotMergePolicy),
            Box::new(LgtmPolicy),
            Box::new(LgtmFreshnessPolicy),
            Box::new(StabilityPolicy),
        ])
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.policies.iter().map(|p| p.name()).collect()
    }

    /// Runs the policies in order and returns the first non-continue verdict.
    ///
    /// Remote errors are returned as-is: the caller skips the PR for this
    /// pass instead of recording a status.
    pub async fn evaluate(
        &self,
        ctx: &AdmissionContext<'_>,
        view: &mut PrView<G>,
    ) -> Result<Verdict, GitHubApiError> {
        for policy in &self.policies {
            let verdict = policy.evaluate(ctx, view).await?;
            if !verdict.is_admitted() {
                debug!(
                    pr = %view.number(),
                    policy = policy.name(),
                    verdict = ?verdict,
                    "admission stopped"
                );
                return Ok(verdict);
            }
        }
        Ok(Verdict::Continue)
    }
}

impl<G: GitHub> Default for AdmissionPipeline<G> {
    fn default() -> Self {
        Self::standard()
    }
}
