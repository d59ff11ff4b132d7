//! The built-in admission policies.

use async_trait::async_trait;

use super::{AdmissionContext, Policy, SubmitReason, Verdict};
use crate::effects::GitHub;
use crate::github::GitHubApiError;
use crate::pr_view::{Mergeability, PrView};

/// The contributor license agreement label must be present.
pub struct ClaPolicy;

#[async_trait]
impl<G: GitHub> Policy<G> for ClaPolicy {
    fn name(&self) -> &'static str {
        "cla"
    }

    async fn evaluate(
        &self,
        ctx: &AdmissionContext<'_>,
        view: &mut PrView<G>,
    ) -> Result<Verdict, GitHubApiError> {
        Ok(if view.has_label(&ctx.config.labels.cla) {
            Verdict::Continue
        } else {
            Verdict::Reject(SubmitReason::NoCla)
        })
    }
}

/// GitHub must be able to merge the PR without conflicts.
pub struct MergeablePolicy;

#[async_trait]
impl<G: GitHub> Policy<G> for MergeablePolicy {
    fn name(&self) -> &'static str {
        "mergeable"
    }

    async fn evaluate(
        &self,
        _ctx: &AdmissionContext<'_>,
        view: &mut PrView<G>,
    ) -> Result<Verdict, GitHubApiError> {
        Ok(match view.is_mergeable().await? {
            Mergeability::Mergeable => Verdict::Continue,
            Mergeability::Conflicting => Verdict::Reject(SubmitReason::Unmergeable),
            Mergeability::Undetermined => Verdict::Reject(SubmitReason::UndeterminedMergeability),
        })
    }
}

/// Required contexts, plus the re-test contexts unless the PR is labeled
/// as not needing a re-test, must all be green.
pub struct CiPolicy;

impl CiPolicy {
    pub fn contexts<G: GitHub>(ctx: &AdmissionContext<'_>, view: &PrView<G>) -> Vec<String> {
        let mut contexts = ctx.config.required_contexts.clone();
        if !view.has_label(&ctx.config.labels.retest_not_required) {
            contexts.extend(ctx.config.retest_contexts.iter().cloned());
        }
        contexts
    }
}

#[async_trait]
impl<G: GitHub> Policy<G> for CiPolicy {
    fn name(&self) -> &'static str {
        "ci"
    }

    async fn evaluate(
        &self,
        ctx: &AdmissionContext<'_>,
        view: &mut PrView<G>,
    ) -> Result<Verdict, GitHubApiError> {
        if !ctx.check_ci {
            return Ok(Verdict::Continue);
        }
        let contexts = Self::contexts(ctx, view);
        Ok(if view.is_status_success(&contexts).await? {
            Verdict::Continue
        } else {
            Verdict::Reject(SubmitReason::CiFailure)
        })
    }
}

/// Neither the do-not-merge label nor a do-not-merge milestone may be set.
pub struct DoNotMergePolicy;

#[async_trait]
impl<G: GitHub> Policy<G> for DoNotMergePolicy {
    fn name(&self) -> &'static str {
        "do-not-merge"
    }

    async fn evaluate(
        &self,
        ctx: &AdmissionContext<'_>,
        view: &mut PrView<G>,
    ) -> Result<Verdict, GitHubApiError> {
        let labeled = view.has_label(&ctx.config.labels.do_not_merge);
        let milestoned = view
            .issue()
            .milestone
            .as_ref()
            .is_some_and(|m| ctx.config.do_not_merge_milestones.contains(m));
        Ok(if labeled || milestoned {
            Verdict::Reject(SubmitReason::DoNotMerge)
        } else {
            Verdict::Continue
        })
    }
}

pub struct LgtmPolicy;

#[async_trait]
impl<G: GitHub> Policy<G> for LgtmPolicy {
    fn name(&self) -> &'static str {
        "lgtm"
    }

    async fn evaluate(
        &self,
        ctx: &AdmissionContext<'_>,
        view: &mut PrView<G>,
    ) -> Result<Verdict, GitHubApiError> {
        Ok(if view.has_label(&ctx.config.labels.lgtm) {
            Verdict::Continue
        } else {
            Verdict::Reject(SubmitReason::NoLgtm)
        })
    }
}

/// The LGTM label must have been applied after the last commit.
pub struct LgtmFreshnessPolicy;

#[async_trait]
impl<G: GitHub> Policy<G> for LgtmFreshnessPolicy {
    fn name(&self) -> &'static str {
        "lgtm-freshness"
    }

    async fn evaluate(
        &self,
        ctx: &AdmissionContext<'_>,
        view: &mut PrView<G>,
    ) -> Result<Verdict, GitHubApiError> {
        let last_modified = view.last_modified_time().await?;
        let lgtm_time = view.label_time(&ctx.config.labels.lgtm).await?;
        Ok(match (last_modified, lgtm_time) {
            (Some(modified), Some(lgtm)) if modified > lgtm => {
                Verdict::Reject(SubmitReason::LgtmEarly)
            }
            (Some(_), Some(_)) => Verdict::Continue,
            _ => Verdict::Reject(SubmitReason::Unknown),
        })
    }
}

/// Refuses everything while aggregate CI health is bad.
pub struct StabilityPolicy;

#[async_trait]
impl<G: GitHub> Policy<G> for StabilityPolicy {
    fn name(&self) -> &'static str {
        "stability"
    }

    async fn evaluate(
        &self,
        ctx: &AdmissionContext<'_>,
        _view: &mut PrView<G>,
    ) -> Result<Verdict, GitHubApiError> {
        Ok(if ctx.ci_stable {
            Verdict::Continue
        } else {
            Verdict::Halt(SubmitReason::E2eFailure)
        })
    }
}
