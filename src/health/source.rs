//! Reads CI job health from the combined status of the base branch.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{BuildInfo, BuildState};
use crate::effects::{Freshness, GitHub, fetch};
use crate::types::StatusState;

/// Treats each configured job as a status context on the base branch tip.
pub struct BranchStatusSource<G> {
    github: Arc<G>,
    branch: String,
    gating: Vec<String>,
    nongating: Vec<String>,
}

impl<G: GitHub> BranchStatusSource<G> {
    pub fn new(
        github: Arc<G>,
        branch: impl Into<String>,
        gating: Vec<String>,
        nongating: Vec<String>,
    ) -> Self {
        Self {
            github,
            branch: branch.into(),
            gating,
            nongating,
        }
    }

    fn jobs(&self) -> impl Iterator<Item = (&String, bool)> {
        self.gating
            .iter()
            .map(|j| (j, true))
            .chain(self.nongating.iter().map(|j| (j, false)))
    }

    /// Current state of every configured job.
    ///
    /// A job still pending keeps its `previous` state, so a rerun in
    /// progress does not flap the queue.
    pub async fn poll(&self, previous: &BTreeMap<String, BuildInfo>) -> BTreeMap<String, BuildInfo> {
        let status =
            match fetch::combined_status(&*self.github, &self.branch, Freshness::Fresh).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(branch = %self.branch, error = %e, "failed to read branch status");
                    let detail = format!("Error checking: {}", e);
                    return self
                        .jobs()
                        .map(|(job, gating)| {
                            let info = BuildInfo {
                                state: BuildState::Unknown,
                                gating,
                                url: None,
                                detail: Some(detail.clone()),
                            };
                            (job.clone(), info)
                        })
                        .collect();
                }
            };

        let mut builds = BTreeMap::new();
        for (job, gating) in self.jobs() {
            let context = status.statuses.iter().find(|s| &s.context == job);
            let state = match context.map(|s| s.state) {
                Some(StatusState::Success) => BuildState::Stable,
                Some(StatusState::Failure | StatusState::Error) => BuildState::NotStable,
                Some(StatusState::Pending) => previous
                    .get(job)
                    .map(|info| info.state)
                    .unwrap_or(BuildState::Unknown),
                None => BuildState::Unknown,
            };
            debug!(job = %job, gating, state = ?state, "ci job state");
            builds.insert(
                job.clone(),
                BuildInfo {
                    state,
                    gating,
                    url: context.and_then(|s| s.target_url.clone()),
                    detail: None,
                },
            );
        }
        builds
    }
}
