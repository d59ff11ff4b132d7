//! Reducing a combined status to one CI verdict over required contexts.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::types::{CombinedStatus, StatusState};

/// Overall CI verdict for a PR head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CiState {
    Pending,
    Error,
    Failure,
    Success,
    /// A required context has not reported at all.
    Incomplete,
}

impl CiState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CiState::Pending => "pending",
            CiState::Error => "error",
            CiState::Failure => "failure",
            CiState::Success => "success",
            CiState::Incomplete => "incomplete",
        }
    }
}

impl From<StatusState> for CiState {
    fn from(state: StatusState) -> Self {
        match state {
            StatusState::Pending => CiState::Pending,
            StatusState::Error => CiState::Error,
            StatusState::Failure => CiState::Failure,
            StatusState::Success => CiState::Success,
        }
    }
}

impl fmt::Display for CiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Computes the CI verdict over `required` contexts.
///
/// With no required contexts, GitHub's own combined state is used. Otherwise
/// any missing context makes the result `Incomplete`; among reported ones,
/// pending beats error, error beats failure, and failure beats success.
/// Contexts outside `required` are ignored.
pub fn compute_status(status: &CombinedStatus, required: &[String]) -> CiState {
    if required.is_empty() {
        return status.state.into();
    }

    let required: HashSet<&str> = required.iter().map(String::as_str).collect();
    let mut states = HashSet::new();
    let mut providers = HashSet::new();
    for context in &status.statuses {
        if required.contains(context.context.as_str()) {
            states.insert(context.state);
            providers.insert(context.context.as_str());
        }
    }

    if providers.len() != required.len() {
        tracing::trace!(
            sha = %status.sha,
            missing = ?required.difference(&providers).collect::<Vec<_>>(),
            "required contexts missing from combined status"
        );
        return CiState::Incomplete;
    }

    if states.contains(&StatusState::Pending) {
        CiState::Pending
    } else if states.contains(&StatusState::Error) {
        CiState::Error
    } else if states.contains(&StatusState::Failure) {
        CiState::Failure
    } else {
        CiState::Success
    }
}
