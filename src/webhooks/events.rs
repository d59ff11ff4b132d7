//! The webhook events the engine consumes.
//!
//! - `status`: CI state of a commit changed
//! - `push`: a branch ref moved

use serde::Serialize;

use crate::types::{RepoId, Sha, StatusState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum WebhookEvent {
    Status(StatusEvent),
    Push(PushEvent),
}

impl WebhookEvent {
    pub fn repo(&self) -> &RepoId {
        match self {
            WebhookEvent::Status(e) => &e.repo,
            WebhookEvent::Push(e) => &e.repo,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEvent {
    pub repo: RepoId,
    pub sha: Sha,
    pub state: StatusState,
    pub context: String,
}

/// A branch push. Tag pushes are not represented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushEvent {
    pub repo: RepoId,
    /// Branch name without `refs/heads/`.
    pub branch: String,
    /// `None` when the branch was created.
    pub before: Option<Sha>,
    /// `None` when the branch was deleted.
    pub after: Option<Sha>,
}

impl PushEvent {
    /// `owner:branch`, the form GitHub uses to label PR heads.
    pub fn label(&self) -> String {
        format!("{}:{}", self.repo.owner, self.branch)
    }
}
