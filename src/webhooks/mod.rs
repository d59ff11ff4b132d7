//! Webhook verification, parsing and dispatch into the change trackers.
//!
//! Webhooks never touch the queue: [`apply_event`] only records what changed,
//! and the engine's changed-PR pass picks it up.

mod events;
mod parser;
mod signature;

use thiserror::Error;
use tracing::debug;

use crate::tracker::ChangeTrackers;

pub use events::{PushEvent, StatusEvent, WebhookEvent};
pub use parser::{ParseError, parse_webhook};
pub use signature::{parse_signature_header, verify_signature};

#[cfg(test)]
pub(crate) use signature::sign;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing X-Hub-Signature-256 header")]
    MissingSignature,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("missing X-GitHub-Event header")]
    MissingEventType,

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Feeds one event into the trackers.
pub fn apply_event(trackers: &ChangeTrackers, event: &WebhookEvent) {
    match event {
        WebhookEvent::Status(status) => {
            debug!(sha = %status.sha, context = %status.context, state = ?status.state, "status changed");
            trackers.status_changed(&status.sha);
        }
        WebhookEvent::Push(push) => {
            let label = push.label();
            match &push.after {
                Some(after) => {
                    debug!(branch = %label, sha = %after, "branch pushed");
                    trackers.pushed(&label, push.before.as_ref(), after.clone());
                }
                None => {
                    debug!(branch = %label, "branch deleted");
                    trackers.refs.forget_ref(&label);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PrNumber, RepoId, Sha, StatusState};

    fn push(branch: &str, before: Option<&str>, after: Option<&str>) -> WebhookEvent {
        WebhookEvent::Push(PushEvent {
            repo: RepoId::new("o", "r"),
            branch: branch.to_string(),
            before: before.map(Sha::from),
            after: after.map(Sha::from),
        })
    }

    fn status(sha: &str) -> WebhookEvent {
        WebhookEvent::Status(StatusEvent {
            repo: RepoId::new("o", "r"),
            sha: Sha::from(sha),
            state: StatusState::Success,
            context: "ci".to_string(),
        })
    }

    #[test]
    fn status_after_push_reports_new_head_only() {
        let trackers = ChangeTrackers::new();
        trackers.observe(PrNumber(5), "o:topic", Sha::from("old"));

        apply_event(&trackers, &push("topic", Some("old"), Some("new")));
        apply_event(&trackers, &status("new"));
        assert_eq!(trackers.pop_changed(), vec![PrNumber(5)]);
    }

    #[test]
    fn deleted_branch_stops_reporting() {
        let trackers = ChangeTrackers::new();
        trackers.observe(PrNumber(5), "o:topic", Sha::from("a"));
        trackers.commits.forget(PrNumber(5));

        apply_event(&trackers, &push("topic", Some("a"), None));
        apply_event(&trackers, &status("a"));
        assert!(trackers.pop_changed().is_empty());
    }

    #[test]
    fn push_to_same_named_branch_leaves_fork_pr_alone() {
        let trackers = ChangeTrackers::new();
        trackers.observe(PrNumber(5), "alice:master", Sha::from("a"));

        apply_event(&trackers, &push("master", Some("a"), Some("b")));
        apply_event(&trackers, &status("b"));
        assert!(trackers.pop_changed().is_empty());
        assert_eq!(trackers.refs.head_of("alice:master"), Some(Sha::from("a")));
        assert_eq!(trackers.refs.head_of("o:master"), Some(Sha::from("b")));
    }
}
