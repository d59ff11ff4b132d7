//! Parses raw webhook payloads into [`WebhookEvent`]s.
//!
//! The event type comes from the `X-GitHub-Event` header. Event types the
//! engine does not consume parse to `Ok(None)`, as do tag pushes.

use serde::Deserialize;
use thiserror::Error;

use super::events::{PushEvent, StatusEvent, WebhookEvent};
use crate::types::{RepoId, Sha, StatusState};

/// What GitHub sends as `before` for a new branch and `after` for a
/// deleted one.
const NULL_SHA: &str = "0000000000000000000000000000000000000000";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid field value for {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },
}

pub fn parse_webhook(event_type: &str, payload: &[u8]) -> Result<Option<WebhookEvent>, ParseError> {
    match event_type {
        "status" => parse_status(payload).map(|e| Some(WebhookEvent::Status(e))),
        "push" => parse_push(payload).map(|e| e.map(WebhookEvent::Push)),
        _ => Ok(None),
    }
}

#[derive(Debug, Deserialize)]
struct RawRepository {
    owner: RawOwner,
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawOwner {
    login: String,
}

impl From<RawRepository> for RepoId {
    fn from(raw: RawRepository) -> Self {
        RepoId::new(raw.owner.login, raw.name)
    }
}

fn non_empty_sha(field: &'static str, value: String) -> Result<Sha, ParseError> {
    if value.is_empty() {
        return Err(ParseError::InvalidField { field, value });
    }
    Ok(Sha::from(value))
}

#[derive(Debug, Deserialize)]
struct RawStatusPayload {
    sha: String,
    state: StatusState,
    context: String,
    repository: RawRepository,
}

fn parse_status(payload: &[u8]) -> Result<StatusEvent, ParseError> {
    let raw: RawStatusPayload = serde_json::from_slice(payload)?;
    Ok(StatusEvent {
        repo: raw.repository.into(),
        sha: non_empty_sha("sha", raw.sha)?,
        state: raw.state,
        context: raw.context,
    })
}

#[derive(Debug, Deserialize)]
struct RawPushPayload {
    #[serde(rename = "ref")]
    reference: String,
    before: String,
    after: String,
    repository: RawRepository,
}

fn parse_push(payload: &[u8]) -> Result<Option<PushEvent>, ParseError> {
    let raw: RawPushPayload = serde_json::from_slice(payload)?;
    let Some(branch) = raw.reference.strip_prefix("refs/heads/") else {
        return Ok(None);
    };
    if branch.is_empty() {
        return Err(ParseError::InvalidField {
            field: "ref",
            value: raw.reference,
        });
    }
    let optional = |field, value: String| {
        if value == NULL_SHA {
            Ok(None)
        } else {
            non_empty_sha(field, value).map(Some)
        }
    };
    Ok(Some(PushEvent {
        repo: raw.repository.into(),
        branch: branch.to_string(),
        before: optional("before", raw.before)?,
        after: optional("after", raw.after)?,
    }))
}
