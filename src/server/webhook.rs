//! `POST /`: verifies a delivery and feeds it to the change trackers.
//!
//! Nothing here touches the queue. The changed-PR pass picks the change up.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use super::AppState;
use crate::webhooks::{WebhookError, apply_event, parse_webhook, verify_signature};

const HEADER_EVENT: &str = "x-github-event";
const HEADER_SIGNATURE: &str = "x-hub-signature-256";

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        // Every webhook failure is the sender's fault.
        (StatusCode::BAD_REQUEST, self.to_string()).into_response()
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub async fn webhook_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), WebhookError> {
    if let Err(e) = verify_signature(
        &body,
        header(&headers, HEADER_SIGNATURE),
        app_state.webhook_secret(),
    ) {
        warn!(error = %e, "rejected webhook");
        return Err(e);
    }

    let event_type = header(&headers, HEADER_EVENT).ok_or(WebhookError::MissingEventType)?;
    let Some(event) = parse_webhook(event_type, &body)? else {
        debug!(event_type, "ignored webhook");
        return Ok((StatusCode::OK, "Ignored"));
    };
    if event.repo() != app_state.repo() {
        debug!(event_type, repo = %event.repo(), "webhook for another repository");
        return Ok((StatusCode::OK, "Ignored"));
    }

    apply_event(app_state.trackers(), &event);
    Ok((StatusCode::OK, "OK"))
}
