//! GitHub API error types.
//!
//! Errors are classified for retry decisions:
//!
//! - **Transient** errors are retriable (5xx, rate limits, network failures,
//!   "try again" style messages).
//! - **Permanent** errors are not (most 4xx, malformed payloads).
//! - **SHA mismatch** (HTTP 409 on a guarded merge) means the PR head moved
//!   after we evaluated it. The caller must re-evaluate the PR.
//!
//! The poll loop treats transient errors as "skip this PR for this cycle";
//! they never become a terminal PR status.

use std::fmt;
use thiserror::Error;

use crate::types::{PrNumber, Sha};

/// Message GitHub returns when the base moved under a merge request.
const BRANCH_MODIFIED: &str = "branch was modified. review and try the merge again.";

/// The kind of GitHub API error, categorized for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitHubErrorKind {
    /// Safe to retry with backoff.
    Transient,

    /// Requires a different request or human intervention.
    Permanent,

    /// The PR head changed between evaluation and a SHA-guarded merge.
    ShaMismatch,
}

impl GitHubErrorKind {
    /// Returns true if this error is retriable.
    ///
    /// `ShaMismatch` is not: retrying with the same SHA fails again.
    pub fn is_retriable(&self) -> bool {
        matches!(self, GitHubErrorKind::Transient)
    }
}

/// A GitHub API error with categorization for retry decisions.
#[derive(Debug, Error)]
pub struct GitHubApiError {
    pub kind: GitHubErrorKind,

    /// The HTTP status code, if the request got that far.
    pub status_code: Option<u16>,

    /// A human-readable description of the error.
    pub message: String,

    /// The underlying octocrab error, if any.
    #[source]
    pub source: Option<octocrab::Error>,
}

impl fmt::Display for GitHubApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "GitHub API error (HTTP {}): {}", code, self.message),
            None => write!(f, "GitHub API error: {}", self.message),
        }
    }
}

impl GitHubApiError {
    /// Creates a SHA mismatch error for a guarded merge.
    pub fn sha_mismatch(pr: PrNumber, expected: &Sha, message: &str) -> Self {
        Self {
            kind: GitHubErrorKind::ShaMismatch,
            status_code: Some(409),
            message: format!(
                "SHA mismatch on PR {}: expected {}: {}",
                pr,
                expected.short(),
                message
            ),
            source: None,
        }
    }

    /// Creates a permanent error without an octocrab source.
    pub fn permanent_without_source(message: impl Into<String>) -> Self {
        Self {
            kind: GitHubErrorKind::Permanent,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a transient error without an octocrab source.
    pub fn transient_without_source(message: impl Into<String>) -> Self {
        Self {
            kind: GitHubErrorKind::Transient,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    /// Categorizes a non-success HTTP response.
    ///
    /// `message` is the `message` field of GitHub's error body when present,
    /// otherwise the raw body.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = if is_transient_message(&message) {
            GitHubErrorKind::Transient
        } else {
            match status {
                429 => GitHubErrorKind::Transient,
                403 if is_rate_limit_error(&message) => GitHubErrorKind::Transient,
                code if (500..600).contains(&code) => GitHubErrorKind::Transient,
                _ => GitHubErrorKind::Permanent,
            }
        };
        Self {
            kind,
            status_code: Some(status),
            message,
            source: None,
        }
    }

    /// Categorizes an octocrab error.
    ///
    /// These surface when the request never produced a response we could
    /// inspect (connection failures, body decoding), so the message is all
    /// there is to go on.
    pub fn from_octocrab(err: octocrab::Error) -> Self {
        let message = err.to_string();
        let status_code = extract_status_code(&message);

        let kind = if is_transient_message(&message) {
            GitHubErrorKind::Transient
        } else {
            match status_code {
                Some(429) => GitHubErrorKind::Transient,
                Some(403) if is_rate_limit_error(&message) => GitHubErrorKind::Transient,
                Some(code) if (500..600).contains(&code) => GitHubErrorKind::Transient,
                Some(_) => GitHubErrorKind::Permanent,
                None if is_network_error(&message) => GitHubErrorKind::Transient,
                None => GitHubErrorKind::Permanent,
            }
        };

        Self {
            kind,
            status_code,
            message,
            source: Some(err),
        }
    }

    /// Returns true if GitHub rejected a merge because the base branch moved.
    ///
    /// Recomputing mergeability and retrying once usually succeeds.
    pub fn is_branch_modified(&self) -> bool {
        self.message.to_lowercase().contains(BRANCH_MODIFIED)
    }
}

/// Pulls an HTTP status code out of an error message, if one is mentioned.
fn extract_status_code(message: &str) -> Option<u16> {
    if let Some(idx) = message.find("status: ") {
        let digits: String = message[idx + 8..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if let Ok(code) = digits.parse() {
            return Some(code);
        }
    }

    [404, 409, 422, 403, 401, 429, 500, 502, 503]
        .into_iter()
        .find(|code| message.contains(&code.to_string()))
}

/// Checks if an error message indicates a transient condition.
fn is_transient_message(message: &str) -> bool {
    let message_lower = message.to_lowercase();

    // Status check hasn't propagated yet
    if message_lower.contains("required status check") && message_lower.contains("expected") {
        return true;
    }

    if message_lower.contains("base branch was modified") {
        return true;
    }

    message_lower.contains("try again")
}

/// Checks if an error message indicates a rate limit.
fn is_rate_limit_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("rate limit")
        || message_lower.contains("api rate")
        || message_lower.contains("secondary rate")
        || message_lower.contains("abuse detection")
}

/// Checks if an error message indicates a network-level error.
fn is_network_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("timeout")
        || message_lower.contains("connection")
        || message_lower.contains("network")
        || message_lower.contains("dns")
        || message_lower.contains("timed out")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_message_detection() {
        assert!(is_transient_message(
            "Required status check 'ci/test' is expected"
        ));
        assert!(is_transient_message("Base branch was modified"));
        assert!(is_transient_message("Please try again later"));
        assert!(!is_transient_message("Pull Request is not mergeable"));
    }

    #[test]
    fn rate_limit_detection() {
        assert!(is_rate_limit_error("API rate limit exceeded"));
        assert!(is_rate_limit_error("secondary rate limit"));
        assert!(!is_rate_limit_error("Permission denied"));
    }

    #[test]
    fn status_classification() {
        assert_eq!(
            GitHubApiError::from_status(502, "Bad Gateway").kind,
            GitHubErrorKind::Transient
        );
        assert_eq!(
            GitHubApiError::from_status(429, "slow down").kind,
            GitHubErrorKind::Transient
        );
        assert_eq!(
            GitHubApiError::from_status(403, "API rate limit exceeded for user").kind,
            GitHubErrorKind::Transient
        );
        assert_eq!(
            GitHubApiError::from_status(403, "Resource not accessible").kind,
            GitHubErrorKind::Permanent
        );
        assert_eq!(
            GitHubApiError::from_status(404, "Not Found").kind,
            GitHubErrorKind::Permanent
        );
    }

    #[test]
    fn branch_modified_is_detected_and_transient() {
        let err = GitHubApiError::from_status(
            405,
            "Base branch was modified. Review and try the merge again.",
        );
        assert!(err.is_branch_modified());
        assert!(err.kind.is_retriable());

        let other = GitHubApiError::from_status(405, "Pull Request is not mergeable");
        assert!(!other.is_branch_modified());
    }

    #[test]
    fn extract_status_code_patterns() {
        assert_eq!(extract_status_code("failed, status: 503 Service"), Some(503));
        assert_eq!(extract_status_code("HTTP 404 Not Found"), Some(404));
        assert_eq!(extract_status_code("connection reset"), None);
    }

    #[test]
    fn display_includes_status() {
        let err = GitHubApiError::from_status(422, "Validation Failed");
        assert_eq!(
            err.to_string(),
            "GitHub API error (HTTP 422): Validation Failed"
        );
    }

    #[test]
    fn error_kind_retriable() {
        assert!(GitHubErrorKind::Transient.is_retriable());
        assert!(!GitHubErrorKind::Permanent.is_retriable());
        assert!(!GitHubErrorKind::ShaMismatch.is_retriable());
    }
}
