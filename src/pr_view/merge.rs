//! Merge commit message and audit comment text.

use std::sync::LazyLock;

use regex::Regex;

/// GitHub's limit on comment length, in characters.
pub const MAX_COMMENT_LEN: usize = 65535;

static REVIEWABLE_FOOTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!-- Reviewable:start -->.*<!-- Reviewable:end -->")
        .expect("reviewable footer regex is valid")
});

static HTML_COMMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!--[^<>]*?-->\n?").expect("html comment regex is valid")
});

/// Strips the Reviewable footer and HTML comments from a PR body.
pub fn clean_issue_body(body: &str) -> String {
    let body = REVIEWABLE_FOOTER.replace_all(body, "");
    let body = HTML_COMMENT.replace_all(&body, "");
    body.trim().to_string()
}

/// The audit comment posted right before merging.
pub fn audit_comment(actor: &str) -> String {
    format!("Automatic merge from {}", actor)
}

/// Builds the merge commit message.
///
/// The audit line, then the title, then the cleaned body unless the first
/// commit message already contains it verbatim. Containment is a plain
/// case-sensitive substring test.
pub fn merge_message(actor: &str, title: &str, body: &str, first_commit_message: &str) -> String {
    let mut message = audit_comment(actor);
    if !title.is_empty() {
        message.push_str("\n\n");
        message.push_str(title);
    }
    let body = clean_issue_body(body);
    if !first_commit_message.contains(&body) {
        message.push_str("\n\n");
        message.push_str(&body);
    }
    message
}

/// Truncates a comment to [`MAX_COMMENT_LEN`] characters.
pub fn truncate_comment(body: &str) -> &str {
    match body.char_indices().nth(MAX_COMMENT_LEN) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
