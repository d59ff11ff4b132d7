//! Effect interpreter trait.
//!
//! The trait-based design lets the engine run against the real API or a
//! scripted fake in tests.

use std::future::Future;

use super::github::{GitHubEffect, GitHubResponse};

/// Interprets GitHub effects against the GitHub API.
///
/// Implementations are constructed with a `RepoId`, so all effects executed
/// through a single interpreter instance are scoped to that repository.
///
/// # Example (mock for testing)
///
/// ```ignore
/// struct MockGitHubInterpreter {
///     response: GitHubResponse,
/// }
///
/// impl GitHubInterpreter for MockGitHubInterpreter {
///     type Error = GitHubApiError;
///
///     async fn interpret(&self, _effect: GitHubEffect) -> Result<GitHubResponse, Self::Error> {
///         Ok(self.response.clone())
///     }
/// }
/// ```
pub trait GitHubInterpreter {
    /// The error type returned by this interpreter.
    type Error;

    /// Execute a GitHub effect and return its response.
    fn interpret(
        &self,
        effect: GitHubEffect,
    ) -> impl Future<Output = Result<GitHubResponse, Self::Error>> + Send;
}
