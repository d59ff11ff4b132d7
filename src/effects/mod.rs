//! Effects-as-data for GitHub operations.
//!
//! Core logic describes remote operations as [`GitHubEffect`] values and an
//! interpreter executes them. This enables:
//! - Testability via scripted interpreters
//! - Logging/tracing of intended operations
//! - A single choke point for rate limiting and caching

pub mod fetch;
pub mod github;
pub mod interpreter;

pub use fetch::GitHub;
pub use github::{Freshness, GitHubEffect, GitHubResponse};
pub use interpreter::GitHubInterpreter;
