//! Submit queue - an admission-control merge queue for GitHub pull requests.
//!
//! The engine re-evaluates open PRs against an ordered set of admission
//! checks, queues the ones that pass, re-tests the head of the queue and
//! merges it under a single merge lock. Passing batch results from CI can
//! merge several queued PRs at once once the base branch history proves the
//! batch still applies.

pub mod admission;
pub mod batch;
pub mod config;
pub mod effects;
pub mod github;
pub mod health;
pub mod pr_view;
pub mod queue;
pub mod server;
pub mod tracker;
pub mod types;
pub mod webhooks;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_utils;
