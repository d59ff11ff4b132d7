//! Core domain types for the submit queue.
//!
//! Identifiers and the snapshots of remote data that every other module
//! passes around.

pub mod ids;
pub mod pr;

pub use ids::{CommentId, InvalidRepoId, PrNumber, RepoId, Sha};
pub use pr::{
    CombinedStatus, CommentData, CommitData, ContextStatus, IssueData, IssueEventData, IssueState,
    PrData, StatusState,
};
