//! The long-running loops.
//!
//! [`Engine`] owns every piece of mutable process state and drives:
//!
//! - the full pass over all open PRs
//! - the changed-PR fast path fed by the webhook trackers
//! - the CI stability tick
//! - the batch tick, when a batch-job source is configured
//! - the merge worker
//!
//! All of them stop at their next suspension point once the shared
//! cancellation token fires.

mod engine;
mod poll;

pub use engine::{Engine, EngineError};
pub use poll::PollConfig;
