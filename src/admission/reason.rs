//! Human-readable per-PR status reasons.

use std::fmt;

use serde::{Serialize, Serializer};

/// Why a PR is where it is.
///
/// The text of each variant is what the status endpoint shows, so it is
/// fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitReason {
    Unknown,
    NoCla,
    NoLgtm,
    LgtmEarly,
    Unmergeable,
    UndeterminedMergeability,
    CiFailure,
    DoNotMerge,
    E2eFailure,
    Merged,
    MergedBatch,
    Queued,
    WaitingStart,
    Running,
    RetestFailed,
    /// New commits arrived between the re-test and the merge.
    HeadChanged,
    /// A CI wait timed out. The text names the phase.
    WaitFailed(String),
    /// The merge call itself failed.
    MergeFailed(String),
}

impl SubmitReason {
    pub fn as_str(&self) -> &str {
        match self {
            SubmitReason::Unknown => "unknown failure",
            SubmitReason::NoCla => "PR does not have cla: yes.",
            SubmitReason::NoLgtm => "PR does not have LGTM.",
            SubmitReason::LgtmEarly => "The PR was changed after the LGTM label was added.",
            SubmitReason::Unmergeable => "PR is unable to be automatically merged. Needs rebase.",
            SubmitReason::UndeterminedMergeability => {
                "Unable to determine is PR is mergeable. Will try again later."
            }
            SubmitReason::CiFailure => "Github CI tests are not green.",
            SubmitReason::DoNotMerge => {
                "Will not auto merge because a do-not-merge label or milestone is present."
            }
            SubmitReason::E2eFailure => {
                "The e2e tests are failing. The entire submit queue is blocked."
            }
            SubmitReason::Merged => "MERGED!",
            SubmitReason::MergedBatch => "MERGED as part of a batch!",
            SubmitReason::Queued => "Queued to run github e2e tests a second time.",
            SubmitReason::WaitingStart => {
                "Requested and waiting for github e2e test to start running a second time."
            }
            SubmitReason::Running => "Running github e2e tests a second time.",
            SubmitReason::RetestFailed => "Second github e2e run failed.",
            SubmitReason::HeadChanged => "The PR changed while it was being re-tested.",
            SubmitReason::WaitFailed(text) | SubmitReason::MergeFailed(text) => text,
        }
    }

    /// True for the states a PR holds while it sits in the re-test queue.
    pub fn is_queue_state(&self) -> bool {
        matches!(
            self,
            SubmitReason::Queued | SubmitReason::WaitingStart | SubmitReason::Running
        )
    }

    pub fn is_merged(&self) -> bool {
        matches!(self, SubmitReason::Merged | SubmitReason::MergedBatch)
    }
}

impl fmt::Display for SubmitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SubmitReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}
