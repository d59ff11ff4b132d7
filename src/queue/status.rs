//! Per-PR status board.
//!
//! Statuses written during the current pass go into `current`. At the start
//! of each full pass `current` becomes `previous` and a fresh map is started,
//! so a PR that is no longer open drops off after one pass. Readers see
//! `previous` overlaid with `current`.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::admission::SubmitReason;
use crate::types::{IssueData, PrNumber};

/// One PR's externally visible state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrStatus {
    pub number: PrNumber,
    pub title: String,
    pub author: String,
    pub url: String,
    pub reason: SubmitReason,
}

impl PrStatus {
    pub fn new(issue: &IssueData, reason: SubmitReason) -> Self {
        Self {
            number: issue.number,
            title: issue.title.clone(),
            author: issue.user.clone(),
            url: issue.html_url.clone(),
            reason,
        }
    }

    fn bare(number: PrNumber, reason: SubmitReason) -> Self {
        Self {
            number,
            title: String::new(),
            author: String::new(),
            url: String::new(),
            reason,
        }
    }
}

#[derive(Debug, Default)]
pub struct StatusBoard {
    current: BTreeMap<PrNumber, PrStatus>,
    previous: BTreeMap<PrNumber, PrStatus>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new full pass.
    pub fn rotate(&mut self) {
        self.previous = std::mem::take(&mut self.current);
    }

    pub fn set(&mut self, status: PrStatus) {
        self.current.insert(status.number, status);
    }

    /// Changes the reason of a known PR, keeping its other fields.
    pub fn set_reason(&mut self, number: PrNumber, reason: SubmitReason) {
        let status = self
            .current
            .get(&number)
            .or_else(|| self.previous.get(&number))
            .cloned()
            .map(|status| PrStatus { reason: reason.clone(), ..status })
            .unwrap_or_else(|| PrStatus::bare(number, reason));
        self.set(status);
    }

    pub fn get(&self, number: PrNumber) -> Option<&PrStatus> {
        self.current
            .get(&number)
            .or_else(|| self.previous.get(&number))
    }

    /// `previous` overlaid with `current`, ordered by PR number.
    pub fn snapshot(&self) -> Vec<PrStatus> {
        let mut merged = self.previous.clone();
        merged.extend(self.current.iter().map(|(k, v)| (*k, v.clone())));
        merged.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::open_pr;

    #[test]
    fn rotation_keeps_last_pass_visible() {
        let mut board = StatusBoard::new();
        board.set(PrStatus::new(&open_pr(1, "a").issue, SubmitReason::NoLgtm));
        board.set(PrStatus::new(&open_pr(2, "b").issue, SubmitReason::NoCla));

        board.rotate();
        board.set(PrStatus::new(&open_pr(1, "a").issue, SubmitReason::Queued));

        let snapshot = board.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].reason, SubmitReason::Queued);
        assert_eq!(snapshot[1].reason, SubmitReason::NoCla);

        board.rotate();
        board.rotate();
        assert!(board.snapshot().is_empty());
    }

    #[test]
    fn set_reason_keeps_metadata() {
        let mut board = StatusBoard::new();
        board.set(PrStatus::new(&open_pr(1, "a").issue, SubmitReason::Queued));
        board.rotate();
        board.set_reason(PrNumber(1), SubmitReason::Running);

        let status = board.get(PrNumber(1)).unwrap();
        assert_eq!(status.title, "PR 1");
        assert_eq!(status.reason, SubmitReason::Running);

        board.set_reason(PrNumber(9), SubmitReason::Unknown);
        assert_eq!(board.get(PrNumber(9)).unwrap().title, "");
    }
}
