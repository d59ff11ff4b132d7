//! The re-test queue and its priority order.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::Labels;
use crate::types::{IssueData, PrNumber};

/// Lower values go first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Priority(pub i64);

impl Priority {
    /// PRs that skip the re-test go ahead of everything.
    pub const SKIP_RETEST: Priority = Priority(-1);
    /// Rank of a PR without a priority label.
    pub const DEFAULT: Priority = Priority(3);

    /// Reads the priority from a PR's labels.
    ///
    /// The skip-retest label wins; otherwise the lowest `priority/P<n>`
    /// label counts; otherwise [`Priority::DEFAULT`].
    pub fn from_labels(issue_labels: &[String], labels: &Labels) -> Self {
        if issue_labels.iter().any(|l| *l == labels.retest_not_required) {
            return Priority::SKIP_RETEST;
        }
        issue_labels
            .iter()
            .filter_map(|l| l.strip_prefix(labels.priority_prefix.as_str()))
            .filter_map(|n| n.parse::<i64>().ok())
            .filter(|n| *n >= 0)
            .min()
            .map(Priority)
            .unwrap_or(Priority::DEFAULT)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueEntry {
    pub number: PrNumber,
    pub priority: Priority,
    pub title: String,
    pub url: String,
}

impl QueueEntry {
    pub fn new(issue: &IssueData, priority: Priority) -> Self {
        Self {
            number: issue.number,
            priority,
            title: issue.title.clone(),
            url: issue.html_url.clone(),
        }
    }

    fn sort_key(&self) -> (Priority, PrNumber) {
        (self.priority, self.number)
    }
}

/// PRs admitted and waiting for their final re-test.
#[derive(Debug, Default)]
pub struct RetestQueue {
    entries: BTreeMap<PrNumber, QueueEntry>,
    running: Option<PrNumber>,
}

impl RetestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or re-ranks a PR.
    pub fn insert(&mut self, entry: QueueEntry) {
        self.entries.insert(entry.number, entry);
    }

    pub fn remove(&mut self, number: PrNumber) -> Option<QueueEntry> {
        self.entries.remove(&number)
    }

    pub fn contains(&self, number: PrNumber) -> bool {
        self.entries.contains_key(&number)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest-priority entry; ties go to the lower PR number.
    pub fn head(&self) -> Option<&QueueEntry> {
        self.entries.values().min_by_key(|e| e.sort_key())
    }

    pub fn ordered(&self) -> Vec<QueueEntry> {
        let mut entries: Vec<QueueEntry> = self.entries.values().cloned().collect();
        entries.sort_by_key(QueueEntry::sort_key);
        entries
    }

    /// Empties the queue, returning what was in it.
    pub fn drain(&mut self) -> Vec<QueueEntry> {
        let drained = self.ordered();
        self.entries.clear();
        drained
    }

    pub fn running(&self) -> Option<PrNumber> {
        self.running
    }

    pub fn set_running(&mut self, running: Option<PrNumber>) {
        self.running = running;
    }
}
