//! Batch job results published by the CI system.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{Batch, BatchError};

/// One CI job record. Only a few fields matter here.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BatchJob {
    #[serde(rename = "type")]
    pub kind: String,
    pub repo: String,
    /// Batch descriptor, `base:sha,pr:sha,...`.
    pub refs: String,
    pub state: String,
    pub context: String,
}

/// Reads the job list from a JSON endpoint.
#[derive(Debug, Clone)]
pub struct HttpJobSource {
    client: Client,
    url: String,
}

impl HttpJobSource {
    pub fn new(url: impl Into<String>) -> Result<Self, BatchError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Successful batch jobs for `repo` (`owner/name`).
    pub async fn successful_batch_jobs(&self, repo: &str) -> Result<Vec<BatchJob>, BatchError> {
        let jobs: Vec<BatchJob> = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let total = jobs.len();
        let jobs: Vec<BatchJob> = jobs
            .into_iter()
            .filter(|j| j.repo == repo && j.kind == "batch" && j.state == "success")
            .collect();
        debug!(total, batch = jobs.len(), "read batch jobs");
        Ok(jobs)
    }
}

/// Batches that passed in every required and re-test context.
///
/// Descriptors that do not parse are skipped.
pub fn complete_batches(jobs: &[BatchJob], required: &[String], retest: &[String]) -> Vec<Batch> {
    let mut contexts: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for job in jobs {
        contexts
            .entry(job.refs.as_str())
            .or_default()
            .insert(job.context.as_str());
    }
    contexts
        .into_iter()
        .filter(|(_, passed)| {
            required
                .iter()
                .chain(retest)
                .all(|ctx| passed.contains(ctx.as_str()))
        })
        .filter_map(|(refs, _)| refs.parse().ok())
        .collect()
}
