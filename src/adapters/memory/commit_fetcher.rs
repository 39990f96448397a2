//! Commit fetcher over a fixed list of commits.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::errors::DataFetchError;
use crate::domain::models::{CommitRecord, DateRange};
use crate::domain::ports::CommitFetcher;

/// Serves a fixed set of commits, filtered like the GitHub fetcher filters.
#[derive(Debug, Clone, Default)]
pub struct StaticCommitFetcher {
    commits: Vec<CommitRecord>,
    delay: Duration,
    error: Option<DataFetchError>,
}

impl StaticCommitFetcher {
    pub fn new(commits: Vec<CommitRecord>) -> Self {
        Self { commits, ..Default::default() }
    }

    pub fn failing(error: DataFetchError) -> Self {
        Self { error: Some(error), ..Default::default() }
    }

    /// Sleep this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl CommitFetcher for StaticCommitFetcher {
    async fn fetch_commits(
        &self,
        _repository: &str,
        range: &DateRange,
        author_filter: Option<&str>,
    ) -> Result<Vec<CommitRecord>, DataFetchError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        let needle = author_filter.map(str::to_lowercase);
        let mut commits: Vec<CommitRecord> = self
            .commits
            .iter()
            .filter(|c| range.contains(c.date))
            .filter(|c| needle.as_ref().map_or(true, |n| c.author.to_lowercase().contains(n.as_str())))
            .cloned()
            .collect();
        commits.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(commits)
    }
}
