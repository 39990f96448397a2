use async_trait::async_trait;

use crate::domain::errors::DataFetchError;
use crate::domain::models::{CommitRecord, DateRange};

/// Source of commit history.
#[async_trait]
pub trait CommitFetcher: Send + Sync {
    /// Fetch commits of `repository` (`owner/name`) inside `range`, newest
    /// first, optionally restricted to authors matching `author_filter`.
    async fn fetch_commits(
        &self,
        repository: &str,
        range: &DateRange,
        author_filter: Option<&str>,
    ) -> Result<Vec<CommitRecord>, DataFetchError>;
}
