//! Commit fetcher over the GitHub REST API v3.
//!
//! Lists commits in the requested window page by page, then reads each
//! commit's detail for line and file counts. The author filter is a
//! case-insensitive substring match on the commit author name, applied
//! after listing.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use tracing::{debug, warn};

use super::models::{GitHubCommitDetail, GitHubCommitSummary};
use crate::adapters::sqlite::format_datetime;
use crate::domain::errors::DataFetchError;
use crate::domain::models::{CommitRecord, DataFetchConfig, DateRange};
use crate::domain::ports::CommitFetcher;

const PER_PAGE: usize = 100;
const MAX_PAGES: usize = 10;
const USER_AGENT: &str = concat!("commitscope/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct GitHubCommitFetcher {
    http: Client,
    base_url: String,
    token: Option<String>,
    max_commits: usize,
    request_timeout: Duration,
}

impl GitHubCommitFetcher {
    pub fn new(http: Client, config: &DataFetchConfig) -> Self {
        Self {
            http,
            base_url: config.github_api_url.trim_end_matches('/').to_string(),
            token: config.github_token.clone().or_else(|| std::env::var("GITHUB_TOKEN").ok()),
            max_commits: config.max_commits.max(1),
            request_timeout: Duration::from_secs(config.timeout_secs.max(1)),
        }
    }

    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<Response, DataFetchError> {
        let mut request = self
            .http
            .get(url)
            .query(query)
            .timeout(self.request_timeout)
            .header(header::USER_AGENT, USER_AGENT)
            .header(header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        request.send().await.map_err(|e| {
            if e.is_timeout() {
                DataFetchError::Timeout(self.request_timeout.as_secs())
            } else {
                DataFetchError::Failed(e.to_string())
            }
        })
    }

    async fn list_page(
        &self,
        repository: &str,
        range: &DateRange,
        page: usize,
    ) -> Result<Vec<GitHubCommitSummary>, DataFetchError> {
        let url = format!("{}/repos/{}/commits", self.base_url, repository);
        let query = [
            ("since", format_datetime(&range.from)),
            ("until", format_datetime(&range.to)),
            ("per_page", PER_PAGE.to_string()),
            ("page", page.to_string()),
        ];
        let response = self.get(&url, &query).await?;

        match response.status() {
            s if s.is_success() => response
                .json()
                .await
                .map_err(|e| DataFetchError::Failed(format!("invalid commit list: {}", e))),
            // An empty repository answers 409.
            StatusCode::CONFLICT => Ok(Vec::new()),
            StatusCode::NOT_FOUND => Err(DataFetchError::NotFound(repository.to_string())),
            _ => Err(classify(response).await),
        }
    }

    async fn detail(&self, repository: &str, sha: &str) -> Result<GitHubCommitDetail, DataFetchError> {
        let url = format!("{}/repos/{}/commits/{}", self.base_url, repository, sha);
        let response = self.get(&url, &[]).await?;
        if !response.status().is_success() {
            return Err(classify(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| DataFetchError::Failed(format!("invalid commit detail for {}: {}", sha, e)))
    }
}

async fn classify(response: Response) -> DataFetchError {
    let status = response.status();
    let exhausted = response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == "0");
    let body: String = response.text().await.unwrap_or_default().chars().take(300).collect();

    if status == StatusCode::TOO_MANY_REQUESTS || (status == StatusCode::FORBIDDEN && exhausted) {
        DataFetchError::RateLimited(format!("GitHub API {}", status))
    } else {
        DataFetchError::Failed(format!("GitHub API {}: {}", status, body))
    }
}

#[async_trait]
impl CommitFetcher for GitHubCommitFetcher {
    async fn fetch_commits(
        &self,
        repository: &str,
        range: &DateRange,
        author_filter: Option<&str>,
    ) -> Result<Vec<CommitRecord>, DataFetchError> {
        let needle = author_filter.map(str::to_lowercase);
        let mut summaries = Vec::new();

        for page in 1..=MAX_PAGES {
            let batch = self.list_page(repository, range, page).await?;
            let last_page = batch.len() < PER_PAGE;
            summaries.extend(batch.into_iter().filter(|c| {
                let author = c.commit.author.as_ref().map(|a| a.name.to_lowercase()).unwrap_or_default();
                needle.as_ref().map_or(true, |n| author.contains(n.as_str()))
            }));
            if last_page || summaries.len() >= self.max_commits {
                break;
            }
        }
        summaries.truncate(self.max_commits);
        debug!(repository, commits = summaries.len(), "commit list fetched");

        let mut commits = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let Some(author) = summary.commit.author else {
                warn!(sha = %summary.sha, "commit without author skipped");
                continue;
            };
            let detail = self.detail(repository, &summary.sha).await?;
            let stats = detail.stats.unwrap_or_default();
            commits.push(CommitRecord {
                sha: summary.sha,
                message: summary.commit.message,
                author: author.name,
                date: author.date,
                additions: stats.additions,
                deletions: stats.deletions,
                files_changed: detail.files.len() as u64,
            });
        }

        commits.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(commits)
    }
}
