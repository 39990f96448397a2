//! Wire types for the GitHub commits endpoints.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Entry of `GET /repos/{owner}/{repo}/commits`.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubCommitSummary {
    pub sha: String,
    pub commit: GitHubCommitBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubCommitBody {
    pub message: String,
    pub author: Option<GitHubSignature>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubSignature {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    pub date: DateTime<Utc>,
}

/// `GET /repos/{owner}/{repo}/commits/{sha}`, reduced to what the engine reads.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubCommitDetail {
    #[serde(default)]
    pub stats: Option<GitHubCommitStats>,
    #[serde(default)]
    pub files: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitHubCommitStats {
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
}
