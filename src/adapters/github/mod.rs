//! GitHub REST API commit source.

pub mod client;
pub mod models;

pub use client::GitHubCommitFetcher;
