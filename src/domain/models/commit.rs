//! Commit records and the statistics derived from them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One commit as returned by the data-fetch collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub sha: String,
    pub message: String,
    pub author: String,
    pub date: DateTime<Utc>,
    pub additions: u64,
    pub deletions: u64,
    pub files_changed: u64,
}

/// Per-author totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeveloperStats {
    pub commits: u64,
    pub additions: u64,
    pub deletions: u64,
    pub files_changed: u64,
}

/// Timing and size patterns across the commit set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitPatterns {
    pub avg_additions: f64,
    pub avg_deletions: f64,
    pub avg_files_changed: f64,
    /// Hour of day (UTC) with the most commits.
    pub most_active_hour: Option<u32>,
    /// Weekday name with the most commits.
    pub most_active_day: Option<String>,
    pub hourly_distribution: BTreeMap<u32, u64>,
    pub daily_distribution: BTreeMap<String, u64>,
}

/// Aggregates computed from fetched commits before any provider is called.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitStats {
    pub total_commits: u64,
    pub total_additions: u64,
    pub total_deletions: u64,
    pub total_files_changed: u64,
    /// Distinct calendar days (UTC) with at least one commit.
    pub active_days: u64,
    /// Days in the requested range, counting both ends.
    pub days_in_range: u64,
    pub developers: BTreeMap<String, DeveloperStats>,
    pub patterns: CommitPatterns,
}
