//! Commit statistics and the deterministic metrics derived from them.
//!
//! Nothing here looks at provider output. The same commits and date range
//! always produce the same numbers.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, Timelike};

use crate::domain::models::{
    CommitPatterns, CommitRecord, CommitStats, DateRange, DeveloperStats, MetricValue,
};

pub const CONSISTENCY_SCORE: &str = "consistency_score";
pub const PRODUCTIVITY_SCORE: &str = "productivity_score";
pub const QUALITY_SCORE: &str = "quality_score";
pub const COLLABORATION_SCORE: &str = "collaboration_score";
pub const CHURN_RATIO: &str = "churn_ratio";

/// Commits per week treated as full productivity.
const TARGET_COMMITS_PER_WEEK: f64 = 10.0;
/// Average changed lines per commit below which size is not penalised.
const IDEAL_LINES_PER_COMMIT: f64 = 50.0;
/// Range over which the size penalty grows to its maximum.
const LINES_PENALTY_SPAN: f64 = 950.0;
const IDEAL_FILES_PER_COMMIT: f64 = 5.0;
const FILES_PENALTY_SPAN: f64 = 45.0;

/// Aggregate fetched commits.
pub fn compute_stats(commits: &[CommitRecord], range: &DateRange) -> CommitStats {
    let mut stats = CommitStats {
        days_in_range: range.days_inclusive() as u64,
        ..Default::default()
    };
    let mut active_days = BTreeSet::new();
    let mut hourly: BTreeMap<u32, u64> = BTreeMap::new();
    let mut daily: BTreeMap<String, u64> = BTreeMap::new();

    for commit in commits {
        stats.total_commits += 1;
        stats.total_additions += commit.additions;
        stats.total_deletions += commit.deletions;
        stats.total_files_changed += commit.files_changed;

        let dev = stats.developers.entry(commit.author.clone()).or_insert_with(DeveloperStats::default);
        dev.commits += 1;
        dev.additions += commit.additions;
        dev.deletions += commit.deletions;
        dev.files_changed += commit.files_changed;

        active_days.insert(commit.date.date_naive());
        *hourly.entry(commit.date.hour()).or_default() += 1;
        *daily.entry(commit.date.weekday().to_string()).or_default() += 1;
    }

    stats.active_days = active_days.len() as u64;

    let n = stats.total_commits.max(1) as f64;
    stats.patterns = CommitPatterns {
        avg_additions: stats.total_additions as f64 / n,
        avg_deletions: stats.total_deletions as f64 / n,
        avg_files_changed: stats.total_files_changed as f64 / n,
        most_active_hour: busiest(&hourly).copied(),
        most_active_day: busiest(&daily).cloned(),
        hourly_distribution: hourly,
        daily_distribution: daily,
    };
    stats
}

/// Key with the highest count; ties go to the smallest key.
fn busiest<K: Ord>(counts: &BTreeMap<K, u64>) -> Option<&K> {
    let mut best: Option<(&K, u64)> = None;
    for (k, v) in counts {
        if best.map_or(true, |(_, b)| *v > b) {
            best = Some((k, *v));
        }
    }
    best.map(|(k, _)| k)
}

/// Derive the named metrics from commit statistics.
pub fn compute_metrics(stats: &CommitStats) -> BTreeMap<String, MetricValue> {
    let days = stats.days_in_range.max(1) as f64;
    let commits = stats.total_commits as f64;
    let active_ratio = stats.active_days as f64 / days;

    let consistency = 100.0 * active_ratio;

    let commits_per_week = commits * 7.0 / days;
    let productivity =
        100.0 * (0.6 * (commits_per_week / TARGET_COMMITS_PER_WEEK).min(1.0) + 0.4 * active_ratio);

    let quality = if stats.total_commits == 0 {
        0.0
    } else {
        let avg_lines = (stats.total_additions + stats.total_deletions) as f64 / commits;
        let avg_files = stats.total_files_changed as f64 / commits;
        let size_factor = 1.0 - ((avg_lines - IDEAL_LINES_PER_COMMIT) / LINES_PENALTY_SPAN).clamp(0.0, 1.0);
        let files_factor = 1.0 - ((avg_files - IDEAL_FILES_PER_COMMIT) / FILES_PENALTY_SPAN).clamp(0.0, 1.0);
        100.0 * (0.7 * size_factor + 0.3 * files_factor)
    };

    let collaboration = if stats.developers.len() > 1 {
        let top = stats.developers.values().map(|d| d.commits).max().unwrap_or(0) as f64;
        100.0 * (1.0 - top / commits.max(1.0))
    } else {
        0.0
    };

    let lines = (stats.total_additions + stats.total_deletions) as f64;
    let churn = if lines > 0.0 { stats.total_deletions as f64 / lines } else { 0.0 };

    let mut metrics = BTreeMap::new();
    metrics.insert(CONSISTENCY_SCORE.to_string(), MetricValue::score(consistency));
    metrics.insert(PRODUCTIVITY_SCORE.to_string(), MetricValue::score(productivity));
    metrics.insert(QUALITY_SCORE.to_string(), MetricValue::score(quality));
    metrics.insert(COLLABORATION_SCORE.to_string(), MetricValue::score(collaboration));
    metrics.insert(CHURN_RATIO.to_string(), MetricValue::ratio(churn));
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn commit(author: &str, date: &str, additions: u64, deletions: u64, files: u64) -> CommitRecord {
        CommitRecord {
            sha: format!("{}-{}", author, date),
            message: "change".to_string(),
            author: author.to_string(),
            date: at(date),
            additions,
            deletions,
            files_changed: files,
        }
    }

    fn week() -> DateRange {
        DateRange::new(at("2024-01-01T00:00:00Z"), at("2024-01-07T23:59:59Z"))
    }

    #[test]
    fn test_stats_totals_and_developers() {
        let commits = vec![
            commit("ann", "2024-01-01T09:00:00Z", 10, 2, 1),
            commit("ann", "2024-01-01T15:00:00Z", 20, 4, 2),
            commit("ben", "2024-01-03T09:30:00Z", 30, 6, 3),
        ];
        let stats = compute_stats(&commits, &week());
        assert_eq!(stats.total_commits, 3);
        assert_eq!(stats.total_additions, 60);
        assert_eq!(stats.total_deletions, 12);
        assert_eq!(stats.total_files_changed, 6);
        assert_eq!(stats.active_days, 2);
        assert_eq!(stats.days_in_range, 7);
        assert_eq!(stats.developers["ann"].commits, 2);
        assert_eq!(stats.patterns.most_active_hour, Some(9));
        assert_eq!(stats.patterns.most_active_day.as_deref(), Some("Mon"));
    }

    #[test]
    fn test_metrics_formulas() {
        let commits = vec![
            commit("ann", "2024-01-01T09:00:00Z", 40, 10, 2),
            commit("ann", "2024-01-02T09:00:00Z", 40, 10, 2),
            commit("ben", "2024-01-03T09:00:00Z", 40, 10, 2),
            commit("ben", "2024-01-04T09:00:00Z", 40, 10, 2),
        ];
        let metrics = compute_metrics(&compute_stats(&commits, &week()));

        let consistency = 100.0 * 4.0 / 7.0;
        assert!((metrics[CONSISTENCY_SCORE].value - consistency).abs() < 1e-9);

        // 4 commits/week -> 0.6 * 0.4 + 0.4 * 4/7
        let productivity = 100.0 * (0.6 * 0.4 + 0.4 * 4.0 / 7.0);
        assert!((metrics[PRODUCTIVITY_SCORE].value - productivity).abs() < 1e-9);

        // 50 lines and 2 files per commit carry no penalty
        assert!((metrics[QUALITY_SCORE].value - 100.0).abs() < 1e-9);
        assert!((metrics[COLLABORATION_SCORE].value - 50.0).abs() < 1e-9);
        assert!((metrics[CHURN_RATIO].value - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_single_author_has_no_collaboration() {
        let commits = vec![commit("ann", "2024-01-01T09:00:00Z", 5000, 0, 80)];
        let metrics = compute_metrics(&compute_stats(&commits, &week()));
        assert_eq!(metrics[COLLABORATION_SCORE].value, 0.0);
        // Oversized commit bottoms out both quality factors
        assert!(metrics[QUALITY_SCORE].value.abs() < 1e-9);
    }

    #[test]
    fn test_metrics_stay_in_scale() {
        let commits: Vec<_> = (0..200)
            .map(|i| commit(&format!("dev{}", i % 3), "2024-01-02T10:00:00Z", 1, 1, 1))
            .collect();
        let metrics = compute_metrics(&compute_stats(&commits, &week()));
        for m in metrics.values() {
            assert!(m.value >= m.min && m.value <= m.max);
        }
        assert!(metrics[PRODUCTIVITY_SCORE].value <= 100.0);
    }

    #[test]
    fn test_empty_commits() {
        let metrics = compute_metrics(&compute_stats(&[], &week()));
        assert_eq!(metrics[QUALITY_SCORE].value, 0.0);
        assert_eq!(metrics[CHURN_RATIO].value, 0.0);
    }
}
