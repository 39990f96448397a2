//! GitHub commit fetcher against a mock REST server.

use commitscope::adapters::github::GitHubCommitFetcher;
use commitscope::domain::errors::DataFetchError;
use commitscope::domain::models::{DataFetchConfig, DateRange};
use commitscope::domain::ports::CommitFetcher;
use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;

fn fetcher(server: &Server, max_commits: usize) -> GitHubCommitFetcher {
    let config = DataFetchConfig {
        timeout_secs: 5,
        max_commits,
        github_api_url: server.url(),
        github_token: Some("gh-test".to_string()),
    };
    GitHubCommitFetcher::new(reqwest::Client::new(), &config)
}

fn summary(sha: &str, author: &str, date: &str) -> serde_json::Value {
    json!({
        "sha": sha,
        "commit": {
            "message": format!("commit {}", sha),
            "author": {"name": author, "email": "dev@example.com", "date": date}
        }
    })
}

async fn mock_detail(server: &mut ServerGuard, sha: &str, additions: u64, files: usize) -> mockito::Mock {
    let files: Vec<_> = (0..files).map(|i| json!({"filename": format!("src/f{}.rs", i)})).collect();
    server
        .mock("GET", format!("/repos/octo/widgets/commits/{}", sha).as_str())
        .with_status(200)
        .with_body(json!({"sha": sha, "stats": {"additions": additions, "deletions": 1}, "files": files}).to_string())
        .create_async()
        .await
}

#[tokio::test]
async fn test_fetches_commits_with_details() {
    let mut server = Server::new_async().await;
    let list = server
        .mock("GET", "/repos/octo/widgets/commits")
        .match_header("authorization", "Bearer gh-test")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("per_page".into(), "100".into()),
            Matcher::UrlEncoded("page".into(), "1".into()),
        ]))
        .with_status(200)
        .with_body(
            json!([
                summary("aaa", "Alice Smith", "2026-10-01T09:00:00Z"),
                summary("bbb", "Bob Jones", "2026-10-03T15:30:00Z")
            ])
            .to_string(),
        )
        .create_async()
        .await;
    let _a = mock_detail(&mut server, "aaa", 12, 2).await;
    let _b = mock_detail(&mut server, "bbb", 40, 3).await;

    let commits = fetcher(&server, 100)
        .fetch_commits("octo/widgets", &DateRange::last_days(30), None)
        .await
        .unwrap();

    list.assert_async().await;
    assert_eq!(commits.len(), 2);
    // Newest first.
    assert_eq!(commits[0].sha, "bbb");
    assert_eq!(commits[0].author, "Bob Jones");
    assert_eq!(commits[0].additions, 40);
    assert_eq!(commits[0].files_changed, 3);
    assert_eq!(commits[1].deletions, 1);
}

#[tokio::test]
async fn test_author_filter_is_case_insensitive_substring() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/repos/octo/widgets/commits")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            json!([
                summary("aaa", "Alice Smith", "2026-10-01T09:00:00Z"),
                summary("bbb", "Bob Jones", "2026-10-03T15:30:00Z")
            ])
            .to_string(),
        )
        .create_async()
        .await;
    let _a = mock_detail(&mut server, "aaa", 12, 2).await;
    let skipped = server
        .mock("GET", "/repos/octo/widgets/commits/bbb")
        .expect(0)
        .create_async()
        .await;

    let commits = fetcher(&server, 100)
        .fetch_commits("octo/widgets", &DateRange::last_days(30), Some("ALICE"))
        .await
        .unwrap();

    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].author, "Alice Smith");
    skipped.assert_async().await;
}

#[tokio::test]
async fn test_max_commits_caps_details() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/repos/octo/widgets/commits")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            json!([
                summary("aaa", "Alice Smith", "2026-10-01T09:00:00Z"),
                summary("bbb", "Bob Jones", "2026-10-03T15:30:00Z")
            ])
            .to_string(),
        )
        .create_async()
        .await;
    let _a = mock_detail(&mut server, "aaa", 12, 2).await;

    let commits = fetcher(&server, 1)
        .fetch_commits("octo/widgets", &DateRange::last_days(30), None)
        .await
        .unwrap();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].sha, "aaa");
}

#[tokio::test]
async fn test_missing_repository_is_not_found() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/repos/octo/gone/commits")
        .match_query(Matcher::Any)
        .with_status(404)
        .with_body("{\"message\":\"Not Found\"}")
        .create_async()
        .await;

    let err = fetcher(&server, 100)
        .fetch_commits("octo/gone", &DateRange::last_days(30), None)
        .await
        .unwrap_err();
    assert!(matches!(err, DataFetchError::NotFound(ref repo) if repo == "octo/gone"));
}

#[tokio::test]
async fn test_empty_repository_yields_no_commits() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/repos/octo/widgets/commits")
        .match_query(Matcher::Any)
        .with_status(409)
        .with_body("{\"message\":\"Git Repository is empty.\"}")
        .create_async()
        .await;

    let commits = fetcher(&server, 100)
        .fetch_commits("octo/widgets", &DateRange::last_days(30), None)
        .await
        .unwrap();
    assert!(commits.is_empty());
}

#[tokio::test]
async fn test_exhausted_quota_is_rate_limited() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/repos/octo/widgets/commits")
        .match_query(Matcher::Any)
        .with_status(403)
        .with_header("x-ratelimit-remaining", "0")
        .with_body("{\"message\":\"API rate limit exceeded\"}")
        .create_async()
        .await;

    let err = fetcher(&server, 100)
        .fetch_commits("octo/widgets", &DateRange::last_days(30), None)
        .await
        .unwrap_err();
    assert!(matches!(err, DataFetchError::RateLimited(_)));
}
