mod helpers;

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use uuid::Uuid;

use commitscope::adapters::sqlite::{SqliteExportQueue, SqliteTaskStore};
use commitscope::domain::errors::{ProviderError, ProviderErrorKind};
use commitscope::domain::models::{
    AnalysisRequest, AnalysisResult, AnalysisTask, AnalysisType, AttemptOutcome, DateRange, ExportFormat,
    ExportOptions, FailureKind, GenerationParams, MetricValue, ProviderAttempt, ResultMetadata, TaskFailure,
    TaskStatus,
};
use commitscope::domain::ports::{ExportRenderQueue, TaskFilter, TaskStore};

use helpers::database::{setup_test_db, teardown_test_db};

fn create_test_task(user: &str) -> AnalysisTask {
    AnalysisTask::from_request(
        Uuid::new_v4(),
        AnalysisRequest {
            user_id: user.to_string(),
            repository: "octo/widgets".to_string(),
            developer_filter: Some("alice".to_string()),
            analysis_type: AnalysisType::Productivity,
            date_range: DateRange::last_days(14),
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            params: GenerationParams::default(),
            prompt_template: Some("Summarize {repository_name}".to_string()),
            export: Some(ExportOptions { format: ExportFormat::Pdf, include_charts: false, include_raw_data: true }),
        },
    )
}

fn create_test_result(task_id: Uuid) -> AnalysisResult {
    let mut metrics = BTreeMap::new();
    metrics.insert("productivity_score".to_string(), MetricValue::score(72.5));
    AnalysisResult {
        id: Uuid::new_v4(),
        task_id,
        narrative: "Steady output.".to_string(),
        key_insights: vec!["Small commits".to_string()],
        recommendations: vec!["Review more".to_string()],
        metrics,
        metadata: ResultMetadata { tokens_used: 150, commits_analyzed: 4, ..Default::default() },
        provider: "openai".to_string(),
        model: "gpt-4o-mini".to_string(),
        cost_usd: 0.0004,
        raw_output: "{}".to_string(),
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_create_and_get_round_trips_fields() {
    let pool = setup_test_db().await;
    let store = SqliteTaskStore::new(pool.clone());

    let task = create_test_task("alice");
    store.create(&task).await.expect("failed to insert task");

    let loaded = store.get(task.id).await.unwrap().expect("task should exist");
    assert_eq!(loaded.user_id, "alice");
    assert_eq!(loaded.status, TaskStatus::Pending);
    assert_eq!(loaded.analysis_type, AnalysisType::Productivity);
    assert_eq!(loaded.developer_filter.as_deref(), Some("alice"));
    assert_eq!(loaded.prompt_template, task.prompt_template);
    assert_eq!(loaded.export, task.export);
    assert_eq!(loaded.date_range.from.timestamp(), task.date_range.from.timestamp());
    assert_eq!(loaded.current_step, "Queued");

    assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    teardown_test_db(pool).await;
}

#[tokio::test]
async fn test_claim_is_exclusive() {
    let pool = setup_test_db().await;
    let store = SqliteTaskStore::new(pool.clone());
    let task = create_test_task("alice");
    store.create(&task).await.unwrap();

    assert!(store.claim(task.id, "w1").await.unwrap());
    assert!(!store.claim(task.id, "w2").await.unwrap());

    let loaded = store.get(task.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, TaskStatus::Running);
    assert_eq!(loaded.worker_id.as_deref(), Some("w1"));
    assert!(loaded.started_at.is_some());
    teardown_test_db(pool).await;
}

#[tokio::test]
async fn test_progress_is_monotonic() {
    let pool = setup_test_db().await;
    let store = SqliteTaskStore::new(pool.clone());
    let task = create_test_task("alice");
    store.create(&task).await.unwrap();

    // Not running yet.
    assert!(!store.update_progress(task.id, 10, "Fetching commits").await.unwrap());

    store.claim(task.id, "w1").await.unwrap();
    assert!(store.update_progress(task.id, 40, "Commits fetched").await.unwrap());
    store.update_progress(task.id, 10, "Fetching commits").await.unwrap();

    let loaded = store.get(task.id).await.unwrap().unwrap();
    assert_eq!(loaded.progress, 40);
    teardown_test_db(pool).await;
}

#[tokio::test]
async fn test_complete_with_result_is_atomic() {
    let pool = setup_test_db().await;
    let store = SqliteTaskStore::new(pool.clone());
    let task = create_test_task("alice");
    store.create(&task).await.unwrap();
    store.claim(task.id, "w1").await.unwrap();

    let result = create_test_result(task.id);
    assert!(store.complete_with_result(task.id, &result).await.unwrap());

    let loaded = store.get(task.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, TaskStatus::Completed);
    assert_eq!(loaded.progress, 100);
    assert!(loaded.completed_at.is_some());

    let stored = store.get_result(task.id).await.unwrap().expect("result stored");
    assert_eq!(stored.id, result.id);
    assert_eq!(stored.narrative, result.narrative);
    assert_eq!(stored.key_insights, result.key_insights);
    assert_eq!(stored.metrics, result.metrics);
    assert_eq!(stored.metadata, result.metadata);

    // A second completion is refused and does not touch the stored result.
    assert!(!store.complete_with_result(task.id, &create_test_result(task.id)).await.unwrap());
    assert_eq!(store.get_result(task.id).await.unwrap().unwrap().id, result.id);
    teardown_test_db(pool).await;
}

#[tokio::test]
async fn test_cancel_flag_blocks_completion() {
    let pool = setup_test_db().await;
    let store = SqliteTaskStore::new(pool.clone());
    let task = create_test_task("alice");
    store.create(&task).await.unwrap();

    assert!(!store.request_cancel(task.id).await.unwrap(), "only running tasks take the flag");
    store.claim(task.id, "w1").await.unwrap();
    assert!(store.request_cancel(task.id).await.unwrap());

    assert!(!store.complete_with_result(task.id, &create_test_result(task.id)).await.unwrap());
    assert!(store.get_result(task.id).await.unwrap().is_none());

    let loaded = store.get(task.id).await.unwrap().unwrap();
    assert!(loaded.cancel_requested);
    assert_eq!(loaded.status, TaskStatus::Running);
    teardown_test_db(pool).await;
}

#[tokio::test]
async fn test_terminal_states_are_sticky() {
    let pool = setup_test_db().await;
    let store = SqliteTaskStore::new(pool.clone());
    let task = create_test_task("alice");
    store.create(&task).await.unwrap();
    store.claim(task.id, "w1").await.unwrap();

    let failure = TaskFailure::new(FailureKind::DataFetch, "Repository not found: octo/widgets");
    assert!(store
        .transition(task.id, &[TaskStatus::Running], TaskStatus::Failed, Some(&failure))
        .await
        .unwrap());
    assert!(!store
        .transition(task.id, &[TaskStatus::Pending, TaskStatus::Running], TaskStatus::Cancelled, None)
        .await
        .unwrap());

    let loaded = store.get(task.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, TaskStatus::Failed);
    assert_eq!(loaded.error_kind, Some(FailureKind::DataFetch));
    assert_eq!(loaded.error_message.as_deref(), Some("Repository not found: octo/widgets"));
    assert!(loaded.completed_at.is_some());
    teardown_test_db(pool).await;
}

#[tokio::test]
async fn test_attempts_ordered_and_usage_accumulates() {
    let pool = setup_test_db().await;
    let store = SqliteTaskStore::new(pool.clone());
    let task = create_test_task("alice");
    store.create(&task).await.unwrap();

    let err = ProviderError::new(ProviderErrorKind::RateLimited, "slow down");
    let second = ProviderAttempt::success(task.id, "anthropic", "claude-3-haiku", 1, 800, 300, 0.002, Utc::now());
    let first = ProviderAttempt::failure(task.id, "openai", "gpt-4o-mini", 0, 120, &err, Utc::now());
    store.append_attempt(&second).await.unwrap();
    store.append_attempt(&first).await.unwrap();
    store.add_usage(task.id, 300, 0.002).await.unwrap();
    store.add_usage(task.id, 20, 0.0001).await.unwrap();

    let attempts = store.list_attempts(task.id).await.unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].attempt_index, 0);
    assert_eq!(attempts[0].outcome, AttemptOutcome::Failure);
    assert_eq!(attempts[0].error_kind, Some(ProviderErrorKind::RateLimited));
    assert_eq!(attempts[1].provider, "anthropic");
    assert_eq!(attempts[1].tokens_used, Some(300));

    let loaded = store.get(task.id).await.unwrap().unwrap();
    assert_eq!(loaded.tokens_used, 320);
    assert!((loaded.cost_usd - 0.0021).abs() < 1e-9);
    teardown_test_db(pool).await;
}

#[tokio::test]
async fn test_list_filters() {
    let pool = setup_test_db().await;
    let store = SqliteTaskStore::new(pool.clone());

    let mut old = create_test_task("alice");
    old.created_at = Utc::now() - Duration::days(10);
    let recent = create_test_task("alice");
    let other = create_test_task("bob");
    for task in [&old, &recent, &other] {
        store.create(task).await.unwrap();
    }
    store.claim(recent.id, "w1").await.unwrap();

    let alice = store.list(TaskFilter::for_user("alice")).await.unwrap();
    assert_eq!(alice.iter().map(|t| t.id).collect::<Vec<_>>(), vec![recent.id, old.id]);

    let mut oldest_first = TaskFilter::for_user("alice");
    oldest_first.oldest_first = true;
    assert_eq!(store.list(oldest_first).await.unwrap()[0].id, old.id);

    let running = store
        .list(TaskFilter::default().with_statuses(&[TaskStatus::Running]))
        .await
        .unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].id, recent.id);

    let this_week = store
        .list(TaskFilter::default().created_after(Utc::now() - Duration::days(7)))
        .await
        .unwrap();
    assert_eq!(this_week.len(), 2);

    assert_eq!(store.list(TaskFilter::default().limit(1)).await.unwrap().len(), 1);
    teardown_test_db(pool).await;
}

#[tokio::test]
async fn test_queue_ref_and_export_error() {
    let pool = setup_test_db().await;
    let store = SqliteTaskStore::new(pool.clone());
    let task = create_test_task("alice");
    store.create(&task).await.unwrap();

    store.set_queue_ref(task.id, "task-42").await.unwrap();
    store.set_export_error(task.id, Some("queue down")).await.unwrap();
    let loaded = store.get(task.id).await.unwrap().unwrap();
    assert_eq!(loaded.queue_ref.as_deref(), Some("task-42"));
    assert_eq!(loaded.export_error.as_deref(), Some("queue down"));

    store.set_export_error(task.id, None).await.unwrap();
    assert!(store.get(task.id).await.unwrap().unwrap().export_error.is_none());
    teardown_test_db(pool).await;
}

#[tokio::test]
async fn test_export_queue_persists_jobs() {
    let pool = setup_test_db().await;
    let store = SqliteTaskStore::new(pool.clone());
    let exports = SqliteExportQueue::new(pool.clone(), 7);

    let task = create_test_task("alice");
    store.create(&task).await.unwrap();
    store.claim(task.id, "w1").await.unwrap();
    let result = create_test_result(task.id);
    store.complete_with_result(task.id, &result).await.unwrap();

    let options = ExportOptions { format: ExportFormat::Excel, include_charts: true, include_raw_data: false };
    let job_ref = exports.enqueue(task.id, result.id, options).await.unwrap();
    assert!(job_ref.starts_with("export-"));

    let jobs = exports.list_for_task(task.id).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].result_id, result.id);
    assert_eq!(jobs[0].options, options);
    assert_eq!(jobs[0].expires_at - jobs[0].created_at, Duration::days(7));
    teardown_test_db(pool).await;
}
