//! SQLite implementation of the TaskStore.
//!
//! Status changes are single `UPDATE ... WHERE status IN (...)` statements,
//! so concurrent workers in separate processes race safely on one file.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{format_datetime, parse_datetime, parse_optional_datetime, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult, ProviderErrorKind};
use crate::domain::models::{
    AnalysisResult, AnalysisTask, AnalysisType, AttemptOutcome, DateRange, ExportOptions,
    FailureKind, GenerationParams, ProviderAttempt, TaskFailure, TaskStatus,
};
use crate::domain::ports::{TaskFilter, TaskStore};
use crate::services::state_machine::{terminal_step, COMPLETED_STEP};

#[derive(Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create(&self, task: &AnalysisTask) -> DomainResult<()> {
        let export_json = task.export.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"INSERT INTO analysis_tasks (id, user_id, repository, developer_filter, analysis_type,
               date_from, date_to, provider, model, temperature, max_tokens, prompt_template,
               export_options, status, progress, current_step, error_kind, error_message,
               cancel_requested, tokens_used, cost_usd, worker_id, queue_ref, export_error,
               created_at, started_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(task.id.to_string())
        .bind(&task.user_id)
        .bind(&task.repository)
        .bind(&task.developer_filter)
        .bind(task.analysis_type.as_str())
        .bind(format_datetime(&task.date_range.from))
        .bind(format_datetime(&task.date_range.to))
        .bind(&task.provider)
        .bind(&task.model)
        .bind(f64::from(task.params.temperature))
        .bind(i64::from(task.params.max_tokens))
        .bind(&task.prompt_template)
        .bind(export_json)
        .bind(task.status.as_str())
        .bind(i64::from(task.progress))
        .bind(&task.current_step)
        .bind(task.error_kind.map(|k| k.as_str()))
        .bind(&task.error_message)
        .bind(task.cancel_requested)
        .bind(task.tokens_used as i64)
        .bind(task.cost_usd)
        .bind(&task.worker_id)
        .bind(&task.queue_ref)
        .bind(&task.export_error)
        .bind(format_datetime(&task.created_at))
        .bind(task.started_at.as_ref().map(format_datetime))
        .bind(task.completed_at.as_ref().map(format_datetime))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<AnalysisTask>> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM analysis_tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(AnalysisTask::try_from).transpose()
    }

    async fn list(&self, filter: TaskFilter) -> DomainResult<Vec<AnalysisTask>> {
        let mut query = String::from("SELECT * FROM analysis_tasks WHERE 1=1");
        let mut bindings: Vec<String> = Vec::new();

        if let Some(user_id) = &filter.user_id {
            query.push_str(" AND user_id = ?");
            bindings.push(user_id.clone());
        }
        if !filter.statuses.is_empty() {
            query.push_str(&format!(" AND status IN ({})", placeholders(filter.statuses.len())));
            bindings.extend(filter.statuses.iter().map(|s| s.as_str().to_string()));
        }
        if let Some(after) = &filter.created_after {
            query.push_str(" AND created_at >= ?");
            bindings.push(format_datetime(after));
        }

        query.push_str(if filter.oldest_first { " ORDER BY created_at ASC" } else { " ORDER BY created_at DESC" });
        if let Some(limit) = filter.limit {
            query.push_str(&format!(" LIMIT {}", limit));
        }

        let mut q = sqlx::query_as::<_, TaskRow>(&query);
        for binding in &bindings {
            q = q.bind(binding);
        }

        let rows: Vec<TaskRow> = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(AnalysisTask::try_from).collect()
    }

    async fn claim(&self, id: Uuid, worker_id: &str) -> DomainResult<bool> {
        let result = sqlx::query(
            r#"UPDATE analysis_tasks
               SET status = 'running', worker_id = ?, started_at = ?, progress = 0, current_step = 'Starting'
               WHERE id = ? AND status = 'pending'"#,
        )
        .bind(worker_id)
        .bind(format_datetime(&Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_progress(&self, id: Uuid, progress: u8, step: &str) -> DomainResult<bool> {
        let result = sqlx::query(
            r#"UPDATE analysis_tasks SET progress = MAX(progress, ?), current_step = ?
               WHERE id = ? AND status = 'running'"#,
        )
        .bind(i64::from(progress.min(100)))
        .bind(step)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn request_cancel(&self, id: Uuid) -> DomainResult<bool> {
        let result = sqlx::query(
            "UPDATE analysis_tasks SET cancel_requested = 1 WHERE id = ? AND status = 'running'",
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[TaskStatus],
        to: TaskStatus,
        failure: Option<&TaskFailure>,
    ) -> DomainResult<bool> {
        let allowed: Vec<&str> = from
            .iter()
            .filter(|s| s.can_transition_to(to))
            .map(TaskStatus::as_str)
            .collect();
        if allowed.is_empty() {
            return Ok(false);
        }

        let query = format!(
            r#"UPDATE analysis_tasks
               SET status = ?, current_step = COALESCE(?, current_step),
                   completed_at = COALESCE(?, completed_at),
                   error_kind = COALESCE(?, error_kind), error_message = COALESCE(?, error_message)
               WHERE id = ? AND status IN ({})"#,
            placeholders(allowed.len())
        );

        let mut q = sqlx::query(&query)
            .bind(to.as_str())
            .bind(terminal_step(to))
            .bind(to.is_terminal().then(|| format_datetime(&Utc::now())))
            .bind(failure.map(|f| f.kind.as_str()))
            .bind(failure.map(|f| f.message.as_str()))
            .bind(id.to_string());
        for status in allowed {
            q = q.bind(status);
        }

        let result = q.execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete_with_result(&self, id: Uuid, result: &AnalysisResult) -> DomainResult<bool> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"UPDATE analysis_tasks
               SET status = 'completed', progress = 100, current_step = ?, completed_at = ?
               WHERE id = ? AND status = 'running' AND cancel_requested = 0"#,
        )
        .bind(COMPLETED_STEP)
        .bind(format_datetime(&Utc::now()))
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"INSERT INTO analysis_results (id, task_id, narrative, key_insights, recommendations,
               metrics, metadata, provider, model, cost_usd, raw_output, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(result.id.to_string())
        .bind(id.to_string())
        .bind(&result.narrative)
        .bind(serde_json::to_string(&result.key_insights)?)
        .bind(serde_json::to_string(&result.recommendations)?)
        .bind(serde_json::to_string(&result.metrics)?)
        .bind(serde_json::to_string(&result.metadata)?)
        .bind(&result.provider)
        .bind(&result.model)
        .bind(result.cost_usd)
        .bind(&result.raw_output)
        .bind(format_datetime(&result.created_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn append_attempt(&self, attempt: &ProviderAttempt) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO provider_attempts (id, task_id, provider, model, attempt_index, outcome,
               latency_ms, tokens_used, cost_usd, error_kind, error_message, started_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(attempt.id.to_string())
        .bind(attempt.task_id.to_string())
        .bind(&attempt.provider)
        .bind(&attempt.model)
        .bind(i64::from(attempt.attempt_index))
        .bind(attempt.outcome.as_str())
        .bind(attempt.latency_ms as i64)
        .bind(attempt.tokens_used.map(|t| t as i64))
        .bind(attempt.cost_usd)
        .bind(attempt.error_kind.map(|k| k.as_str()))
        .bind(&attempt.error_message)
        .bind(format_datetime(&attempt.started_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_attempts(&self, task_id: Uuid) -> DomainResult<Vec<ProviderAttempt>> {
        let rows: Vec<AttemptRow> =
            sqlx::query_as("SELECT * FROM provider_attempts WHERE task_id = ? ORDER BY attempt_index")
                .bind(task_id.to_string())
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(ProviderAttempt::try_from).collect()
    }

    async fn get_result(&self, task_id: Uuid) -> DomainResult<Option<AnalysisResult>> {
        let row: Option<ResultRow> = sqlx::query_as("SELECT * FROM analysis_results WHERE task_id = ?")
            .bind(task_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(AnalysisResult::try_from).transpose()
    }

    async fn set_queue_ref(&self, id: Uuid, queue_ref: &str) -> DomainResult<()> {
        let result = sqlx::query("UPDATE analysis_tasks SET queue_ref = ? WHERE id = ?")
            .bind(queue_ref)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::TaskNotFound(id));
        }
        Ok(())
    }

    async fn set_export_error(&self, id: Uuid, error: Option<&str>) -> DomainResult<()> {
        let result = sqlx::query("UPDATE analysis_tasks SET export_error = ? WHERE id = ?")
            .bind(error)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::TaskNotFound(id));
        }
        Ok(())
    }

    async fn add_usage(&self, id: Uuid, tokens: u64, cost_usd: f64) -> DomainResult<()> {
        let result = sqlx::query(
            "UPDATE analysis_tasks SET tokens_used = tokens_used + ?, cost_usd = cost_usd + ? WHERE id = ?",
        )
        .bind(tokens as i64)
        .bind(cost_usd)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::TaskNotFound(id));
        }
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    user_id: String,
    repository: String,
    developer_filter: Option<String>,
    analysis_type: String,
    date_from: String,
    date_to: String,
    provider: String,
    model: String,
    temperature: f64,
    max_tokens: i64,
    prompt_template: Option<String>,
    export_options: Option<String>,
    status: String,
    progress: i64,
    current_step: String,
    error_kind: Option<String>,
    error_message: Option<String>,
    cancel_requested: bool,
    tokens_used: i64,
    cost_usd: f64,
    worker_id: Option<String>,
    queue_ref: Option<String>,
    export_error: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl TryFrom<TaskRow> for AnalysisTask {
    type Error = DomainError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status = TaskStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid status: {}", row.status)))?;
        let analysis_type = AnalysisType::from_str(&row.analysis_type).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid analysis type: {}", row.analysis_type))
        })?;
        let error_kind = row
            .error_kind
            .map(|k| {
                FailureKind::from_str(&k)
                    .ok_or_else(|| DomainError::SerializationError(format!("Invalid failure kind: {}", k)))
            })
            .transpose()?;
        let export: Option<ExportOptions> =
            row.export_options.map(|s| serde_json::from_str(&s)).transpose()?;

        Ok(AnalysisTask {
            id: parse_uuid(&row.id)?,
            user_id: row.user_id,
            repository: row.repository,
            developer_filter: row.developer_filter,
            analysis_type,
            date_range: DateRange::new(parse_datetime(&row.date_from)?, parse_datetime(&row.date_to)?),
            provider: row.provider,
            model: row.model,
            params: GenerationParams { temperature: row.temperature as f32, max_tokens: row.max_tokens as u32 },
            prompt_template: row.prompt_template,
            export,
            status,
            progress: row.progress.clamp(0, 100) as u8,
            current_step: row.current_step,
            error_kind,
            error_message: row.error_message,
            cancel_requested: row.cancel_requested,
            tokens_used: row.tokens_used.max(0) as u64,
            cost_usd: row.cost_usd,
            worker_id: row.worker_id,
            queue_ref: row.queue_ref,
            export_error: row.export_error,
            created_at: parse_datetime(&row.created_at)?,
            started_at: parse_optional_datetime(row.started_at)?,
            completed_at: parse_optional_datetime(row.completed_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AttemptRow {
    id: String,
    task_id: String,
    provider: String,
    model: String,
    attempt_index: i64,
    outcome: String,
    latency_ms: i64,
    tokens_used: Option<i64>,
    cost_usd: f64,
    error_kind: Option<String>,
    error_message: Option<String>,
    started_at: String,
}

impl TryFrom<AttemptRow> for ProviderAttempt {
    type Error = DomainError;

    fn try_from(row: AttemptRow) -> Result<Self, Self::Error> {
        let outcome = AttemptOutcome::from_str(&row.outcome)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid outcome: {}", row.outcome)))?;

        Ok(ProviderAttempt {
            id: parse_uuid(&row.id)?,
            task_id: parse_uuid(&row.task_id)?,
            provider: row.provider,
            model: row.model,
            attempt_index: row.attempt_index as u32,
            outcome,
            latency_ms: row.latency_ms.max(0) as u64,
            tokens_used: row.tokens_used.map(|t| t.max(0) as u64),
            cost_usd: row.cost_usd,
            error_kind: row.error_kind.as_deref().and_then(ProviderErrorKind::from_str),
            error_message: row.error_message,
            started_at: parse_datetime(&row.started_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ResultRow {
    id: String,
    task_id: String,
    narrative: String,
    key_insights: String,
    recommendations: String,
    metrics: String,
    metadata: String,
    provider: String,
    model: String,
    cost_usd: f64,
    raw_output: String,
    created_at: String,
}

impl TryFrom<ResultRow> for AnalysisResult {
    type Error = DomainError;

    fn try_from(row: ResultRow) -> Result<Self, Self::Error> {
        Ok(AnalysisResult {
            id: parse_uuid(&row.id)?,
            task_id: parse_uuid(&row.task_id)?,
            narrative: row.narrative,
            key_insights: serde_json::from_str(&row.key_insights)?,
            recommendations: serde_json::from_str(&row.recommendations)?,
            metrics: serde_json::from_str(&row.metrics)?,
            metadata: serde_json::from_str(&row.metadata)?,
            provider: row.provider,
            model: row.model,
            cost_usd: row.cost_usd,
            raw_output: row.raw_output,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}
