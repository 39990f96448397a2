//! Export render queue stored in the `export_jobs` table.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{format_datetime, parse_datetime, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ExportFormat, ExportJob, ExportJobStatus, ExportOptions};
use crate::domain::ports::ExportRenderQueue;

#[derive(Clone)]
pub struct SqliteExportQueue {
    pool: SqlitePool,
    retention_days: i64,
}

impl SqliteExportQueue {
    pub fn new(pool: SqlitePool, retention_days: i64) -> Self {
        Self { pool, retention_days }
    }
}

#[async_trait]
impl ExportRenderQueue for SqliteExportQueue {
    async fn enqueue(&self, task_id: Uuid, result_id: Uuid, options: ExportOptions) -> DomainResult<String> {
        let job = ExportJob::new(task_id, result_id, options, self.retention_days);

        sqlx::query(
            r#"INSERT INTO export_jobs (id, task_id, result_id, format, include_charts,
               include_raw_data, status, created_at, expires_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(job.id.to_string())
        .bind(task_id.to_string())
        .bind(result_id.to_string())
        .bind(options.format.as_str())
        .bind(options.include_charts)
        .bind(options.include_raw_data)
        .bind(job.status.as_str())
        .bind(format_datetime(&job.created_at))
        .bind(format_datetime(&job.expires_at))
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::QueueError(e.to_string()))?;

        Ok(format!("export-{}", job.id))
    }

    async fn list_for_task(&self, task_id: Uuid) -> DomainResult<Vec<ExportJob>> {
        let rows: Vec<ExportJobRow> =
            sqlx::query_as("SELECT * FROM export_jobs WHERE task_id = ? ORDER BY created_at DESC")
                .bind(task_id.to_string())
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(ExportJob::try_from).collect()
    }
}

#[derive(sqlx::FromRow)]
struct ExportJobRow {
    id: String,
    task_id: String,
    result_id: String,
    format: String,
    include_charts: bool,
    include_raw_data: bool,
    status: String,
    created_at: String,
    expires_at: String,
}

impl TryFrom<ExportJobRow> for ExportJob {
    type Error = DomainError;

    fn try_from(row: ExportJobRow) -> Result<Self, Self::Error> {
        let format = ExportFormat::from_str(&row.format)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid export format: {}", row.format)))?;
        let status = ExportJobStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid export status: {}", row.status)))?;

        Ok(ExportJob {
            id: parse_uuid(&row.id)?,
            result_id: parse_uuid(&row.result_id)?,
            task_id: parse_uuid(&row.task_id)?,
            options: ExportOptions {
                format,
                include_charts: row.include_charts,
                include_raw_data: row.include_raw_data,
            },
            status,
            created_at: parse_datetime(&row.created_at)?,
            expires_at: parse_datetime(&row.expires_at)?,
        })
    }
}
