// Notification side-channel: completion records picked up by the mailer

use crate::error::{map_sqlx_error, to_json};
use async_trait::async_trait;
use jobstore_core::domain::{Job, JobId};
use jobstore_core::error::Result;
use jobstore_core::port::{JobNotifier, NotificationKind};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::info;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NotificationContent<'a> {
    job_id: JobId,
    data_file: &'a str,
    submitter_id: i64,
    number_of_items: u64,
    failed: u64,
    time_of_completion: Option<i64>,
}

pub struct SqliteNotificationStore {
    pool: SqlitePool,
}

impl SqliteNotificationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Stored notification kinds of a job, oldest first
    pub async fn kinds_of(&self, job_id: JobId) -> Result<Vec<String>> {
        sqlx::query_scalar("SELECT kind FROM notification WHERE job_id = ? ORDER BY id")
            .bind(job_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }
}

#[async_trait]
impl JobNotifier for SqliteNotificationStore {
    async fn job_completed(&self, job: &Job) -> Result<()> {
        let kind = NotificationKind::for_job(job);
        let state = &job.state;
        let content = NotificationContent {
            job_id: job.id,
            data_file: &job.specification.data_file,
            submitter_id: job.specification.submitter_id,
            number_of_items: job.number_of_items,
            failed: state.partitioning.failed + state.processing.failed + state.delivering.failed,
            time_of_completion: job.time_of_completion,
        };

        sqlx::query(
            "INSERT INTO notification (job_id, kind, content, time_of_creation) VALUES (?, ?, ?, ?)",
        )
        .bind(job.id)
        .bind(kind.as_str())
        .bind(to_json(&content)?)
        .bind(job.time_of_last_modification)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        info!(job_id = job.id, kind = kind.as_str(), "Notification stored");
        Ok(())
    }
}
