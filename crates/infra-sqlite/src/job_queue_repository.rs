// SQLite partitioning gate and rerun FIFO

use crate::error::{from_json, is_unique_violation, map_sqlx_error, to_json};
use async_trait::async_trait;
use jobstore_core::domain::{JobQueueEntry, RerunEntry};
use jobstore_core::error::Result;
use jobstore_core::port::{JobQueueRepository, RerunRepository};
use sqlx::SqlitePool;
use tracing::debug;

#[derive(Debug, sqlx::FromRow)]
struct JobQueueRow {
    id: i64,
    job_id: i64,
    sink_id: i64,
    state: String,
    source: String,
    time_of_entry: i64,
}

impl JobQueueRow {
    fn into_entry(self) -> Result<JobQueueEntry> {
        Ok(JobQueueEntry {
            id: self.id,
            job_id: self.job_id,
            sink_id: self.sink_id,
            state: self.state.parse()?,
            source: from_json("job_queue.source", &self.source)?,
            time_of_entry: self.time_of_entry,
        })
    }
}

pub struct SqliteJobQueue {
    pool: SqlitePool,
}

impl SqliteJobQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobQueueRepository for SqliteJobQueue {
    async fn enqueue(&self, entry: &JobQueueEntry) -> Result<i64> {
        sqlx::query_scalar(
            r#"
            INSERT INTO job_queue (job_id, sink_id, state, source, time_of_entry)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(entry.job_id)
        .bind(entry.sink_id)
        .bind(entry.state.as_str())
        .bind(to_json(&entry.source)?)
        .bind(entry.time_of_entry)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }

    async fn find_active(&self) -> Result<Vec<JobQueueEntry>> {
        sqlx::query_as::<_, JobQueueRow>("SELECT * FROM job_queue ORDER BY time_of_entry, id")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .into_iter()
            .map(JobQueueRow::into_entry)
            .collect()
    }

    async fn start(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE job_queue SET state = 'IN_PROGRESS'
            WHERE id = ? AND state = 'WAITING'
              AND NOT EXISTS (
                  SELECT 1 FROM job_queue q
                  WHERE q.sink_id = job_queue.sink_id AND q.state = 'IN_PROGRESS'
              )
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.rows_affected() == 1),
            // the partial unique index caught a concurrent start for the same sink
            Err(e) if is_unique_violation(&e) => {
                debug!(entry_id = id, "Sink already partitioning");
                Ok(false)
            }
            Err(e) => Err(map_sqlx_error(e)),
        }
    }

    async fn reset(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE job_queue SET state = 'WAITING' WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn remove(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM job_queue WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn reset_in_progress(&self) -> Result<u64> {
        let result =
            sqlx::query("UPDATE job_queue SET state = 'WAITING' WHERE state = 'IN_PROGRESS'")
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RerunRow {
    id: i64,
    job_id: i64,
    failed_only: bool,
    state: String,
    retry_at: i64,
    time_of_creation: i64,
}

impl RerunRow {
    fn into_entry(self) -> Result<RerunEntry> {
        Ok(RerunEntry {
            id: self.id,
            job_id: self.job_id,
            failed_only: self.failed_only,
            state: self.state.parse()?,
            retry_at: self.retry_at,
            time_of_creation: self.time_of_creation,
        })
    }
}

pub struct SqliteRerunQueue {
    pool: SqlitePool,
}

impl SqliteRerunQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RerunRepository for SqliteRerunQueue {
    async fn enqueue(&self, entry: &RerunEntry) -> Result<RerunEntry> {
        sqlx::query_as::<_, RerunRow>(
            r#"
            INSERT INTO rerun (job_id, failed_only, state, retry_at, time_of_creation)
            VALUES (?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(entry.job_id)
        .bind(entry.failed_only)
        .bind(entry.state.as_str())
        .bind(entry.retry_at)
        .bind(entry.time_of_creation)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .into_entry()
    }

    async fn claim_next(&self, now: i64) -> Result<Option<RerunEntry>> {
        // one statement, so the in-progress check and the claim are atomic
        sqlx::query_as::<_, RerunRow>(
            r#"
            UPDATE rerun SET state = 'IN_PROGRESS'
            WHERE id = (
                SELECT id FROM rerun
                WHERE state = 'WAITING' AND retry_at <= ?
                ORDER BY id
                LIMIT 1
            )
            AND NOT EXISTS (SELECT 1 FROM rerun WHERE state = 'IN_PROGRESS')
            RETURNING *
            "#,
        )
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .map(RerunRow::into_entry)
        .transpose()
    }

    async fn retry_later(&self, id: i64, retry_at: i64) -> Result<()> {
        sqlx::query("UPDATE rerun SET state = 'WAITING', retry_at = ? WHERE id = ?")
            .bind(retry_at)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn remove(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM rerun WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn reset_in_progress(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE rerun SET state = 'WAITING' WHERE state = 'IN_PROGRESS'")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }
}
