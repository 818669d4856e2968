// SQLite Job Store Transaction

use crate::error::{is_unique_violation, map_sqlx_error, to_json};
use crate::rows;
use async_trait::async_trait;
use jobstore_core::domain::{
    content_checksum, Chunk, ChunkKey, Flow, Item, Job, JobId, JobQueueEntry, Sink,
};
use jobstore_core::error::{AppError, Result};
use jobstore_core::port::{JobStoreTransaction, Transaction};
use serde::Serialize;
use sqlx::{Sqlite, Transaction as SqlxTransaction};

pub struct SqliteJobStoreTransaction<'a> {
    tx: SqlxTransaction<'a, Sqlite>,
}

impl<'a> SqliteJobStoreTransaction<'a> {
    pub fn new(tx: SqlxTransaction<'a, Sqlite>) -> Self {
        Self { tx }
    }

    async fn cache<T: Serialize + Sync>(&mut self, table: &str, value: &T) -> Result<i64> {
        let checksum = content_checksum(value)?;
        // the no-op update makes RETURNING yield the existing id on conflict
        let sql = format!(
            "INSERT INTO {} (checksum, content) VALUES (?, ?) \
             ON CONFLICT(checksum) DO UPDATE SET checksum = excluded.checksum RETURNING id",
            table
        );
        sqlx::query_scalar(&sql)
            .bind(checksum)
            .bind(to_json(value)?)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)
    }
}

#[async_trait]
impl Transaction for SqliteJobStoreTransaction<'_> {
    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl JobStoreTransaction for SqliteJobStoreTransaction<'_> {
    async fn cache_flow(&mut self, flow: &Flow) -> Result<i64> {
        self.cache("flow_cache", flow).await
    }

    async fn cache_sink(&mut self, sink: &Sink) -> Result<i64> {
        self.cache("sink_cache", sink).await
    }

    async fn insert_job(&mut self, job: &Job) -> Result<JobId> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO job (
                specification, state, flow_cache_id, sink_cache_id,
                number_of_chunks, number_of_items, fatal_error, aborted, diagnostics,
                time_of_creation, time_of_last_modification, time_of_completion
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(to_json(&job.specification)?)
        .bind(to_json(&job.state)?)
        .bind(job.flow_cache_id)
        .bind(job.sink_cache_id)
        .bind(i64::from(job.number_of_chunks))
        .bind(job.number_of_items as i64)
        .bind(job.fatal_error)
        .bind(job.aborted)
        .bind(to_json(&job.diagnostics)?)
        .bind(job.time_of_creation)
        .bind(job.time_of_last_modification)
        .bind(job.time_of_completion)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(id)
    }

    async fn lock_job(&mut self, id: JobId) -> Result<Option<Job>> {
        // the transaction already holds the write lock
        rows::fetch_job(&mut *self.tx, id).await
    }

    async fn update_job(&mut self, job: &Job) -> Result<()> {
        rows::write_job(&mut *self.tx, job).await
    }

    async fn insert_chunk(&mut self, chunk: &Chunk) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chunk (
                job_id, chunk_id, data_file_id, number_of_items, ordering_keys, state,
                time_of_creation, time_of_completion
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(chunk.job_id)
        .bind(i64::from(chunk.chunk_id))
        .bind(&chunk.data_file_id)
        .bind(i64::from(chunk.number_of_items))
        .bind(to_json(&chunk.keys)?)
        .bind(to_json(&chunk.state)?)
        .bind(chunk.time_of_creation)
        .bind(chunk.time_of_completion)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(format!("Chunk {} already exists", chunk.key()))
            } else {
                map_sqlx_error(e)
            }
        })?;
        Ok(())
    }

    async fn lock_chunk(&mut self, key: ChunkKey) -> Result<Option<Chunk>> {
        rows::fetch_chunk(&mut *self.tx, key).await
    }

    async fn update_chunk(&mut self, chunk: &Chunk) -> Result<()> {
        sqlx::query(
            "UPDATE chunk SET state = ?, time_of_completion = ? WHERE job_id = ? AND chunk_id = ?",
        )
        .bind(to_json(&chunk.state)?)
        .bind(chunk.time_of_completion)
        .bind(chunk.job_id)
        .bind(i64::from(chunk.chunk_id))
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn insert_item(&mut self, item: &Item) -> Result<()> {
        rows::insert_item(&mut *self.tx, item).await
    }

    async fn find_items(&mut self, key: ChunkKey) -> Result<Vec<Item>> {
        rows::fetch_items(&mut *self.tx, key).await
    }

    async fn update_item(&mut self, item: &Item) -> Result<()> {
        rows::update_item(&mut *self.tx, item).await
    }

    async fn enqueue_partitioning(&mut self, entry: &JobQueueEntry) -> Result<i64> {
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
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)
    }
}
