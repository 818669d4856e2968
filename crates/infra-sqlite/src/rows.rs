// Row structs and queries shared by repositories and their transactions

use crate::error::{from_json, from_json_opt, map_sqlx_error, to_json};
use jobstore_core::domain::{Chunk, ChunkKey, Item, Job, JobId};
use jobstore_core::error::Result;
use sqlx::{Executor, Sqlite, SqlitePool, Transaction};

/// Begin a unit of work holding the database write lock.
///
/// A deferred SQLite transaction that reads before it writes fails with
/// SQLITE_BUSY instead of waiting when another writer got in between, so the
/// lock is taken by a no-op write up front and busy_timeout applies.
pub(crate) async fn begin_write(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>> {
    let mut tx = pool.begin().await.map_err(map_sqlx_error)?;
    sqlx::query("UPDATE schema_version SET version = version WHERE 0")
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
    Ok(tx)
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct JobRow {
    id: i64,
    specification: String,
    state: String,
    flow_cache_id: Option<i64>,
    sink_cache_id: Option<i64>,
    number_of_chunks: i64,
    number_of_items: i64,
    fatal_error: bool,
    aborted: bool,
    diagnostics: String,
    time_of_creation: i64,
    time_of_last_modification: i64,
    time_of_completion: Option<i64>,
}

impl JobRow {
    pub(crate) fn into_job(self) -> Result<Job> {
        Ok(Job {
            id: self.id,
            specification: from_json("job.specification", &self.specification)?,
            state: from_json("job.state", &self.state)?,
            flow_cache_id: self.flow_cache_id,
            sink_cache_id: self.sink_cache_id,
            number_of_chunks: self.number_of_chunks as u32,
            number_of_items: self.number_of_items as u64,
            fatal_error: self.fatal_error,
            aborted: self.aborted,
            diagnostics: from_json("job.diagnostics", &self.diagnostics)?,
            time_of_creation: self.time_of_creation,
            time_of_last_modification: self.time_of_last_modification,
            time_of_completion: self.time_of_completion,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ChunkRow {
    job_id: i64,
    chunk_id: i64,
    data_file_id: String,
    number_of_items: i64,
    ordering_keys: String,
    state: String,
    time_of_creation: i64,
    time_of_completion: Option<i64>,
}

impl ChunkRow {
    pub(crate) fn into_chunk(self) -> Result<Chunk> {
        Ok(Chunk {
            job_id: self.job_id,
            chunk_id: self.chunk_id as u32,
            data_file_id: self.data_file_id,
            number_of_items: self.number_of_items as u32,
            keys: from_json("chunk.ordering_keys", &self.ordering_keys)?,
            state: from_json("chunk.state", &self.state)?,
            time_of_creation: self.time_of_creation,
            time_of_completion: self.time_of_completion,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ItemRow {
    job_id: i64,
    chunk_id: i64,
    item_id: i64,
    state: String,
    tracking_id: String,
    record_info: Option<String>,
    partitioning_outcome: Option<String>,
    processing_outcome: Option<String>,
    next_processing_outcome: Option<String>,
    delivering_outcome: Option<String>,
    time_of_creation: i64,
    time_of_completion: Option<i64>,
}

impl ItemRow {
    pub(crate) fn into_item(self) -> Result<Item> {
        Ok(Item {
            job_id: self.job_id,
            chunk_id: self.chunk_id as u32,
            id: self.item_id as u32,
            state: from_json("item.state", &self.state)?,
            tracking_id: self.tracking_id,
            record_info: from_json_opt("item.record_info", self.record_info.as_deref())?,
            partitioning_outcome: from_json_opt(
                "item.partitioning_outcome",
                self.partitioning_outcome.as_deref(),
            )?,
            processing_outcome: from_json_opt(
                "item.processing_outcome",
                self.processing_outcome.as_deref(),
            )?,
            next_processing_outcome: from_json_opt(
                "item.next_processing_outcome",
                self.next_processing_outcome.as_deref(),
            )?,
            delivering_outcome: from_json_opt(
                "item.delivering_outcome",
                self.delivering_outcome.as_deref(),
            )?,
            time_of_creation: self.time_of_creation,
            time_of_completion: self.time_of_completion,
        })
    }
}

fn opt_json<T: serde::Serialize>(value: Option<&T>) -> Result<Option<String>> {
    value.map(|v| to_json(v)).transpose()
}

pub(crate) async fn fetch_job<'e, E>(executor: E, id: JobId) -> Result<Option<Job>>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, JobRow>("SELECT * FROM job WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await
        .map_err(map_sqlx_error)?
        .map(JobRow::into_job)
        .transpose()
}

pub(crate) async fn fetch_chunk<'e, E>(executor: E, key: ChunkKey) -> Result<Option<Chunk>>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, ChunkRow>("SELECT * FROM chunk WHERE job_id = ? AND chunk_id = ?")
        .bind(key.job_id)
        .bind(i64::from(key.chunk_id))
        .fetch_optional(executor)
        .await
        .map_err(map_sqlx_error)?
        .map(ChunkRow::into_chunk)
        .transpose()
}

pub(crate) async fn fetch_items<'e, E>(executor: E, key: ChunkKey) -> Result<Vec<Item>>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, ItemRow>(
        "SELECT * FROM item WHERE job_id = ? AND chunk_id = ? ORDER BY item_id",
    )
    .bind(key.job_id)
    .bind(i64::from(key.chunk_id))
    .fetch_all(executor)
    .await
    .map_err(map_sqlx_error)?
    .into_iter()
    .map(ItemRow::into_item)
    .collect()
}

pub(crate) async fn write_job<'e, E>(executor: E, job: &Job) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        UPDATE job SET
            state = ?, flow_cache_id = ?, sink_cache_id = ?,
            number_of_chunks = ?, number_of_items = ?,
            fatal_error = ?, aborted = ?, diagnostics = ?,
            time_of_last_modification = ?, time_of_completion = ?
        WHERE id = ?
        "#,
    )
    .bind(to_json(&job.state)?)
    .bind(job.flow_cache_id)
    .bind(job.sink_cache_id)
    .bind(i64::from(job.number_of_chunks))
    .bind(job.number_of_items as i64)
    .bind(job.fatal_error)
    .bind(job.aborted)
    .bind(to_json(&job.diagnostics)?)
    .bind(job.time_of_last_modification)
    .bind(job.time_of_completion)
    .bind(job.id)
    .execute(executor)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

pub(crate) async fn insert_item<'e, E>(executor: E, item: &Item) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO item (
            job_id, chunk_id, item_id, state, tracking_id, record_info,
            partitioning_outcome, processing_outcome, next_processing_outcome, delivering_outcome,
            time_of_creation, time_of_completion
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(item.job_id)
    .bind(i64::from(item.chunk_id))
    .bind(i64::from(item.id))
    .bind(to_json(&item.state)?)
    .bind(&item.tracking_id)
    .bind(opt_json(item.record_info.as_ref())?)
    .bind(opt_json(item.partitioning_outcome.as_ref())?)
    .bind(opt_json(item.processing_outcome.as_ref())?)
    .bind(opt_json(item.next_processing_outcome.as_ref())?)
    .bind(opt_json(item.delivering_outcome.as_ref())?)
    .bind(item.time_of_creation)
    .bind(item.time_of_completion)
    .execute(executor)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

/// Outcomes and state only; identity, record info and creation time are immutable
pub(crate) async fn update_item<'e, E>(executor: E, item: &Item) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        UPDATE item SET
            state = ?, partitioning_outcome = ?, processing_outcome = ?,
            next_processing_outcome = ?, delivering_outcome = ?, time_of_completion = ?
        WHERE job_id = ? AND chunk_id = ? AND item_id = ?
        "#,
    )
    .bind(to_json(&item.state)?)
    .bind(opt_json(item.partitioning_outcome.as_ref())?)
    .bind(opt_json(item.processing_outcome.as_ref())?)
    .bind(opt_json(item.next_processing_outcome.as_ref())?)
    .bind(opt_json(item.delivering_outcome.as_ref())?)
    .bind(item.time_of_completion)
    .bind(item.job_id)
    .bind(i64::from(item.chunk_id))
    .bind(i64::from(item.id))
    .execute(executor)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}
