// SQLite dependency tracking: scheduling rows with JSON key sets

use crate::error::{from_json, map_sqlx_error, to_json};
use crate::rows::begin_write;
use async_trait::async_trait;
use jobstore_core::domain::{
    ChunkKey, ChunkSchedulingStatus, DependencyTracking, JobId, Priority, SinkId,
};
use jobstore_core::error::Result;
use jobstore_core::port::{
    DependencyTrackingRepository, DependencyTrackingTransaction, StatusCount, Transaction,
};
use sqlx::{Sqlite, SqlitePool, Transaction as SqlxTransaction};
use std::collections::BTreeSet;

#[derive(Debug, sqlx::FromRow)]
struct DependencyRow {
    job_id: i64,
    chunk_id: i64,
    sink_id: i64,
    status: String,
    match_keys: String,
    waiting_on: String,
    priority: i64,
}

impl DependencyRow {
    fn into_entity(self) -> Result<DependencyTracking> {
        Ok(DependencyTracking {
            key: ChunkKey::new(self.job_id, self.chunk_id as u32),
            sink_id: self.sink_id,
            status: self.status.parse()?,
            match_keys: from_json("dependency_tracking.match_keys", &self.match_keys)?,
            waiting_on: from_json("dependency_tracking.waiting_on", &self.waiting_on)?,
            priority: Priority::from_value(self.priority as i32),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct KeyRow {
    job_id: i64,
    chunk_id: i64,
}

fn into_entities(rows: Vec<DependencyRow>) -> Result<Vec<DependencyTracking>> {
    rows.into_iter().map(DependencyRow::into_entity).collect()
}

fn into_keys(rows: Vec<KeyRow>) -> BTreeSet<ChunkKey> {
    rows.into_iter()
        .map(|r| ChunkKey::new(r.job_id, r.chunk_id as u32))
        .collect()
}

pub struct SqliteDependencyTracking {
    pool: SqlitePool,
}

impl SqliteDependencyTracking {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DependencyTrackingRepository for SqliteDependencyTracking {
    async fn begin_transaction(&self) -> Result<Box<dyn DependencyTrackingTransaction>> {
        let tx = begin_write(&self.pool).await?;
        Ok(Box::new(SqliteDependencyTrackingTransaction { tx }))
    }

    async fn find(&self, key: ChunkKey) -> Result<Option<DependencyTracking>> {
        sqlx::query_as::<_, DependencyRow>(
            "SELECT * FROM dependency_tracking WHERE job_id = ? AND chunk_id = ?",
        )
        .bind(key.job_id)
        .bind(i64::from(key.chunk_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .map(DependencyRow::into_entity)
        .transpose()
    }

    async fn find_by_status(
        &self,
        sink_id: SinkId,
        status: ChunkSchedulingStatus,
        limit: usize,
    ) -> Result<Vec<DependencyTracking>> {
        let rows = sqlx::query_as::<_, DependencyRow>(
            r#"
            SELECT * FROM dependency_tracking
            WHERE sink_id = ? AND status = ?
            ORDER BY job_id, chunk_id
            LIMIT ?
            "#,
        )
        .bind(sink_id)
        .bind(status.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        into_entities(rows)
    }

    async fn count_by_status(&self) -> Result<Vec<StatusCount>> {
        let rows: Vec<(i64, String, i64)> = sqlx::query_as(
            r#"
            SELECT sink_id, status, COUNT(*) FROM dependency_tracking
            GROUP BY sink_id, status
            ORDER BY sink_id, status
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|(sink_id, status, count)| -> Result<StatusCount> {
                Ok(StatusCount {
                    sink_id,
                    status: status.parse()?,
                    count,
                })
            })
            .collect()
    }
}

pub struct SqliteDependencyTrackingTransaction<'a> {
    tx: SqlxTransaction<'a, Sqlite>,
}

#[async_trait]
impl Transaction for SqliteDependencyTrackingTransaction<'_> {
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
impl DependencyTrackingTransaction for SqliteDependencyTrackingTransaction<'_> {
    async fn insert(&mut self, entity: &DependencyTracking) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO dependency_tracking (
                job_id, chunk_id, sink_id, status, match_keys, waiting_on, priority
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id, chunk_id) DO NOTHING
            "#,
        )
        .bind(entity.key.job_id)
        .bind(i64::from(entity.key.chunk_id))
        .bind(entity.sink_id)
        .bind(entity.status.as_str())
        .bind(to_json(&entity.match_keys)?)
        .bind(to_json(&entity.waiting_on)?)
        .bind(i64::from(entity.priority.value()))
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_sharing_keys(
        &mut self,
        sink_id: SinkId,
        match_keys: &BTreeSet<String>,
        exclude: ChunkKey,
    ) -> Result<BTreeSet<ChunkKey>> {
        let rows = sqlx::query_as::<_, KeyRow>(
            r#"
            SELECT d.job_id, d.chunk_id FROM dependency_tracking d
            WHERE d.sink_id = ?
              AND NOT (d.job_id = ? AND d.chunk_id = ?)
              AND EXISTS (
                  SELECT 1 FROM json_each(d.match_keys) m
                  WHERE m.value IN (SELECT value FROM json_each(?))
              )
            "#,
        )
        .bind(sink_id)
        .bind(exclude.job_id)
        .bind(i64::from(exclude.chunk_id))
        .bind(to_json(match_keys)?)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(into_keys(rows))
    }

    async fn find_undelivered_of_job(
        &mut self,
        job_id: JobId,
        sink_id: SinkId,
        exclude: Option<ChunkKey>,
    ) -> Result<BTreeSet<ChunkKey>> {
        let rows = sqlx::query_as::<_, KeyRow>(
            "SELECT job_id, chunk_id FROM dependency_tracking WHERE job_id = ? AND sink_id = ?",
        )
        .bind(job_id)
        .bind(sink_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        let mut keys = into_keys(rows);
        if let Some(exclude) = exclude {
            keys.remove(&exclude);
        }
        Ok(keys)
    }

    async fn lock_in_status(
        &mut self,
        key: ChunkKey,
        expected: ChunkSchedulingStatus,
    ) -> Result<Option<DependencyTracking>> {
        sqlx::query_as::<_, DependencyRow>(
            "SELECT * FROM dependency_tracking WHERE job_id = ? AND chunk_id = ? AND status = ?",
        )
        .bind(key.job_id)
        .bind(i64::from(key.chunk_id))
        .bind(expected.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?
        .map(DependencyRow::into_entity)
        .transpose()
    }

    async fn update(&mut self, entity: &DependencyTracking) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE dependency_tracking
            SET status = ?, match_keys = ?, waiting_on = ?, priority = ?
            WHERE job_id = ? AND chunk_id = ?
            "#,
        )
        .bind(entity.status.as_str())
        .bind(to_json(&entity.match_keys)?)
        .bind(to_json(&entity.waiting_on)?)
        .bind(i64::from(entity.priority.value()))
        .bind(entity.key.job_id)
        .bind(i64::from(entity.key.chunk_id))
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn delete(&mut self, key: ChunkKey) -> Result<()> {
        sqlx::query("DELETE FROM dependency_tracking WHERE job_id = ? AND chunk_id = ?")
            .bind(key.job_id)
            .bind(i64::from(key.chunk_id))
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn find_waiting_on(&mut self, key: ChunkKey) -> Result<Vec<DependencyTracking>> {
        let rows = sqlx::query_as::<_, DependencyRow>(
            r#"
            SELECT * FROM dependency_tracking d
            WHERE EXISTS (
                SELECT 1 FROM json_each(d.waiting_on) w
                WHERE json_extract(w.value, '$.jobId') = ?
                  AND json_extract(w.value, '$.chunkId') = ?
            )
            ORDER BY d.job_id, d.chunk_id
            "#,
        )
        .bind(key.job_id)
        .bind(i64::from(key.chunk_id))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        into_entities(rows)
    }
}
