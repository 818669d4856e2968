// SQLite JobStoreRepository Implementation

use crate::error::{from_json, map_sqlx_error};
use crate::rows::{self, begin_write, ItemRow};
use crate::SqliteJobStoreTransaction;
use async_trait::async_trait;
use jobstore_core::domain::{Chunk, ChunkKey, Flow, Item, Job, JobId, Sink};
use jobstore_core::error::Result;
use jobstore_core::port::{JobStoreRepository, JobStoreTransaction};
use sqlx::SqlitePool;

pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn cached_content(&self, sql: &str, job_id: JobId) -> Result<Option<String>> {
        sqlx::query_scalar(sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }
}

#[async_trait]
impl JobStoreRepository for SqliteJobStore {
    async fn begin_transaction(&self) -> Result<Box<dyn JobStoreTransaction>> {
        let tx = begin_write(&self.pool).await?;
        Ok(Box::new(SqliteJobStoreTransaction::new(tx)))
    }

    async fn find_job(&self, id: JobId) -> Result<Option<Job>> {
        rows::fetch_job(&self.pool, id).await
    }

    async fn find_chunk(&self, key: ChunkKey) -> Result<Option<Chunk>> {
        rows::fetch_chunk(&self.pool, key).await
    }

    async fn find_items(&self, key: ChunkKey) -> Result<Vec<Item>> {
        rows::fetch_items(&self.pool, key).await
    }

    async fn find_job_items(&self, job_id: JobId) -> Result<Vec<Item>> {
        sqlx::query_as::<_, ItemRow>(
            "SELECT * FROM item WHERE job_id = ? ORDER BY chunk_id, item_id",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .into_iter()
        .map(ItemRow::into_item)
        .collect()
    }

    async fn find_cached_sink(&self, job_id: JobId) -> Result<Option<Sink>> {
        let content = self
            .cached_content(
                "SELECT s.content FROM sink_cache s JOIN job j ON j.sink_cache_id = s.id WHERE j.id = ?",
                job_id,
            )
            .await?;
        content.map(|c| from_json("sink_cache.content", &c)).transpose()
    }

    async fn find_cached_flow(&self, job_id: JobId) -> Result<Option<Flow>> {
        let content = self
            .cached_content(
                "SELECT f.content FROM flow_cache f JOIN job j ON j.flow_cache_id = f.id WHERE j.id = ?",
                job_id,
            )
            .await?;
        content.map(|c| from_json("flow_cache.content", &c)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use jobstore_core::domain::{
        ChunkItem, JobQueueEntry, JobSpecification, JobType, OrderingPolicy, PartitioningSource,
        Phase, Priority, RecordInfo, State,
    };
    use std::collections::BTreeSet;

    async fn setup() -> SqliteJobStore {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteJobStore::new(pool)
    }

    fn job() -> Job {
        Job::new(
            JobSpecification {
                packaging: "lin".to_string(),
                format: "marc2".to_string(),
                charset: "utf8".to_string(),
                destination: "broend".to_string(),
                submitter_id: 870970,
                data_file: "data.jsonl".to_string(),
                job_type: JobType::Transient,
                priority: Priority::High,
            },
            1_000,
        )
    }

    fn sink() -> Sink {
        Sink {
            id: 5,
            version: 1,
            name: "dummy".to_string(),
            destination: "sink::dummy".to_string(),
            ordering: OrderingPolicy::PerRecord,
            job_termination: false,
        }
    }

    #[tokio::test]
    async fn test_job_roundtrip_with_cached_sink() {
        let store = setup().await;
        let mut tx = store.begin_transaction().await.unwrap();
        let mut job = job();
        let first = tx.cache_sink(&sink()).await.unwrap();
        assert_eq!(tx.cache_sink(&sink()).await.unwrap(), first, "content addressed");
        job.sink_cache_id = Some(first);
        job.id = tx.insert_job(&job).await.unwrap();
        tx.commit().await.unwrap();

        let loaded = store.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(loaded, job);
        assert_eq!(store.find_cached_sink(job.id).await.unwrap(), Some(sink()));
        assert_eq!(store.find_cached_flow(job.id).await.unwrap(), None);
        assert!(store.find_job(job.id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_chunk_and_items_roundtrip() {
        let store = setup().await;
        let mut tx = store.begin_transaction().await.unwrap();
        let job_id = tx.insert_job(&job()).await.unwrap();

        let key = ChunkKey::new(job_id, 0);
        let chunk = Chunk {
            job_id,
            chunk_id: 0,
            data_file_id: "data.jsonl".to_string(),
            number_of_items: 2,
            keys: BTreeSet::from(["rec1".to_string()]),
            state: State::default(),
            time_of_creation: 1_000,
            time_of_completion: None,
        };
        tx.insert_chunk(&chunk).await.unwrap();
        let info = RecordInfo {
            id: "rec1".to_string(),
            parent_id: None,
            agency_id: Some(870970),
        };
        for id in [1u32, 0] {
            let item = Item::partitioned(
                key,
                ChunkItem::success(id, "data"),
                Some(info.clone()),
                format!("t-{}", id),
                1_000,
            );
            tx.insert_item(&item).await.unwrap();
        }
        tx.commit().await.unwrap();

        assert_eq!(store.find_chunk(key).await.unwrap(), Some(chunk.clone()));
        let items = store.find_items(key).await.unwrap();
        assert_eq!(items.iter().map(|i| i.id).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(items[0].record_info, Some(info));

        let mut tx = store.begin_transaction().await.unwrap();
        let mut item = tx.find_items(key).await.unwrap().remove(0);
        item.apply_outcome(Phase::Processing, ChunkItem::success(0, "p"), None, 2_000)
            .unwrap();
        tx.update_item(&item).await.unwrap();
        let err = tx.insert_chunk(&chunk).await.unwrap_err();
        assert!(matches!(err, jobstore_core::AppError::Conflict(_)));
        tx.commit().await.unwrap();

        let items = store.find_job_items(job_id).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[0].processing_outcome.as_ref().and_then(|o| o.tracking_id.as_deref()),
            Some("t-0")
        );
    }

    #[tokio::test]
    async fn test_rollback_discards_job() {
        let store = setup().await;
        let mut tx = store.begin_transaction().await.unwrap();
        let id = tx.insert_job(&job()).await.unwrap();
        tx.rollback().await.unwrap();
        assert!(store.find_job(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_enqueue_partitioning_in_same_unit_of_work() {
        let store = setup().await;
        let mut tx = store.begin_transaction().await.unwrap();
        let id = tx.insert_job(&job()).await.unwrap();
        let entry_id = tx
            .enqueue_partitioning(&JobQueueEntry::new(id, 5, PartitioningSource::DataFile, 1_000))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert!(entry_id > 0);

        let mut tx = store.begin_transaction().await.unwrap();
        let mut job = tx.lock_job(id).await.unwrap().unwrap();
        job.aborted = true;
        tx.update_job(&job).await.unwrap();
        tx.commit().await.unwrap();
        assert!(store.find_job(id).await.unwrap().unwrap().aborted);
    }
}
