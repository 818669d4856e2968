// Job / Chunk / Item store port

use crate::domain::{Chunk, ChunkKey, Flow, Item, Job, JobId, JobQueueEntry, Sink};
use crate::error::Result;
use crate::port::Transaction;
use async_trait::async_trait;

/// Read side of the job store + entry point for units of work
#[async_trait]
pub trait JobStoreRepository: Send + Sync {
    /// Begin a new unit of work
    async fn begin_transaction(&self) -> Result<Box<dyn JobStoreTransaction>>;

    async fn find_job(&self, id: JobId) -> Result<Option<Job>>;

    async fn find_chunk(&self, key: ChunkKey) -> Result<Option<Chunk>>;

    /// Items of a chunk ordered by item id
    async fn find_items(&self, key: ChunkKey) -> Result<Vec<Item>>;

    /// Every item of a job ordered by (chunk id, item id)
    async fn find_job_items(&self, job_id: JobId) -> Result<Vec<Item>>;

    /// Sink cached for the job
    async fn find_cached_sink(&self, job_id: JobId) -> Result<Option<Sink>>;

    /// Flow cached for the job
    async fn find_cached_flow(&self, job_id: JobId) -> Result<Option<Flow>>;
}

/// Job store operations within a transaction
#[async_trait]
pub trait JobStoreTransaction: Transaction {
    /// Cache a flow by content checksum, returning the cache id
    async fn cache_flow(&mut self, flow: &Flow) -> Result<i64>;

    /// Cache a sink by content checksum, returning the cache id
    async fn cache_sink(&mut self, sink: &Sink) -> Result<i64>;

    /// Insert a job, returning its assigned id
    async fn insert_job(&mut self, job: &Job) -> Result<JobId>;

    /// Load a job and hold its lock until the transaction ends
    async fn lock_job(&mut self, id: JobId) -> Result<Option<Job>>;

    async fn update_job(&mut self, job: &Job) -> Result<()>;

    async fn insert_chunk(&mut self, chunk: &Chunk) -> Result<()>;

    /// Load a chunk and hold its lock until the transaction ends
    async fn lock_chunk(&mut self, key: ChunkKey) -> Result<Option<Chunk>>;

    async fn update_chunk(&mut self, chunk: &Chunk) -> Result<()>;

    async fn insert_item(&mut self, item: &Item) -> Result<()>;

    /// Items of a chunk ordered by item id
    async fn find_items(&mut self, key: ChunkKey) -> Result<Vec<Item>>;

    async fn update_item(&mut self, item: &Item) -> Result<()>;

    /// Queue a job for partitioning in the same unit of work
    async fn enqueue_partitioning(&mut self, entry: &JobQueueEntry) -> Result<i64>;
}

pub mod mocks {
    use super::*;
    use crate::domain::content_checksum;
    use crate::error::AppError;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tokio::sync::{Mutex, OwnedMutexGuard};

    #[derive(Debug, Clone, Default)]
    struct Tables {
        flows: Vec<(String, Flow)>,
        sinks: Vec<(String, Sink)>,
        jobs: BTreeMap<JobId, Job>,
        chunks: BTreeMap<ChunkKey, Chunk>,
        items: BTreeMap<(ChunkKey, u32), Item>,
        queue: Vec<JobQueueEntry>,
    }

    /// Job store in memory; a transaction holds the store lock until it ends
    #[derive(Default)]
    pub struct InMemoryJobStore {
        tables: Arc<Mutex<Tables>>,
    }

    impl InMemoryJobStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Entries queued for partitioning
        pub async fn queued(&self) -> Vec<JobQueueEntry> {
            self.tables.lock().await.queue.clone()
        }
    }

    struct InMemoryTransaction {
        guard: OwnedMutexGuard<Tables>,
        staged: Tables,
    }

    fn cache<T: serde::Serialize + Clone>(rows: &mut Vec<(String, T)>, value: &T) -> Result<i64> {
        let checksum = content_checksum(value)?;
        let index = match rows.iter().position(|(c, _)| *c == checksum) {
            Some(index) => index,
            None => {
                rows.push((checksum, value.clone()));
                rows.len() - 1
            }
        };
        Ok(index as i64 + 1)
    }

    fn cached<T: Clone>(rows: &[(String, T)], id: Option<i64>) -> Option<T> {
        let index = usize::try_from(id? - 1).ok()?;
        rows.get(index).map(|(_, v)| v.clone())
    }

    fn items_of(tables: &Tables, key: ChunkKey) -> Vec<Item> {
        tables
            .items
            .range((key, 0)..=(key, u32::MAX))
            .map(|(_, item)| item.clone())
            .collect()
    }

    #[async_trait]
    impl JobStoreRepository for InMemoryJobStore {
        async fn begin_transaction(&self) -> Result<Box<dyn JobStoreTransaction>> {
            let guard = Arc::clone(&self.tables).lock_owned().await;
            let staged = guard.clone();
            Ok(Box::new(InMemoryTransaction { guard, staged }))
        }

        async fn find_job(&self, id: JobId) -> Result<Option<Job>> {
            Ok(self.tables.lock().await.jobs.get(&id).cloned())
        }

        async fn find_chunk(&self, key: ChunkKey) -> Result<Option<Chunk>> {
            Ok(self.tables.lock().await.chunks.get(&key).cloned())
        }

        async fn find_items(&self, key: ChunkKey) -> Result<Vec<Item>> {
            Ok(items_of(&*self.tables.lock().await, key))
        }

        async fn find_job_items(&self, job_id: JobId) -> Result<Vec<Item>> {
            Ok(self
                .tables
                .lock()
                .await
                .items
                .values()
                .filter(|item| item.job_id == job_id)
                .cloned()
                .collect())
        }

        async fn find_cached_sink(&self, job_id: JobId) -> Result<Option<Sink>> {
            let tables = self.tables.lock().await;
            let id = tables.jobs.get(&job_id).and_then(|j| j.sink_cache_id);
            Ok(cached(&tables.sinks, id))
        }

        async fn find_cached_flow(&self, job_id: JobId) -> Result<Option<Flow>> {
            let tables = self.tables.lock().await;
            let id = tables.jobs.get(&job_id).and_then(|j| j.flow_cache_id);
            Ok(cached(&tables.flows, id))
        }
    }

    #[async_trait]
    impl Transaction for InMemoryTransaction {
        async fn commit(self: Box<Self>) -> Result<()> {
            let InMemoryTransaction { mut guard, staged } = *self;
            *guard = staged;
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl JobStoreTransaction for InMemoryTransaction {
        async fn cache_flow(&mut self, flow: &Flow) -> Result<i64> {
            cache(&mut self.staged.flows, flow)
        }

        async fn cache_sink(&mut self, sink: &Sink) -> Result<i64> {
            cache(&mut self.staged.sinks, sink)
        }

        async fn insert_job(&mut self, job: &Job) -> Result<JobId> {
            let id = self.staged.jobs.keys().next_back().copied().unwrap_or(0) + 1;
            let mut job = job.clone();
            job.id = id;
            self.staged.jobs.insert(id, job);
            Ok(id)
        }

        async fn lock_job(&mut self, id: JobId) -> Result<Option<Job>> {
            Ok(self.staged.jobs.get(&id).cloned())
        }

        async fn update_job(&mut self, job: &Job) -> Result<()> {
            match self.staged.jobs.get_mut(&job.id) {
                Some(row) => {
                    *row = job.clone();
                    Ok(())
                }
                None => Err(AppError::NotFound(format!("Job {}", job.id))),
            }
        }

        async fn insert_chunk(&mut self, chunk: &Chunk) -> Result<()> {
            if self.staged.chunks.contains_key(&chunk.key()) {
                return Err(AppError::Conflict(format!("Chunk {} exists", chunk.key())));
            }
            self.staged.chunks.insert(chunk.key(), chunk.clone());
            Ok(())
        }

        async fn lock_chunk(&mut self, key: ChunkKey) -> Result<Option<Chunk>> {
            Ok(self.staged.chunks.get(&key).cloned())
        }

        async fn update_chunk(&mut self, chunk: &Chunk) -> Result<()> {
            self.staged.chunks.insert(chunk.key(), chunk.clone());
            Ok(())
        }

        async fn insert_item(&mut self, item: &Item) -> Result<()> {
            let key = (item.key(), item.id);
            if self.staged.items.contains_key(&key) {
                return Err(AppError::Conflict(format!(
                    "Item {}/{} exists",
                    item.key(),
                    item.id
                )));
            }
            self.staged.items.insert(key, item.clone());
            Ok(())
        }

        async fn find_items(&mut self, key: ChunkKey) -> Result<Vec<Item>> {
            Ok(items_of(&self.staged, key))
        }

        async fn update_item(&mut self, item: &Item) -> Result<()> {
            self.staged.items.insert((item.key(), item.id), item.clone());
            Ok(())
        }

        async fn enqueue_partitioning(&mut self, entry: &JobQueueEntry) -> Result<i64> {
            let mut entry = entry.clone();
            entry.id = self.staged.queue.len() as i64 + 1;
            self.staged.queue.push(entry);
            Ok(self.staged.queue.len() as i64)
        }
    }
}
