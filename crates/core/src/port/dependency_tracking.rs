// Dependency tracking store port

use crate::domain::{ChunkKey, ChunkSchedulingStatus, DependencyTracking, JobId, SinkId};
use crate::error::Result;
use crate::port::Transaction;
use async_trait::async_trait;
use std::collections::BTreeSet;

/// Number of rows of a sink in one status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCount {
    pub sink_id: SinkId,
    pub status: ChunkSchedulingStatus,
    pub count: i64,
}

#[async_trait]
pub trait DependencyTrackingRepository: Send + Sync {
    async fn begin_transaction(&self) -> Result<Box<dyn DependencyTrackingTransaction>>;

    async fn find(&self, key: ChunkKey) -> Result<Option<DependencyTracking>>;

    /// Rows of a sink in `status`, ordered by (job_id, chunk_id)
    async fn find_by_status(
        &self,
        sink_id: SinkId,
        status: ChunkSchedulingStatus,
        limit: usize,
    ) -> Result<Vec<DependencyTracking>>;

    /// Row counts grouped by sink and status
    async fn count_by_status(&self) -> Result<Vec<StatusCount>>;
}

/// Dependency row mutations; every lock taken is held until commit/rollback.
/// Callers lock a chunk's own row before its dependents' rows.
#[async_trait]
pub trait DependencyTrackingTransaction: Transaction {
    /// Insert a row; false if the chunk is already tracked
    async fn insert(&mut self, entity: &DependencyTracking) -> Result<bool>;

    /// Locked rows of the sink sharing at least one match key, except `exclude`
    async fn find_sharing_keys(
        &mut self,
        sink_id: SinkId,
        match_keys: &BTreeSet<String>,
        exclude: ChunkKey,
    ) -> Result<BTreeSet<ChunkKey>>;

    /// Locked rows of a job for a sink, except `exclude`
    async fn find_undelivered_of_job(
        &mut self,
        job_id: JobId,
        sink_id: SinkId,
        exclude: Option<ChunkKey>,
    ) -> Result<BTreeSet<ChunkKey>>;

    /// Lock a row and return it only if it currently has `expected` status
    async fn lock_in_status(
        &mut self,
        key: ChunkKey,
        expected: ChunkSchedulingStatus,
    ) -> Result<Option<DependencyTracking>>;

    async fn update(&mut self, entity: &DependencyTracking) -> Result<()>;

    async fn delete(&mut self, key: ChunkKey) -> Result<()>;

    /// Locked rows whose waiting_on contains `key`, ordered by (job_id, chunk_id)
    async fn find_waiting_on(&mut self, key: ChunkKey) -> Result<Vec<DependencyTracking>>;
}

pub mod mocks {
    use super::*;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Arc;
    use tokio::sync::{Mutex, OwnedMutexGuard};

    type Rows = BTreeMap<ChunkKey, DependencyTracking>;

    /// Dependency rows in memory; a transaction holds the store lock until it
    /// ends, like a single SQLite writer
    #[derive(Default)]
    pub struct InMemoryDependencyTracking {
        rows: Arc<Mutex<Rows>>,
    }

    impl InMemoryDependencyTracking {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn rows(&self) -> Vec<DependencyTracking> {
            self.rows.lock().await.values().cloned().collect()
        }
    }

    struct InMemoryTransaction {
        guard: OwnedMutexGuard<Rows>,
        staged: Rows,
    }

    #[async_trait]
    impl DependencyTrackingRepository for InMemoryDependencyTracking {
        async fn begin_transaction(&self) -> Result<Box<dyn DependencyTrackingTransaction>> {
            let guard = Arc::clone(&self.rows).lock_owned().await;
            let staged = guard.clone();
            Ok(Box::new(InMemoryTransaction { guard, staged }))
        }

        async fn find(&self, key: ChunkKey) -> Result<Option<DependencyTracking>> {
            Ok(self.rows.lock().await.get(&key).cloned())
        }

        async fn find_by_status(
            &self,
            sink_id: SinkId,
            status: ChunkSchedulingStatus,
            limit: usize,
        ) -> Result<Vec<DependencyTracking>> {
            Ok(self
                .rows
                .lock()
                .await
                .values()
                .filter(|r| r.sink_id == sink_id && r.status == status)
                .take(limit)
                .cloned()
                .collect())
        }

        async fn count_by_status(&self) -> Result<Vec<StatusCount>> {
            let mut counts: HashMap<(SinkId, ChunkSchedulingStatus), i64> = HashMap::new();
            for row in self.rows.lock().await.values() {
                *counts.entry((row.sink_id, row.status)).or_default() += 1;
            }
            Ok(counts
                .into_iter()
                .map(|((sink_id, status), count)| StatusCount {
                    sink_id,
                    status,
                    count,
                })
                .collect())
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
    impl DependencyTrackingTransaction for InMemoryTransaction {
        async fn insert(&mut self, entity: &DependencyTracking) -> Result<bool> {
            if self.staged.contains_key(&entity.key) {
                return Ok(false);
            }
            self.staged.insert(entity.key, entity.clone());
            Ok(true)
        }

        async fn find_sharing_keys(
            &mut self,
            sink_id: SinkId,
            match_keys: &BTreeSet<String>,
            exclude: ChunkKey,
        ) -> Result<BTreeSet<ChunkKey>> {
            Ok(self
                .staged
                .values()
                .filter(|r| r.sink_id == sink_id && r.key != exclude)
                .filter(|r| !r.match_keys.is_disjoint(match_keys))
                .map(|r| r.key)
                .collect())
        }

        async fn find_undelivered_of_job(
            &mut self,
            job_id: JobId,
            sink_id: SinkId,
            exclude: Option<ChunkKey>,
        ) -> Result<BTreeSet<ChunkKey>> {
            Ok(self
                .staged
                .values()
                .filter(|r| r.key.job_id == job_id && r.sink_id == sink_id)
                .filter(|r| Some(r.key) != exclude)
                .map(|r| r.key)
                .collect())
        }

        async fn lock_in_status(
            &mut self,
            key: ChunkKey,
            expected: ChunkSchedulingStatus,
        ) -> Result<Option<DependencyTracking>> {
            Ok(self
                .staged
                .get(&key)
                .filter(|r| r.status == expected)
                .cloned())
        }

        async fn update(&mut self, entity: &DependencyTracking) -> Result<()> {
            self.staged.insert(entity.key, entity.clone());
            Ok(())
        }

        async fn delete(&mut self, key: ChunkKey) -> Result<()> {
            self.staged.remove(&key);
            Ok(())
        }

        async fn find_waiting_on(&mut self, key: ChunkKey) -> Result<Vec<DependencyTracking>> {
            Ok(self
                .staged
                .values()
                .filter(|r| r.waiting_on.contains(&key))
                .cloned()
                .collect())
        }
    }
}
