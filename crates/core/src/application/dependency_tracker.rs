//! Dependency Tracker - cross-chunk ordering per sink
//!
//! A chunk's row lists the earlier, not yet delivered chunks of the same sink
//! that share one of its ordering keys. The list is computed once, at
//! creation, and only shrinks as those chunks are delivered. Waiting holds
//! back delivery only; processing starts as soon as there is queue space.
//!
//! Sinks with job termination also order whole jobs of one submitter: the
//! termination row and the first chunk of every job carry the submitter's
//! barrier key, so a job's first chunk waits on the previous job's barrier.

use crate::application::queue_status::QueueStatusRegistry;
use crate::application::scheduler::Scheduler;
use crate::domain::{
    Chunk, ChunkKey, ChunkSchedulingStatus, DependencyTracking, JobId, Priority, QueuePhase, Sink,
    SinkId,
};
use crate::error::Result;
use crate::port::DependencyTrackingRepository;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct DependencyTracker {
    tracking: Arc<dyn DependencyTrackingRepository>,
    scheduler: Arc<Scheduler>,
    registry: Arc<QueueStatusRegistry>,
}

impl DependencyTracker {
    pub fn new(tracking: Arc<dyn DependencyTrackingRepository>, scheduler: Arc<Scheduler>) -> Self {
        let registry = Arc::clone(scheduler.registry());
        Self {
            tracking,
            scheduler,
            registry,
        }
    }

    /// Create the row of a freshly partitioned chunk. Returns false when the
    /// chunk was already tracked.
    pub async fn track_chunk(
        &self,
        chunk: &Chunk,
        sink: &Sink,
        priority: Priority,
        barrier: Option<&str>,
    ) -> Result<bool> {
        let key = chunk.key();
        let mut match_keys = chunk.keys.clone();
        if let Some(barrier) = barrier.filter(|_| key.chunk_id == 0) {
            match_keys.insert(barrier.to_string());
        }
        let mut row = DependencyTracking::new(key, sink.id, match_keys, priority);

        let mut tx = self.tracking.begin_transaction().await?;
        // inserting first takes the write lock before candidates are read
        if !tx.insert(&row).await? {
            tx.rollback().await?;
            debug!(job_id = key.job_id, chunk_id = key.chunk_id, "Chunk already tracked");
            return Ok(false);
        }
        if !row.match_keys.is_empty() {
            let waiting_on = tx.find_sharing_keys(sink.id, &row.match_keys, key).await?;
            row.set_waiting_on(waiting_on);
            tx.update(&row).await?;
        }
        tx.commit().await?;

        info!(
            job_id = key.job_id,
            chunk_id = key.chunk_id,
            sink_id = sink.id,
            status = %row.status,
            waiting_on = row.waiting_on.len(),
            "Chunk tracked"
        );
        if row.status == ChunkSchedulingStatus::ReadyToProcess {
            self.became_ready(key, sink.id, QueuePhase::Processing).await;
        }
        Ok(true)
    }

    /// Create the barrier row of a job's termination chunk: it waits on every
    /// chunk of the job still tracked for the sink.
    pub async fn track_job_termination(
        &self,
        chunk: &Chunk,
        sink: &Sink,
        priority: Priority,
        barrier: Option<&str>,
    ) -> Result<bool> {
        let key = chunk.key();
        let match_keys = barrier.map(str::to_string).into_iter().collect();
        let mut row = DependencyTracking::new_barrier(key, sink.id, match_keys, priority);

        let mut tx = self.tracking.begin_transaction().await?;
        if !tx.insert(&row).await? {
            tx.rollback().await?;
            return Ok(false);
        }
        let pending = tx.find_undelivered_of_job(key.job_id, sink.id, Some(key)).await?;
        row.set_waiting_on(pending);
        tx.update(&row).await?;
        tx.commit().await?;

        info!(
            job_id = key.job_id,
            chunk_id = key.chunk_id,
            sink_id = sink.id,
            status = %row.status,
            waiting_on = row.waiting_on.len(),
            "Job termination tracked"
        );
        if row.status == ChunkSchedulingStatus::ReadyToDeliver {
            self.became_ready(key, sink.id, QueuePhase::Delivering).await;
        }
        Ok(true)
    }

    /// Processing confirmed. Ignored unless the row is QUEUED_TO_PROCESS.
    pub async fn chunk_processing_done(&self, key: ChunkKey) -> Result<()> {
        let mut tx = self.tracking.begin_transaction().await?;
        let Some(mut row) = tx
            .lock_in_status(key, ChunkSchedulingStatus::QueuedToProcess)
            .await?
        else {
            tx.rollback().await?;
            debug!(job_id = key.job_id, chunk_id = key.chunk_id, "Processing done ignored");
            return Ok(());
        };
        let next = row.complete_processing()?;
        tx.update(&row).await?;
        tx.commit().await?;

        self.registry.release(row.sink_id, QueuePhase::Processing);
        debug!(job_id = key.job_id, chunk_id = key.chunk_id, status = %next, "Chunk processed");
        if next == ChunkSchedulingStatus::ReadyToDeliver {
            self.became_ready(key, row.sink_id, QueuePhase::Delivering)
                .await;
        }
        Ok(())
    }

    /// Delivery confirmed. Deletes the row and releases every chunk waiting
    /// on it in the same transaction. Ignored unless QUEUED_TO_DELIVERY.
    pub async fn chunk_delivering_done(&self, key: ChunkKey) -> Result<()> {
        let mut tx = self.tracking.begin_transaction().await?;
        let Some(row) = tx
            .lock_in_status(key, ChunkSchedulingStatus::QueuedToDelivery)
            .await?
        else {
            tx.rollback().await?;
            debug!(job_id = key.job_id, chunk_id = key.chunk_id, "Delivering done ignored");
            return Ok(());
        };
        tx.delete(key).await?;

        let mut promoted = Vec::new();
        for mut dependent in tx.find_waiting_on(key).await? {
            if let Some(status) = dependent.release(&key) {
                promoted.push((dependent.key, dependent.sink_id, status));
            }
            tx.update(&dependent).await?;
        }
        tx.commit().await?;

        self.registry.release(row.sink_id, QueuePhase::Delivering);
        info!(
            job_id = key.job_id,
            chunk_id = key.chunk_id,
            sink_id = row.sink_id,
            released = promoted.len(),
            "Chunk delivered"
        );

        promoted.sort_by_key(|(k, _, _)| *k);
        for (dependent, sink_id, status) in promoted {
            if let Some(phase) = QueuePhase::of_status(status) {
                self.became_ready(dependent, sink_id, phase).await;
            }
        }
        Ok(())
    }

    /// Drop the rows of an aborted job that are not in flight and release the
    /// chunks waiting on them. Queued rows finish through their callbacks.
    pub async fn release_job(&self, job_id: JobId, sink_id: SinkId) -> Result<usize> {
        let mut tx = self.tracking.begin_transaction().await?;
        let keys = tx.find_undelivered_of_job(job_id, sink_id, None).await?;

        let mut removed = Vec::new();
        let mut promoted = Vec::new();
        for key in keys {
            for status in [
                ChunkSchedulingStatus::ReadyToProcess,
                ChunkSchedulingStatus::Blocked,
                ChunkSchedulingStatus::ReadyToDeliver,
            ] {
                if tx.lock_in_status(key, status).await?.is_some() {
                    tx.delete(key).await?;
                    removed.push((key, status));
                    break;
                }
            }
        }
        for (key, _) in &removed {
            for mut dependent in tx.find_waiting_on(*key).await? {
                if let Some(status) = dependent.release(key) {
                    promoted.push((dependent.key, dependent.sink_id, status));
                }
                tx.update(&dependent).await?;
            }
        }
        tx.commit().await?;

        for (_, status) in &removed {
            if let Some(phase) = QueuePhase::of_status(*status) {
                self.registry.ready_decr(sink_id, phase);
            }
        }
        info!(job_id, sink_id, removed = removed.len(), "Released rows of aborted job");

        promoted.sort_by_key(|(k, _, _)| *k);
        for (dependent, sink_id, status) in promoted {
            if let Some(phase) = QueuePhase::of_status(status) {
                self.became_ready(dependent, sink_id, phase).await;
            }
        }
        Ok(removed.len())
    }

    /// Keys a chunk is still waiting on (empty if untracked)
    pub async fn waiting_on(&self, key: ChunkKey) -> Result<BTreeSet<ChunkKey>> {
        Ok(self
            .tracking
            .find(key)
            .await?
            .map(|row| row.waiting_on)
            .unwrap_or_default())
    }

    async fn became_ready(&self, key: ChunkKey, sink_id: SinkId, phase: QueuePhase) {
        self.registry.ready_incr(sink_id, phase);
        // a failed send leaves the chunk READY for the bulk sweep
        if let Err(e) = self.scheduler.offer(key, sink_id, phase).await {
            warn!(job_id = key.job_id, chunk_id = key.chunk_id, sink_id, %phase, error = %e, "Direct submit failed");
        }
    }
}
