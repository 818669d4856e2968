//! Scheduler - sends ready chunks to processors and sinks
//!
//! Every send re-validates the chunk's dependency row under the store lock
//! right before the message goes out. A chunk that lost the race (already
//! queued by another path) gives its slot back.

use crate::application::queue_status::{QueueStatusRegistry, Reservation};
use crate::domain::{
    ChunkItem, ChunkKey, ChunkMessage, Item, MessagePayload, OutboundMessage, Phase, QueuePhase,
    SinkId,
};
use crate::error::{AppError, Result};
use crate::port::{DependencyTrackingRepository, JobStoreRepository, MessageSender};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Sent,
    /// Row was gone or no longer in the ready status
    NotReady,
}

pub struct Scheduler {
    jobs: Arc<dyn JobStoreRepository>,
    tracking: Arc<dyn DependencyTrackingRepository>,
    sender: Arc<dyn MessageSender>,
    registry: Arc<QueueStatusRegistry>,
}

impl Scheduler {
    pub fn new(
        jobs: Arc<dyn JobStoreRepository>,
        tracking: Arc<dyn DependencyTrackingRepository>,
        sender: Arc<dyn MessageSender>,
        registry: Arc<QueueStatusRegistry>,
    ) -> Self {
        Self {
            jobs,
            tracking,
            sender,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<QueueStatusRegistry> {
        &self.registry
    }

    /// Direct-mode submission of a chunk that just became ready.
    /// Returns true if it was sent; otherwise it stays READY for the sweep.
    pub async fn offer(&self, key: ChunkKey, sink_id: SinkId, phase: QueuePhase) -> Result<bool> {
        match self.registry.try_reserve(sink_id, phase) {
            Reservation::Reserved => {
                Ok(self.submit(key, sink_id, phase).await? == SubmitOutcome::Sent)
            }
            Reservation::NotDirect => {
                debug!(job_id = key.job_id, chunk_id = key.chunk_id, sink_id, %phase, "Left for bulk sweep");
                Ok(false)
            }
            Reservation::AtCapacity => {
                info!(sink_id, %phase, capacity = self.registry.capacity(), mode = "BULK", "Queue at capacity, switching to bulk");
                Ok(false)
            }
        }
    }

    /// Send a chunk whose slot is already reserved.
    ///
    /// The reservation is kept only if the message was sent; a failed send
    /// also forces the entry into BULK.
    pub async fn submit(
        &self,
        key: ChunkKey,
        sink_id: SinkId,
        phase: QueuePhase,
    ) -> Result<SubmitOutcome> {
        let outcome = self.send_if_ready(key, phase).await;
        match &outcome {
            Ok(SubmitOutcome::Sent) => self.registry.ready_decr(sink_id, phase),
            Ok(SubmitOutcome::NotReady) => self.registry.release(sink_id, phase),
            Err(e) => {
                self.registry.release(sink_id, phase);
                if matches!(e, AppError::Messaging(_)) {
                    warn!(job_id = key.job_id, chunk_id = key.chunk_id, sink_id, %phase, error = %e, mode = "BULK", "Send failed, switching to bulk");
                    self.registry.force_bulk(sink_id, phase);
                }
            }
        }
        outcome
    }

    async fn send_if_ready(&self, key: ChunkKey, phase: QueuePhase) -> Result<SubmitOutcome> {
        // loaded before the row lock is taken
        let message = self.build_message(key, phase).await?;

        let mut tx = self.tracking.begin_transaction().await?;
        let Some(mut row) = tx.lock_in_status(key, phase.ready_status()).await? else {
            tx.rollback().await?;
            debug!(job_id = key.job_id, chunk_id = key.chunk_id, %phase, "Chunk no longer ready");
            return Ok(SubmitOutcome::NotReady);
        };

        if let Err(e) = self.sender.send(message).await {
            tx.rollback().await?;
            return Err(e.into());
        }
        row.transition(phase.queued_status())?;
        tx.update(&row).await?;
        tx.commit().await?;

        debug!(job_id = key.job_id, chunk_id = key.chunk_id, %phase, "Chunk sent");
        Ok(SubmitOutcome::Sent)
    }

    async fn build_message(&self, key: ChunkKey, phase: QueuePhase) -> Result<OutboundMessage> {
        let job = self
            .jobs
            .find_job(key.job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job {}", key.job_id)))?;
        if job.aborted {
            return Err(AppError::JobAborted(job.id));
        }
        let items = self.jobs.find_items(key).await?;

        let (destination, outcome_phase) = match phase {
            QueuePhase::Processing => (
                job.specification.processor_destination().to_string(),
                Phase::Partitioning,
            ),
            QueuePhase::Delivering => {
                let sink = self
                    .jobs
                    .find_cached_sink(key.job_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("Sink of job {}", key.job_id)))?;
                (sink.destination, Phase::Processing)
            }
        };

        let outcomes = items
            .iter()
            .map(|item| outcome_for_send(item, outcome_phase))
            .collect::<Result<Vec<_>>>()?;
        let next = if phase == QueuePhase::Delivering
            && items.iter().any(|i| i.next_processing_outcome.is_some())
        {
            Some(
                items
                    .iter()
                    .filter_map(|i| i.next_processing_outcome.clone())
                    .collect(),
            )
        } else {
            None
        };

        Ok(OutboundMessage {
            destination,
            priority: job.priority().value(),
            payload: MessagePayload::Chunk(ChunkMessage {
                job_id: key.job_id,
                chunk_id: key.chunk_id,
                phase,
                flow_cache_id: job.flow_cache_id,
                sink_cache_id: job.sink_cache_id,
                items: outcomes,
                next,
            }),
        })
    }
}

fn outcome_for_send(item: &Item, phase: Phase) -> Result<ChunkItem> {
    let mut outcome = item.outcome(phase).cloned().ok_or_else(|| {
        AppError::InvalidState(format!(
            "Item {}/{} has no {} outcome",
            item.key(),
            item.id,
            phase
        ))
    })?;
    if outcome.tracking_id.is_none() {
        outcome.tracking_id = Some(item.tracking_id.clone());
    }
    Ok(outcome)
}
