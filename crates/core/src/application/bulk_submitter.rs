//! Bulk Submitter - periodic sweeps for entries that are not DIRECT
//!
//! One tick visits every (sink, phase) entry. A sweep still running from the
//! previous tick is left alone; a finished one is harvested without blocking
//! and its result drives the BULK / TRANSITION_TO_DIRECT / DIRECT hysteresis.

use crate::application::config::SchedulerConfig;
use crate::application::queue_status::{QueueStatusRegistry, SubmitMode, SweepResult};
use crate::application::scheduler::{Scheduler, SubmitOutcome};
use crate::application::worker::{run_periodic, ShutdownToken, SweepPool};
use crate::domain::{QueuePhase, SinkId};
use crate::error::{AppError, Result};
use crate::port::DependencyTrackingRepository;
use futures::FutureExt;
use std::sync::{Arc, PoisonError};
use tracing::{debug, error, info, warn};

pub struct BulkSubmitter {
    tracking: Arc<dyn DependencyTrackingRepository>,
    scheduler: Arc<Scheduler>,
    registry: Arc<QueueStatusRegistry>,
    pool: SweepPool,
    config: SchedulerConfig,
}

impl BulkSubmitter {
    pub fn new(
        tracking: Arc<dyn DependencyTrackingRepository>,
        scheduler: Arc<Scheduler>,
        config: SchedulerConfig,
    ) -> Self {
        let registry = Arc::clone(scheduler.registry());
        Self {
            tracking,
            scheduler,
            registry,
            pool: SweepPool::new(config.sweep_pool_size),
            config,
        }
    }

    pub async fn run(self: Arc<Self>, shutdown: ShutdownToken) {
        let period = self.config.bulk_tick();
        run_periodic("bulk_submitter", period, shutdown, move || {
            let this = Arc::clone(&self);
            async move {
                this.tick();
                Ok(())
            }
        })
        .await;
    }

    /// Visit every entry once
    pub fn tick(&self) {
        for (sink_id, phase) in self.registry.keys() {
            self.tick_entry(sink_id, phase);
        }
    }

    fn tick_entry(&self, sink_id: SinkId, phase: QueuePhase) {
        let entry = self.registry.entry(sink_id, phase);
        let mut status = entry.lock().unwrap_or_else(PoisonError::into_inner);
        if status.mode == SubmitMode::Direct {
            return;
        }

        let harvested = match status.pending_sweep.as_mut() {
            None => None,
            Some(handle) => match handle.now_or_never() {
                None => {
                    debug!(sink_id, %phase, "Previous sweep still running");
                    return;
                }
                Some(Ok(Ok(pushed))) => Some(SweepResult::Pushed(pushed)),
                Some(Ok(Err(e))) => {
                    warn!(sink_id, %phase, error = %e, "Sweep failed");
                    Some(SweepResult::Failed)
                }
                Some(Err(e)) => {
                    error!(sink_id, %phase, error = %e, "Sweep task died");
                    Some(SweepResult::Failed)
                }
            },
        };
        if harvested.is_some() {
            status.pending_sweep = None;
        }

        let before = status.mode;
        let direct = status.advance(
            harvested,
            self.config.queue_capacity,
            self.config.clean_sweeps_to_direct,
        );
        if status.mode != before {
            info!(
                sink_id,
                %phase,
                from = %before,
                mode = %status.mode,
                ready = status.ready_for_queue,
                enqueued = status.jms_enqueued,
                "Submit mode changed"
            );
        }
        if direct {
            return;
        }

        let space = status.space(self.registry.capacity());
        if space == 0 {
            return;
        }
        let sweep = sweep(
            Arc::clone(&self.tracking),
            Arc::clone(&self.scheduler),
            sink_id,
            phase,
            space,
        );
        status.pending_sweep = Some(self.pool.submit(sweep));
    }
}

/// Send up to `space` READY chunks in (job id, chunk id) order
async fn sweep(
    tracking: Arc<dyn DependencyTrackingRepository>,
    scheduler: Arc<Scheduler>,
    sink_id: SinkId,
    phase: QueuePhase,
    space: u64,
) -> Result<u64> {
    let limit = usize::try_from(space).unwrap_or(usize::MAX);
    let rows = tracking
        .find_by_status(sink_id, phase.ready_status(), limit)
        .await?;

    let mut pushed = 0;
    for row in rows {
        if !scheduler.registry().reserve_for_sweep(sink_id, phase) {
            break;
        }
        match scheduler.submit(row.key, sink_id, phase).await {
            Ok(SubmitOutcome::Sent) => pushed += 1,
            Ok(SubmitOutcome::NotReady) => {}
            Err(AppError::JobAborted(job_id)) => {
                debug!(job_id, chunk_id = row.key.chunk_id, "Skipping chunk of aborted job");
            }
            // the row stays ready for the next sweep
            Err(e) => {
                warn!(
                    job_id = row.key.job_id,
                    chunk_id = row.key.chunk_id,
                    sink_id,
                    %phase,
                    error = %e,
                    "Bulk submit failed, skipping chunk"
                );
            }
        }
    }
    if pushed > 0 {
        info!(sink_id, %phase, pushed, "Bulk sweep sent chunks");
    }
    Ok(pushed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::Harness;
    use crate::domain::{ChunkKey, ChunkSchedulingStatus, DependencyTracking, Priority};
    use crate::port::{DependencyTrackingTransaction, Transaction};
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn config(capacity: u64) -> SchedulerConfig {
        SchedulerConfig {
            queue_capacity: capacity,
            ..Default::default()
        }
    }

    /// Tick until the pending sweep is harvested
    async fn settle(bulk: &BulkSubmitter) {
        bulk.tick();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_sweep_drains_backlog_after_capacity_frees() {
        let h = Harness::new(2).await;
        let bulk = BulkSubmitter::new(
            Arc::clone(&h.tracking) as Arc<dyn DependencyTrackingRepository>,
            Arc::clone(&h.scheduler),
            config(2),
        );
        let chunks = [
            h.seed_chunk(0, &[]).await,
            h.seed_chunk(1, &[]).await,
            h.seed_chunk(2, &[]).await,
        ];
        for chunk in &chunks {
            h.tracker.track_chunk(chunk, &h.sink, Priority::Normal, None).await.unwrap();
        }
        assert_eq!(h.processed().len(), 2);

        // no space: nothing is launched
        settle(&bulk).await;
        assert_eq!(h.processed().len(), 2);

        h.tracker.chunk_processing_done(chunks[0].key()).await.unwrap();
        settle(&bulk).await;
        assert_eq!(h.processed(), chunks.iter().map(|c| c.key()).collect::<Vec<_>>());
        let row = h.tracking.find(chunks[2].key()).await.unwrap().unwrap();
        assert_eq!(row.status, ChunkSchedulingStatus::QueuedToProcess);
    }

    #[tokio::test]
    async fn test_failing_row_does_not_stop_sweep() {
        let h = Harness::new(3).await;
        let bulk = BulkSubmitter::new(
            Arc::clone(&h.tracking) as Arc<dyn DependencyTrackingRepository>,
            Arc::clone(&h.scheduler),
            config(3),
        );
        h.registry.force_bulk(h.sink.id, QueuePhase::Processing);

        // a row whose job is gone sorts first and cannot be sent
        let orphan = ChunkKey::new(0, 0);
        let mut tx = h.tracking.begin_transaction().await.unwrap();
        tx.insert(&DependencyTracking::new(
            orphan,
            h.sink.id,
            BTreeSet::new(),
            Priority::Normal,
        ))
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let chunks = [h.seed_chunk(0, &[]).await, h.seed_chunk(1, &[]).await];
        for chunk in &chunks {
            h.tracker.track_chunk(chunk, &h.sink, Priority::Normal, None).await.unwrap();
        }
        assert!(h.processed().is_empty());

        settle(&bulk).await;
        assert_eq!(h.processed(), chunks.iter().map(|c| c.key()).collect::<Vec<_>>());
        let row = h.tracking.find(orphan).await.unwrap().unwrap();
        assert_eq!(row.status, ChunkSchedulingStatus::ReadyToProcess);
        let status = h
            .registry
            .snapshot()
            .into_iter()
            .find(|s| s.sink_id == h.sink.id && s.phase == QueuePhase::Processing)
            .unwrap();
        assert_eq!(status.jms_enqueued, 2);
        assert_ne!(status.mode, SubmitMode::Direct);
    }

    #[tokio::test]
    async fn test_returns_to_direct_after_clean_sweeps() {
        let h = Harness::new(3).await;
        let bulk = BulkSubmitter::new(
            Arc::clone(&h.tracking) as Arc<dyn DependencyTrackingRepository>,
            Arc::clone(&h.scheduler),
            config(3),
        );
        h.registry.force_bulk(h.sink.id, QueuePhase::Processing);

        // an empty backlog moves to transition at once
        settle(&bulk).await;
        assert_eq!(
            h.registry.mode(h.sink.id, QueuePhase::Processing),
            SubmitMode::TransitionToDirect
        );
        for _ in 0..3 {
            settle(&bulk).await;
        }
        settle(&bulk).await;
        assert_eq!(
            h.registry.mode(h.sink.id, QueuePhase::Processing),
            SubmitMode::Direct
        );
    }

    #[tokio::test]
    async fn test_direct_entries_are_skipped() {
        let h = Harness::new(3).await;
        let bulk = BulkSubmitter::new(
            Arc::clone(&h.tracking) as Arc<dyn DependencyTrackingRepository>,
            Arc::clone(&h.scheduler),
            config(3),
        );
        h.registry.entry(h.sink.id, QueuePhase::Delivering);
        bulk.tick();
        assert!(h.registry.snapshot().iter().all(|s| !s.sweep_pending));
    }
}
