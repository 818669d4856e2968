//! Startup recovery
//!
//! Puts queue entries interrupted by a crash back to WAITING and rebuilds the
//! in-memory submission counters from the persisted dependency rows.

use crate::application::queue_status::QueueStatusRegistry;
use crate::error::Result;
use crate::port::{DependencyTrackingRepository, JobQueueRepository, RerunRepository};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub job_queue_reset: u64,
    pub reruns_reset: u64,
    /// (sink, phase) entries rebuilt
    pub queue_entries: usize,
}

pub struct RecoveryService {
    job_queue: Arc<dyn JobQueueRepository>,
    reruns: Arc<dyn RerunRepository>,
    tracking: Arc<dyn DependencyTrackingRepository>,
    registry: Arc<QueueStatusRegistry>,
}

impl RecoveryService {
    pub fn new(
        job_queue: Arc<dyn JobQueueRepository>,
        reruns: Arc<dyn RerunRepository>,
        tracking: Arc<dyn DependencyTrackingRepository>,
        registry: Arc<QueueStatusRegistry>,
    ) -> Self {
        Self {
            job_queue,
            reruns,
            tracking,
            registry,
        }
    }

    /// Run once before any sweep loop starts
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let job_queue_reset = self.job_queue.reset_in_progress().await?;
        let reruns_reset = self.reruns.reset_in_progress().await?;

        let counts = self.tracking.count_by_status().await?;
        self.registry.restore(&counts);
        let snapshot = self.registry.snapshot();

        for entry in &snapshot {
            info!(
                sink_id = entry.sink_id,
                phase = %entry.phase,
                ready = entry.ready_for_queue,
                enqueued = entry.jms_enqueued,
                mode = %entry.mode,
                "Queue status restored"
            );
        }
        let report = RecoveryReport {
            job_queue_reset,
            reruns_reset,
            queue_entries: snapshot.len(),
        };
        info!(
            job_queue_reset,
            reruns_reset,
            queue_entries = report.queue_entries,
            "Recovery complete"
        );
        Ok(report)
    }
}
