//! Job Queue Watcher - at most one job per sink is partitioning
//!
//! Partitioning of the claimed entry runs on its own task. The entry is removed
//! when partitioning ends (or the job was aborted) and put back to WAITING on
//! any other failure.

use crate::application::job_store::JobStoreService;
use crate::application::worker::{run_periodic, ShutdownToken};
use crate::domain::{JobQueueEntry, JobQueueState, SinkId};
use crate::error::{AppError, Result};
use crate::port::JobQueueRepository;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub struct JobQueueWatcher {
    queue: Arc<dyn JobQueueRepository>,
    jobs: Arc<JobStoreService>,
}

impl JobQueueWatcher {
    pub fn new(queue: Arc<dyn JobQueueRepository>, jobs: Arc<JobStoreService>) -> Self {
        Self { queue, jobs }
    }

    pub async fn run(self: Arc<Self>, period: Duration, shutdown: ShutdownToken) {
        run_periodic("job_queue_watcher", period, shutdown, move || {
            let this = Arc::clone(&self);
            async move { this.tick().await.map(|_| ()) }
        })
        .await;
    }

    /// Start partitioning for every idle sink with a waiting job
    pub async fn tick(&self) -> Result<Vec<JoinHandle<()>>> {
        let mut by_sink: BTreeMap<SinkId, Vec<JobQueueEntry>> = BTreeMap::new();
        for entry in self.queue.find_active().await? {
            by_sink.entry(entry.sink_id).or_default().push(entry);
        }

        let mut started = Vec::new();
        for (sink_id, entries) in by_sink {
            if entries.iter().any(|e| e.state == JobQueueState::InProgress) {
                continue;
            }
            let Some(entry) = entries
                .into_iter()
                .find(|e| e.state == JobQueueState::Waiting)
            else {
                continue;
            };
            if !self.queue.start(entry.id).await? {
                continue;
            }
            info!(job_id = entry.job_id, sink_id, "Partitioning started");
            started.push(tokio::spawn(partition(
                Arc::clone(&self.queue),
                Arc::clone(&self.jobs),
                entry,
            )));
        }
        Ok(started)
    }
}

async fn partition(
    queue: Arc<dyn JobQueueRepository>,
    jobs: Arc<JobStoreService>,
    entry: JobQueueEntry,
) {
    let finished = match jobs.partition_job(entry.job_id, entry.source).await {
        Ok(_) => queue.remove(entry.id).await,
        Err(AppError::JobAborted(job_id)) => {
            info!(job_id, "Partitioning stopped, job aborted");
            queue.remove(entry.id).await
        }
        Err(e) => {
            error!(job_id = entry.job_id, error = %e, "Partitioning failed, entry back to waiting");
            queue.reset(entry.id).await
        }
    };
    if let Err(e) = finished {
        error!(job_id = entry.job_id, error = %e, "Unable to update job queue entry");
    }
}
