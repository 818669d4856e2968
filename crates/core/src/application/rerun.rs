//! Rerun queue - one rerun at a time, failed attempts retried after a backoff

use crate::application::job_store::JobStoreService;
use crate::application::worker::{run_periodic, ShutdownToken};
use crate::domain::{Job, JobId, RerunEntry};
use crate::error::Result;
use crate::port::{RerunRepository, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct RerunService {
    reruns: Arc<dyn RerunRepository>,
    jobs: Arc<JobStoreService>,
    clock: Arc<dyn TimeProvider>,
    backoff_ms: i64,
}

impl RerunService {
    pub fn new(
        reruns: Arc<dyn RerunRepository>,
        jobs: Arc<JobStoreService>,
        clock: Arc<dyn TimeProvider>,
        backoff_ms: i64,
    ) -> Self {
        Self {
            reruns,
            jobs,
            clock,
            backoff_ms,
        }
    }

    /// Queue a rerun of an existing job
    pub async fn request(&self, job_id: JobId, failed_only: bool) -> Result<RerunEntry> {
        self.jobs.get_job(job_id).await?;
        let entry = self
            .reruns
            .enqueue(&RerunEntry::new(job_id, failed_only, self.clock.now_millis()))
            .await?;
        info!(job_id, failed_only, rerun_id = entry.id, "Rerun requested");
        Ok(entry)
    }

    pub async fn run(self: Arc<Self>, period: Duration, shutdown: ShutdownToken) {
        run_periodic("rerun", period, shutdown, move || {
            let this = Arc::clone(&self);
            async move { this.tick().await.map(|_| ()) }
        })
        .await;
    }

    /// Execute the next due rerun, if any. Returns the job it created.
    pub async fn tick(&self) -> Result<Option<Job>> {
        let now = self.clock.now_millis();
        let Some(entry) = self.reruns.claim_next(now).await? else {
            return Ok(None);
        };
        match self
            .jobs
            .create_rerun_job(entry.job_id, entry.failed_only)
            .await
        {
            Ok(job) => {
                self.reruns.remove(entry.id).await?;
                Ok(Some(job))
            }
            Err(e) => {
                let retry_at = now + self.backoff_ms;
                warn!(job_id = entry.job_id, rerun_id = entry.id, retry_at, error = %e, "Rerun failed, retrying later");
                self.reruns.retry_later(entry.id, retry_at).await?;
                Ok(None)
            }
        }
    }
}
