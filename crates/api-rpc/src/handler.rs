//! RPC Method Handlers
//!
//! Thin adapters from JSON-RPC params to the application services.

use crate::error::to_rpc_error;
use crate::types::{
    AddChunkRequest, AddChunkResponse, AddJobRequest, JobRequest, PollRequest,
    QueueStatusRequest, QueueStatusResponse, RerunJobRequest, RerunJobResponse,
};
use jobstore_core::application::{JobStoreService, QueueStatusRegistry, RerunService};
use jobstore_core::domain::{Job, OutboundMessage};
use jobstore_core::error::AppError;
use jobstore_core::port::MessageSource;
use jsonrpsee::types::ErrorObjectOwned;
use std::sync::Arc;
use tracing::{debug, warn};

/// Upper bound for one broker.poll.v1 call
const MAX_POLL_BATCH: usize = 1000;

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    jobs: Arc<JobStoreService>,
    reruns: Arc<RerunService>,
    registry: Arc<QueueStatusRegistry>,
    messages: Arc<dyn MessageSource>,
}

impl RpcHandler {
    pub fn new(
        jobs: Arc<JobStoreService>,
        reruns: Arc<RerunService>,
        registry: Arc<QueueStatusRegistry>,
        messages: Arc<dyn MessageSource>,
    ) -> Self {
        Self {
            jobs,
            reruns,
            registry,
            messages,
        }
    }

    /// jobstore.addJob.v1
    pub async fn add_job(&self, params: AddJobRequest) -> Result<Job, ErrorObjectOwned> {
        self.jobs
            .add_job(params.specification)
            .await
            .map_err(to_rpc_error)
    }

    /// jobstore.addChunk.v1
    pub async fn add_chunk(
        &self,
        params: AddChunkRequest,
    ) -> Result<AddChunkResponse, ErrorObjectOwned> {
        let outcome = self
            .jobs
            .handle_chunk_result(params.into())
            .await
            .map_err(|e| {
                if e.is_client_error() {
                    debug!(error = %e, "Chunk result rejected");
                } else {
                    warn!(error = %e, "Chunk result failed");
                }
                to_rpc_error(e)
            })?;

        Ok(AddChunkResponse {
            applied: outcome.applied,
            job: outcome.job,
        })
    }

    /// jobstore.abortJob.v1
    pub async fn abort_job(&self, params: JobRequest) -> Result<Job, ErrorObjectOwned> {
        self.jobs
            .abort_job(params.job_id)
            .await
            .map_err(to_rpc_error)
    }

    /// jobstore.getJob.v1
    pub async fn get_job(&self, params: JobRequest) -> Result<Job, ErrorObjectOwned> {
        self.jobs.get_job(params.job_id).await.map_err(to_rpc_error)
    }

    /// jobstore.rerunJob.v1
    pub async fn rerun_job(
        &self,
        params: RerunJobRequest,
    ) -> Result<RerunJobResponse, ErrorObjectOwned> {
        let entry = self
            .reruns
            .request(params.job_id, params.failed_only)
            .await
            .map_err(to_rpc_error)?;

        Ok(RerunJobResponse {
            rerun_id: entry.id,
            job_id: entry.job_id,
            failed_only: entry.failed_only,
        })
    }

    /// admin.queueStatus.v1
    pub async fn queue_status(
        &self,
        _params: QueueStatusRequest,
    ) -> Result<QueueStatusResponse, ErrorObjectOwned> {
        Ok(QueueStatusResponse {
            capacity: self.registry.capacity(),
            entries: self.registry.snapshot(),
        })
    }

    /// broker.poll.v1
    pub async fn poll(&self, params: PollRequest) -> Result<Vec<OutboundMessage>, ErrorObjectOwned> {
        if params.max == 0 || params.max > MAX_POLL_BATCH {
            return Err(to_rpc_error(AppError::Validation(format!(
                "max must be between 1 and {}",
                MAX_POLL_BATCH
            ))));
        }
        self.messages
            .poll(&params.destination, params.max)
            .await
            .map_err(to_rpc_error)
    }
}
