//! RPC Request/Response Types
//!
//! Defines the JSON-RPC method parameters and results.

use jobstore_core::application::QueueStatusSnapshot;
use jobstore_core::domain::{ChunkItem, ChunkResult, Job, JobId, JobSpecification, Phase};
use serde::{Deserialize, Serialize};

/// jobstore.addJob.v1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddJobRequest {
    pub specification: JobSpecification,
}

/// jobstore.addChunk.v1 - result of one phase for one chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddChunkRequest {
    pub job_id: JobId,
    pub chunk_id: u32,
    pub phase: Phase,
    pub items: Vec<ChunkItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<Vec<ChunkItem>>,
}

impl From<AddChunkRequest> for ChunkResult {
    fn from(req: AddChunkRequest) -> Self {
        ChunkResult {
            job_id: req.job_id,
            chunk_id: req.chunk_id,
            phase: req.phase,
            items: req.items,
            next: req.next,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddChunkResponse {
    /// False for a redelivered result that was already recorded
    pub applied: bool,
    pub job: Option<Job>,
}

/// jobstore.abortJob.v1 / jobstore.getJob.v1
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub job_id: JobId,
}

/// jobstore.rerunJob.v1
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RerunJobRequest {
    pub job_id: JobId,
    #[serde(default)]
    pub failed_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RerunJobResponse {
    pub rerun_id: i64,
    pub job_id: JobId,
    pub failed_only: bool,
}

/// admin.queueStatus.v1
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStatusRequest {
    // No parameters needed
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatusResponse {
    pub capacity: u64,
    pub entries: Vec<QueueStatusSnapshot>,
}

/// broker.poll.v1 - drain messages of one destination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollRequest {
    pub destination: String,
    #[serde(default = "default_max")]
    pub max: usize,
}

fn default_max() -> usize {
    10
}
