// Outbound broker messages

use crate::domain::chunk::{ChunkId, ChunkItem, ChunkKey};
use crate::domain::dependency::QueuePhase;
use crate::domain::job::JobId;
use crate::domain::state::Phase;
use serde::{Deserialize, Serialize};

/// Processor destination for business jobs
pub const PROCESSOR_BUSINESS_DESTINATION: &str = "processor::business";

/// Processor destination for acceptance-test jobs
pub const PROCESSOR_ACCTEST_DESTINATION: &str = "processor::acctest";

/// Chunk handed to a processor (partitioned items) or sink (processed items)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMessage {
    pub job_id: JobId,
    pub chunk_id: ChunkId,
    pub phase: QueuePhase,
    pub flow_cache_id: Option<i64>,
    pub sink_cache_id: Option<i64>,
    pub items: Vec<ChunkItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<Vec<ChunkItem>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessagePayload {
    Chunk(ChunkMessage),
    #[serde(rename_all = "camelCase")]
    JobAbort { job_id: JobId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub destination: String,
    pub priority: i32,
    pub payload: MessagePayload,
}

impl OutboundMessage {
    pub fn chunk(&self) -> Option<&ChunkMessage> {
        match &self.payload {
            MessagePayload::Chunk(chunk) => Some(chunk),
            MessagePayload::JobAbort { .. } => None,
        }
    }
}

/// Phase outcomes of one chunk reported back by a processor or sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResult {
    pub job_id: JobId,
    pub chunk_id: ChunkId,
    pub phase: Phase,
    pub items: Vec<ChunkItem>,
    #[serde(default)]
    pub next: Option<Vec<ChunkItem>>,
}

impl ChunkResult {
    pub fn key(&self) -> ChunkKey {
        ChunkKey::new(self.job_id, self.chunk_id)
    }
}
