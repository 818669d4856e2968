// Domain Layer - Pure state machine and entities

pub mod chunk;
pub mod dependency;
pub mod error;
pub mod flow;
pub mod job;
pub mod job_queue;
pub mod message;
pub mod state;

// Re-exports
pub use chunk::{Chunk, ChunkId, ChunkItem, ChunkItemStatus, ChunkKey, Item, ItemKind, RecordInfo};
pub use dependency::{ChunkSchedulingStatus, DependencyTracking, QueuePhase};
pub use error::DomainError;
pub use flow::{content_checksum, Flow, FlowBinding, OrderingPolicy, Sink, SinkId};
pub use job::{Diagnostic, DiagnosticLevel, Job, JobId, JobSpecification, JobType, Priority};
pub use job_queue::{JobQueueEntry, JobQueueState, PartitioningSource, RerunEntry};
pub use message::{
    ChunkMessage, ChunkResult, MessagePayload, OutboundMessage, PROCESSOR_ACCTEST_DESTINATION,
    PROCESSOR_BUSINESS_DESTINATION,
};
pub use state::{Phase, State, StateChange, StateElement};
