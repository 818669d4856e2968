// Port Layer - Interfaces for external dependencies

pub mod dependency_tracking;
pub mod flow_store;
pub mod id_provider; // For deterministic testing
pub mod job_queue;
pub mod job_store;
pub mod message_sender;
pub mod notifier;
pub mod partitioner;
pub mod time_provider;
pub mod transaction;

// Re-exports
pub use dependency_tracking::{
    DependencyTrackingRepository, DependencyTrackingTransaction, StatusCount,
};
pub use flow_store::{FlowBindingRule, FlowStore, StaticFlowStore};
pub use id_provider::IdProvider;
pub use job_queue::{JobQueueRepository, RerunRepository};
pub use job_store::{JobStoreRepository, JobStoreTransaction};
pub use message_sender::{MessageSender, MessageSource, SendError};
pub use notifier::{JobNotifier, NotificationKind};
pub use partitioner::{DataPartitioner, PartitionError, PartitionResult, PartitionerFactory};
pub use time_provider::TimeProvider;
pub use transaction::Transaction;
