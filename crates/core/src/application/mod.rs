// Application Layer - Use Cases and Business Logic

pub mod bulk_submitter;
pub mod config;
pub mod dependency_tracker;
pub mod job_queue_watcher;
pub mod job_store;
pub mod key_generator;
pub mod queue_status;
pub mod recovery;
pub mod rerun;
pub mod scheduler;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use bulk_submitter::BulkSubmitter;
pub use config::SchedulerConfig;
pub use dependency_tracker::DependencyTracker;
pub use job_queue_watcher::JobQueueWatcher;
pub use job_store::{ChunkResultOutcome, JobStoreService, StoredItemsPartitioner};
pub use queue_status::{QueueStatusRegistry, QueueStatusSnapshot, SubmitMode};
pub use recovery::{RecoveryReport, RecoveryService};
pub use rerun::RerunService;
pub use scheduler::{Scheduler, SubmitOutcome};
pub use worker::{shutdown_channel, ShutdownSender, ShutdownToken, SweepPool};
