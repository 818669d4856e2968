// Job Store Infrastructure - SQLite Adapter
// Implements: JobStoreRepository, DependencyTrackingRepository, JobQueueRepository,
// RerunRepository, JobNotifier

mod connection;
mod dependency_tracking_repository;
mod error;
mod job_queue_repository;
mod job_store_repository;
mod migration;
mod notification_repository;
mod rows;
mod transaction;

pub use connection::create_pool;
pub use dependency_tracking_repository::{
    SqliteDependencyTracking, SqliteDependencyTrackingTransaction,
};
pub use job_queue_repository::{SqliteJobQueue, SqliteRerunQueue};
pub use job_store_repository::SqliteJobStore;
pub use migration::run_migrations;
pub use notification_repository::SqliteNotificationStore;
pub use transaction::SqliteJobStoreTransaction;

pub use sqlx::SqlitePool;

// Note: sqlx::Error conversion is handled by map_sqlx_error in error.rs
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
