// Job queue (partitioning gate) & rerun queue ports

use crate::domain::{JobQueueEntry, RerunEntry};
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait JobQueueRepository: Send + Sync {
    async fn enqueue(&self, entry: &JobQueueEntry) -> Result<i64>;

    /// WAITING and IN_PROGRESS entries ordered by (time_of_entry, id)
    async fn find_active(&self) -> Result<Vec<JobQueueEntry>>;

    /// WAITING -> IN_PROGRESS; false if the entry is gone, not waiting, or its
    /// sink already has an entry in progress
    async fn start(&self, id: i64) -> Result<bool>;

    /// Back to WAITING
    async fn reset(&self, id: i64) -> Result<()>;

    async fn remove(&self, id: i64) -> Result<()>;

    /// Reset every IN_PROGRESS entry to WAITING, returning how many were reset
    async fn reset_in_progress(&self) -> Result<u64>;
}

#[async_trait]
pub trait RerunRepository: Send + Sync {
    async fn enqueue(&self, entry: &RerunEntry) -> Result<RerunEntry>;

    /// Claim the oldest WAITING entry due at `now`; None while another entry is
    /// IN_PROGRESS
    async fn claim_next(&self, now: i64) -> Result<Option<RerunEntry>>;

    /// Back to WAITING, not due before `retry_at`
    async fn retry_later(&self, id: i64, retry_at: i64) -> Result<()>;

    async fn remove(&self, id: i64) -> Result<()>;

    async fn reset_in_progress(&self) -> Result<u64>;
}
