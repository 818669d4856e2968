// Dependency Tracking Domain Model
//
// One row per chunk not yet delivered. `waiting_on` lists earlier chunks of the
// same sink sharing an ordering key; it is computed at creation and only shrinks.
// Waiting holds back delivery only: a waiting chunk is still processed.

use crate::domain::chunk::ChunkKey;
use crate::domain::error::{DomainError, Result};
use crate::domain::flow::SinkId;
use crate::domain::job::Priority;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Scheduling status of a chunk
///
/// READY_TO_PROCESS -> QUEUED_TO_PROCESS -> {BLOCKED | READY_TO_DELIVER} -> QUEUED_TO_DELIVERY
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkSchedulingStatus {
    ReadyToProcess,
    QueuedToProcess,
    Blocked,
    ReadyToDeliver,
    QueuedToDelivery,
}

impl ChunkSchedulingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkSchedulingStatus::ReadyToProcess => "READY_TO_PROCESS",
            ChunkSchedulingStatus::QueuedToProcess => "QUEUED_TO_PROCESS",
            ChunkSchedulingStatus::Blocked => "BLOCKED",
            ChunkSchedulingStatus::ReadyToDeliver => "READY_TO_DELIVER",
            ChunkSchedulingStatus::QueuedToDelivery => "QUEUED_TO_DELIVERY",
        }
    }

    pub fn can_transition_to(&self, next: ChunkSchedulingStatus) -> bool {
        use ChunkSchedulingStatus::*;
        matches!(
            (self, next),
            (ReadyToProcess, QueuedToProcess)
                | (QueuedToProcess, Blocked)
                | (QueuedToProcess, ReadyToDeliver)
                | (Blocked, ReadyToDeliver)
                | (ReadyToDeliver, QueuedToDelivery)
        )
    }
}

impl fmt::Display for ChunkSchedulingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkSchedulingStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "READY_TO_PROCESS" => Ok(ChunkSchedulingStatus::ReadyToProcess),
            "QUEUED_TO_PROCESS" => Ok(ChunkSchedulingStatus::QueuedToProcess),
            "BLOCKED" => Ok(ChunkSchedulingStatus::Blocked),
            "READY_TO_DELIVER" => Ok(ChunkSchedulingStatus::ReadyToDeliver),
            "QUEUED_TO_DELIVERY" => Ok(ChunkSchedulingStatus::QueuedToDelivery),
            _ => Err(DomainError::UnknownValue {
                kind: "scheduling status",
                value: s.to_string(),
            }),
        }
    }
}

/// Broker queue a chunk is submitted to: processor or sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueuePhase {
    Processing,
    Delivering,
}

impl QueuePhase {
    pub const ALL: [QueuePhase; 2] = [QueuePhase::Processing, QueuePhase::Delivering];

    pub fn ready_status(&self) -> ChunkSchedulingStatus {
        match self {
            QueuePhase::Processing => ChunkSchedulingStatus::ReadyToProcess,
            QueuePhase::Delivering => ChunkSchedulingStatus::ReadyToDeliver,
        }
    }

    pub fn queued_status(&self) -> ChunkSchedulingStatus {
        match self {
            QueuePhase::Processing => ChunkSchedulingStatus::QueuedToProcess,
            QueuePhase::Delivering => ChunkSchedulingStatus::QueuedToDelivery,
        }
    }

    /// Queue phase a status counts towards, if any
    pub fn of_status(status: ChunkSchedulingStatus) -> Option<QueuePhase> {
        match status {
            ChunkSchedulingStatus::ReadyToProcess | ChunkSchedulingStatus::QueuedToProcess => {
                Some(QueuePhase::Processing)
            }
            ChunkSchedulingStatus::ReadyToDeliver | ChunkSchedulingStatus::QueuedToDelivery => {
                Some(QueuePhase::Delivering)
            }
            ChunkSchedulingStatus::Blocked => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueuePhase::Processing => "PROCESSING",
            QueuePhase::Delivering => "DELIVERING",
        }
    }
}

impl fmt::Display for QueuePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dependency tracking row of one chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyTracking {
    pub key: ChunkKey,
    pub sink_id: SinkId,
    pub status: ChunkSchedulingStatus,
    pub match_keys: BTreeSet<String>,
    pub waiting_on: BTreeSet<ChunkKey>,
    pub priority: Priority,
}

impl DependencyTracking {
    /// Row for a chunk about to be processed
    pub fn new(
        key: ChunkKey,
        sink_id: SinkId,
        match_keys: BTreeSet<String>,
        priority: Priority,
    ) -> Self {
        Self {
            key,
            sink_id,
            status: ChunkSchedulingStatus::ReadyToProcess,
            match_keys,
            waiting_on: BTreeSet::new(),
            priority,
        }
    }

    /// Row for a chunk that skips processing (job termination barrier).
    /// It starts BLOCKED until `set_waiting_on` finds nothing to wait for.
    pub fn new_barrier(
        key: ChunkKey,
        sink_id: SinkId,
        match_keys: BTreeSet<String>,
        priority: Priority,
    ) -> Self {
        Self {
            status: ChunkSchedulingStatus::Blocked,
            ..Self::new(key, sink_id, match_keys, priority)
        }
    }

    /// Fix the chunks this row waits on; only valid before the row is scheduled.
    /// A barrier with nothing to wait for is ready for delivery at once.
    pub fn set_waiting_on(&mut self, waiting_on: BTreeSet<ChunkKey>) {
        self.waiting_on = waiting_on;
        self.waiting_on.remove(&self.key);
        if self.waiting_on.is_empty() && self.status == ChunkSchedulingStatus::Blocked {
            self.status = ChunkSchedulingStatus::ReadyToDeliver;
        }
    }

    pub fn transition(&mut self, next: ChunkSchedulingStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Processing finished: BLOCKED while waiting on others, else READY_TO_DELIVER
    pub fn complete_processing(&mut self) -> Result<ChunkSchedulingStatus> {
        let next = if self.waiting_on.is_empty() {
            ChunkSchedulingStatus::ReadyToDeliver
        } else {
            ChunkSchedulingStatus::Blocked
        };
        self.transition(next)?;
        Ok(next)
    }

    /// Drop a delivered chunk from `waiting_on`.
    /// Returns the promoted status when a BLOCKED row became unblocked; rows
    /// still in processing pick up the empty list in `complete_processing`.
    pub fn release(&mut self, delivered: &ChunkKey) -> Option<ChunkSchedulingStatus> {
        if !self.waiting_on.remove(delivered) || !self.waiting_on.is_empty() {
            return None;
        }
        if self.status != ChunkSchedulingStatus::Blocked {
            return None;
        }
        self.status = ChunkSchedulingStatus::ReadyToDeliver;
        Some(self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(chunk_id: u32) -> DependencyTracking {
        DependencyTracking::new(
            ChunkKey::new(1, chunk_id),
            10,
            BTreeSet::from(["rec1".to_string()]),
            Priority::Normal,
        )
    }

    #[test]
    fn test_status_roundtrip_strings() {
        for status in [
            ChunkSchedulingStatus::ReadyToProcess,
            ChunkSchedulingStatus::QueuedToProcess,
            ChunkSchedulingStatus::Blocked,
            ChunkSchedulingStatus::ReadyToDeliver,
            ChunkSchedulingStatus::QueuedToDelivery,
        ] {
            assert_eq!(status.as_str().parse::<ChunkSchedulingStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_waiting_row_is_still_processed() {
        let mut entity = row(1);
        entity.set_waiting_on(BTreeSet::from([ChunkKey::new(1, 0)]));
        assert_eq!(entity.status, ChunkSchedulingStatus::ReadyToProcess);

        entity.transition(ChunkSchedulingStatus::QueuedToProcess).unwrap();
        assert_eq!(
            entity.complete_processing().unwrap(),
            ChunkSchedulingStatus::Blocked
        );
        assert_eq!(
            entity.release(&ChunkKey::new(1, 0)),
            Some(ChunkSchedulingStatus::ReadyToDeliver)
        );
    }

    #[test]
    fn test_release_during_processing_leaves_status() {
        let mut entity = row(1);
        entity.set_waiting_on(BTreeSet::from([ChunkKey::new(1, 0)]));
        entity.transition(ChunkSchedulingStatus::QueuedToProcess).unwrap();

        assert_eq!(entity.release(&ChunkKey::new(1, 0)), None);
        assert_eq!(entity.status, ChunkSchedulingStatus::QueuedToProcess);
        assert_eq!(
            entity.complete_processing().unwrap(),
            ChunkSchedulingStatus::ReadyToDeliver
        );
    }

    #[test]
    fn test_barrier_waits_or_is_ready_for_delivery() {
        let barrier_keys = BTreeSet::from(["barrier".to_string()]);
        let mut waiting = DependencyTracking::new_barrier(
            ChunkKey::new(1, 5),
            10,
            barrier_keys.clone(),
            Priority::Normal,
        );
        waiting.set_waiting_on(BTreeSet::from([ChunkKey::new(1, 4)]));
        assert_eq!(waiting.status, ChunkSchedulingStatus::Blocked);

        let mut idle =
            DependencyTracking::new_barrier(ChunkKey::new(2, 0), 10, barrier_keys, Priority::Normal);
        idle.set_waiting_on(BTreeSet::new());
        assert_eq!(idle.status, ChunkSchedulingStatus::ReadyToDeliver);
    }

    #[test]
    fn test_processed_row_unblocks_to_delivery() {
        let mut entity = row(2);
        entity.transition(ChunkSchedulingStatus::QueuedToProcess).unwrap();
        entity.waiting_on = BTreeSet::from([ChunkKey::new(1, 0), ChunkKey::new(1, 1)]);
        assert_eq!(
            entity.complete_processing().unwrap(),
            ChunkSchedulingStatus::Blocked
        );

        assert_eq!(entity.release(&ChunkKey::new(1, 0)), None);
        assert_eq!(entity.release(&ChunkKey::new(9, 9)), None);
        assert_eq!(
            entity.release(&ChunkKey::new(1, 1)),
            Some(ChunkSchedulingStatus::ReadyToDeliver)
        );
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut entity = row(0);
        tokio_test::assert_err!(entity.complete_processing());
        tokio_test::assert_err!(entity.transition(ChunkSchedulingStatus::QueuedToDelivery));
        assert_eq!(entity.status, ChunkSchedulingStatus::ReadyToProcess);
    }

    #[test]
    fn test_waiting_on_never_contains_self() {
        let mut entity = row(3);
        entity.set_waiting_on(BTreeSet::from([ChunkKey::new(1, 3)]));
        assert!(entity.waiting_on.is_empty());
        assert_eq!(entity.status, ChunkSchedulingStatus::ReadyToProcess);
    }
}
