// Chunk & Item Domain Model

use crate::domain::error::{DomainError, Result};
use crate::domain::job::{Diagnostic, JobId};
use crate::domain::state::{Phase, State, StateChange};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Chunk number within a job, starting at 0
pub type ChunkId = u32;

/// Identifies a chunk across jobs; ordering is (job_id, chunk_id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkKey {
    pub job_id: JobId,
    pub chunk_id: ChunkId,
}

impl ChunkKey {
    pub fn new(job_id: JobId, chunk_id: ChunkId) -> Self {
        Self { job_id, chunk_id }
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.job_id, self.chunk_id)
    }
}

/// Outcome status of one item in one phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkItemStatus {
    Success,
    Failure,
    Ignore,
}

impl FromStr for ChunkItemStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SUCCESS" => Ok(ChunkItemStatus::Success),
            "FAILURE" => Ok(ChunkItemStatus::Failure),
            "IGNORE" => Ok(ChunkItemStatus::Ignore),
            _ => Err(DomainError::UnknownValue {
                kind: "item status",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemKind {
    #[default]
    Record,
    /// Marker item of a job termination chunk
    JobEnd,
}

/// Payload + status of one item as exchanged with processors and sinks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkItem {
    pub id: u32,
    pub status: ChunkItemStatus,
    #[serde(default)]
    pub kind: ItemKind,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub tracking_id: Option<String>,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

impl ChunkItem {
    pub fn success(id: u32, data: impl Into<String>) -> Self {
        Self {
            id,
            status: ChunkItemStatus::Success,
            kind: ItemKind::Record,
            data: data.into(),
            tracking_id: None,
            diagnostics: Vec::new(),
        }
    }

    /// Item whose partitioning failed; keeps the diagnostic instead of data
    pub fn failure(id: u32, diagnostic: Diagnostic) -> Self {
        Self {
            id,
            status: ChunkItemStatus::Failure,
            kind: ItemKind::Record,
            data: String::new(),
            tracking_id: None,
            diagnostics: vec![diagnostic],
        }
    }

    pub fn job_end(id: u32) -> Self {
        Self {
            id,
            status: ChunkItemStatus::Success,
            kind: ItemKind::JobEnd,
            data: String::new(),
            tracking_id: None,
            diagnostics: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: ChunkItemStatus) -> Self {
        self.status = status;
        self
    }
}

/// Bibliographic metadata of a partitioned record, input to key generation
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordInfo {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub agency_id: Option<i64>,
}

/// Item Entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub job_id: JobId,
    pub chunk_id: ChunkId,
    pub id: u32,
    pub state: State,
    pub tracking_id: String,
    pub record_info: Option<RecordInfo>,
    pub partitioning_outcome: Option<ChunkItem>,
    pub processing_outcome: Option<ChunkItem>,
    /// Look-ahead output of the next flow version, paired with processing
    pub next_processing_outcome: Option<ChunkItem>,
    pub delivering_outcome: Option<ChunkItem>,
    pub time_of_creation: i64,
    pub time_of_completion: Option<i64>,
}

impl Item {
    /// Item as produced by partitioning
    pub fn partitioned(
        key: ChunkKey,
        outcome: ChunkItem,
        record_info: Option<RecordInfo>,
        tracking_id: String,
        now: i64,
    ) -> Self {
        let mut state = State::default();
        let change = StateChange::for_outcome(Phase::Partitioning, outcome.status)
            .begin(now)
            .end(now);
        // a fresh state has no finished phase
        let _ = state.update(&change);
        Self {
            job_id: key.job_id,
            chunk_id: key.chunk_id,
            id: outcome.id,
            state,
            tracking_id,
            record_info,
            partitioning_outcome: Some(outcome),
            processing_outcome: None,
            next_processing_outcome: None,
            delivering_outcome: None,
            time_of_creation: now,
            time_of_completion: None,
        }
    }

    pub fn key(&self) -> ChunkKey {
        ChunkKey::new(self.job_id, self.chunk_id)
    }

    pub fn outcome(&self, phase: Phase) -> Option<&ChunkItem> {
        match phase {
            Phase::Partitioning => self.partitioning_outcome.as_ref(),
            Phase::Processing => self.processing_outcome.as_ref(),
            Phase::Delivering => self.delivering_outcome.as_ref(),
        }
    }

    pub fn is_job_end(&self) -> bool {
        self.partitioning_outcome
            .as_ref()
            .is_some_and(|o| o.kind == ItemKind::JobEnd)
    }

    /// True if any phase recorded a failure
    pub fn has_failed(&self) -> bool {
        Phase::ALL.iter().any(|p| self.state.phase(*p).failed > 0)
    }

    /// Record the outcome of a phase and finish that phase for this item
    pub fn apply_outcome(
        &mut self,
        phase: Phase,
        mut outcome: ChunkItem,
        next: Option<ChunkItem>,
        now: i64,
    ) -> Result<StateChange> {
        let change = StateChange::for_outcome(phase, outcome.status)
            .begin(now)
            .end(now);
        self.state.update(&change)?;

        if outcome.tracking_id.is_none() {
            outcome.tracking_id = Some(self.tracking_id.clone());
        }
        match phase {
            Phase::Partitioning => self.partitioning_outcome = Some(outcome),
            Phase::Processing => {
                self.processing_outcome = Some(outcome);
                self.next_processing_outcome = next;
            }
            Phase::Delivering => self.delivering_outcome = Some(outcome),
        }
        if self.state.all_phases_are_done() && self.time_of_completion.is_none() {
            self.time_of_completion = Some(now);
        }
        Ok(change)
    }
}

/// Chunk Entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub job_id: JobId,
    pub chunk_id: ChunkId,
    pub data_file_id: String,
    pub number_of_items: u32,
    /// Ordering keys, frozen when the chunk is created
    pub keys: BTreeSet<String>,
    pub state: State,
    pub time_of_creation: i64,
    pub time_of_completion: Option<i64>,
}

impl Chunk {
    pub fn key(&self) -> ChunkKey {
        ChunkKey::new(self.job_id, self.chunk_id)
    }

    /// Fold an aggregated item change in; the phase ends when every item has an outcome
    pub fn apply(&mut self, mut change: StateChange, now: i64) -> Result<()> {
        let after = self.state.phase(change.phase).count() + change.count();
        if after > u64::from(self.number_of_items) {
            return Err(DomainError::ValidationError(format!(
                "chunk {} would record {} outcomes for {} items",
                self.key(),
                after,
                self.number_of_items
            )));
        }
        if after == u64::from(self.number_of_items) {
            change.end_at = Some(change.end_at.unwrap_or(now));
        } else {
            change.end_at = None;
        }
        self.state.update(&change)?;
        if self.state.all_phases_are_done() && self.time_of_completion.is_none() {
            self.time_of_completion = Some(now);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(items: u32) -> Chunk {
        Chunk {
            job_id: 1,
            chunk_id: 0,
            data_file_id: "f".to_string(),
            number_of_items: items,
            keys: BTreeSet::new(),
            state: State::default(),
            time_of_creation: 0,
            time_of_completion: None,
        }
    }

    #[test]
    fn test_chunk_key_order_and_display() {
        let a = ChunkKey::new(1, 9);
        let b = ChunkKey::new(2, 0);
        assert!(a < b);
        assert_eq!(a.to_string(), "1/9");
    }

    #[test]
    fn test_chunk_phase_done_only_when_all_items_done() {
        let mut chunk = chunk(3);
        let mut change = StateChange::new(Phase::Processing).begin(5);
        change.succeeded = 2;
        chunk.apply(change, 5).unwrap();
        assert!(!chunk.state.phase_is_done(Phase::Processing));

        let change = StateChange::for_outcome(Phase::Processing, ChunkItemStatus::Failure).begin(6);
        chunk.apply(change, 6).unwrap();
        assert!(chunk.state.phase_is_done(Phase::Processing));
        assert_eq!(chunk.state.processing.begin_at, Some(5));
        assert_eq!(chunk.state.processing.end_at, Some(6));
    }

    #[test]
    fn test_chunk_rejects_surplus_outcomes() {
        let mut chunk = chunk(1);
        let mut change = StateChange::new(Phase::Delivering);
        change.succeeded = 2;
        assert!(chunk.apply(change, 1).is_err());
        assert_eq!(chunk.state.delivering.count(), 0);
    }

    #[test]
    fn test_item_outcome_applies_once() {
        let key = ChunkKey::new(1, 0);
        let mut item = Item::partitioned(key, ChunkItem::success(0, "r"), None, "t-0".into(), 1);
        assert!(item.state.phase_is_done(Phase::Partitioning));

        item.apply_outcome(Phase::Processing, ChunkItem::success(0, "p"), None, 2)
            .unwrap();
        assert_eq!(
            item.processing_outcome.as_ref().and_then(|o| o.tracking_id.as_deref()),
            Some("t-0")
        );
        let again = item.apply_outcome(Phase::Processing, ChunkItem::success(0, "p"), None, 3);
        assert!(matches!(again, Err(DomainError::PhaseAlreadyDone { .. })));

        item.apply_outcome(
            Phase::Delivering,
            ChunkItem::success(0, "d").with_status(ChunkItemStatus::Ignore),
            None,
            4,
        )
        .unwrap();
        assert_eq!(item.time_of_completion, Some(4));
        assert!(!item.has_failed());
    }
}
