// Per-phase progress state shared by jobs, chunks and items

use crate::domain::error::{DomainError, Result};
use crate::domain::ChunkItemStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Phase a job, chunk or item passes through, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Partitioning,
    Processing,
    Delivering,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Partitioning, Phase::Processing, Phase::Delivering];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Partitioning => "PARTITIONING",
            Phase::Processing => "PROCESSING",
            Phase::Delivering => "DELIVERING",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PARTITIONING" => Ok(Phase::Partitioning),
            "PROCESSING" => Ok(Phase::Processing),
            "DELIVERING" => Ok(Phase::Delivering),
            _ => Err(DomainError::UnknownValue {
                kind: "phase",
                value: s.to_string(),
            }),
        }
    }
}

/// Progress of a single phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateElement {
    pub begin_at: Option<i64>,
    pub end_at: Option<i64>,
    pub succeeded: u64,
    pub failed: u64,
    pub ignored: u64,
}

impl StateElement {
    /// Number of units with a recorded outcome
    pub fn count(&self) -> u64 {
        self.succeeded + self.failed + self.ignored
    }

    pub fn is_done(&self) -> bool {
        self.end_at.is_some()
    }
}

/// Delta applied to one phase of a [`State`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub phase: Phase,
    pub succeeded: u64,
    pub failed: u64,
    pub ignored: u64,
    pub begin_at: Option<i64>,
    pub end_at: Option<i64>,
}

impl StateChange {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            succeeded: 0,
            failed: 0,
            ignored: 0,
            begin_at: None,
            end_at: None,
        }
    }

    /// Change recording a single outcome
    pub fn for_outcome(phase: Phase, status: ChunkItemStatus) -> Self {
        let mut change = Self::new(phase);
        change.record(status);
        change
    }

    pub fn record(&mut self, status: ChunkItemStatus) {
        match status {
            ChunkItemStatus::Success => self.succeeded += 1,
            ChunkItemStatus::Failure => self.failed += 1,
            ChunkItemStatus::Ignore => self.ignored += 1,
        }
    }

    pub fn begin(mut self, at: i64) -> Self {
        self.begin_at = Some(at);
        self
    }

    pub fn end(mut self, at: i64) -> Self {
        self.end_at = Some(at);
        self
    }

    pub fn count(&self) -> u64 {
        self.succeeded + self.failed + self.ignored
    }
}

/// Progress of all three phases
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    pub partitioning: StateElement,
    pub processing: StateElement,
    pub delivering: StateElement,
}

impl State {
    pub fn phase(&self, phase: Phase) -> &StateElement {
        match phase {
            Phase::Partitioning => &self.partitioning,
            Phase::Processing => &self.processing,
            Phase::Delivering => &self.delivering,
        }
    }

    fn phase_mut(&mut self, phase: Phase) -> &mut StateElement {
        match phase {
            Phase::Partitioning => &mut self.partitioning,
            Phase::Processing => &mut self.processing,
            Phase::Delivering => &mut self.delivering,
        }
    }

    /// Apply a change to one phase.
    ///
    /// Begin and end are set only the first time they are given. A phase
    /// whose end is set accepts no further changes.
    pub fn update(&mut self, change: &StateChange) -> Result<()> {
        let element = self.phase_mut(change.phase);
        if element.is_done() {
            return Err(DomainError::PhaseAlreadyDone {
                phase: change.phase,
            });
        }

        element.succeeded += change.succeeded;
        element.failed += change.failed;
        element.ignored += change.ignored;

        if element.begin_at.is_none() {
            element.begin_at = change.begin_at.or(change.end_at);
        }
        if change.end_at.is_some() {
            element.end_at = change.end_at;
        }
        Ok(())
    }

    /// Set the end of a phase if it is not set yet. Returns true when it was set now.
    pub fn end_phase(&mut self, phase: Phase, at: i64) -> bool {
        let element = self.phase_mut(phase);
        if element.is_done() {
            return false;
        }
        if element.begin_at.is_none() {
            element.begin_at = Some(at);
        }
        element.end_at = Some(at);
        true
    }

    pub fn phase_is_done(&self, phase: Phase) -> bool {
        self.phase(phase).is_done()
    }

    pub fn all_phases_are_done(&self) -> bool {
        Phase::ALL.iter().all(|p| self.phase_is_done(*p))
    }
}
