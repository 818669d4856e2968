// Job queue & rerun queue entries

use crate::domain::error::{DomainError, Result};
use crate::domain::flow::SinkId;
use crate::domain::job::JobId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobQueueState {
    Waiting,
    InProgress,
}

impl JobQueueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobQueueState::Waiting => "WAITING",
            JobQueueState::InProgress => "IN_PROGRESS",
        }
    }
}

impl fmt::Display for JobQueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobQueueState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "WAITING" => Ok(JobQueueState::Waiting),
            "IN_PROGRESS" => Ok(JobQueueState::InProgress),
            _ => Err(DomainError::UnknownValue {
                kind: "queue state",
                value: s.to_string(),
            }),
        }
    }
}

/// Where partitioning reads its records from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartitioningSource {
    /// The data file named by the job specification
    #[default]
    DataFile,
    /// Stored items of an earlier job
    #[serde(rename_all = "camelCase")]
    Rerun { of_job: JobId, failed_only: bool },
}

/// Job waiting for (or in) partitioning; at most one per sink is IN_PROGRESS
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobQueueEntry {
    pub id: i64,
    pub job_id: JobId,
    pub sink_id: SinkId,
    pub state: JobQueueState,
    pub source: PartitioningSource,
    pub time_of_entry: i64,
}

impl JobQueueEntry {
    pub fn new(job_id: JobId, sink_id: SinkId, source: PartitioningSource, now: i64) -> Self {
        Self {
            id: 0,
            job_id,
            sink_id,
            state: JobQueueState::Waiting,
            source,
            time_of_entry: now,
        }
    }
}

/// Request to rerun an existing job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RerunEntry {
    pub id: i64,
    pub job_id: JobId,
    pub failed_only: bool,
    pub state: JobQueueState,
    /// Not picked up before this time (epoch ms)
    pub retry_at: i64,
    pub time_of_creation: i64,
}

impl RerunEntry {
    pub fn new(job_id: JobId, failed_only: bool, now: i64) -> Self {
        Self {
            id: 0,
            job_id,
            failed_only,
            state: JobQueueState::Waiting,
            retry_at: now,
            time_of_creation: now,
        }
    }
}
