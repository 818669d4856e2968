// Job Domain Model

use crate::domain::error::{DomainError, Result};
use crate::domain::message::{PROCESSOR_ACCTEST_DESTINATION, PROCESSOR_BUSINESS_DESTINATION};
use crate::domain::state::{Phase, State};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Job ID (assigned by the store, increasing)
pub type JobId = i64;

/// Kind of job, selects the processor shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Transient,
    Persistent,
    Test,
    Acctest,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Transient => "TRANSIENT",
            JobType::Persistent => "PERSISTENT",
            JobType::Test => "TEST",
            JobType::Acctest => "ACCTEST",
        }
    }
}

impl FromStr for JobType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "TRANSIENT" => Ok(JobType::Transient),
            "PERSISTENT" => Ok(JobType::Persistent),
            "TEST" => Ok(JobType::Test),
            "ACCTEST" => Ok(JobType::Acctest),
            _ => Err(DomainError::UnknownValue {
                kind: "job type",
                value: s.to_string(),
            }),
        }
    }
}

/// Message priority (higher number = delivered first)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    /// Reserved for control messages such as job abort notices
    Highest,
}

impl Priority {
    pub fn value(&self) -> i32 {
        match self {
            Priority::Low => 1,
            Priority::Normal => 4,
            Priority::High => 7,
            Priority::Highest => 9,
        }
    }

    pub fn from_value(value: i32) -> Self {
        match value {
            i32::MIN..=2 => Priority::Low,
            3..=5 => Priority::Normal,
            6..=8 => Priority::High,
            _ => Priority::Highest,
        }
    }
}

/// What to run: data file, its format and who submitted it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpecification {
    pub packaging: String,
    pub format: String,
    pub charset: String,
    pub destination: String,
    pub submitter_id: i64,
    pub data_file: String,
    pub job_type: JobType,
    #[serde(default)]
    pub priority: Priority,
}

impl JobSpecification {
    /// Processor destination, sharded by acceptance-test vs. business jobs
    pub fn processor_destination(&self) -> &'static str {
        match self.job_type {
            JobType::Acctest => PROCESSOR_ACCTEST_DESTINATION,
            _ => PROCESSOR_BUSINESS_DESTINATION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticLevel {
    Warning,
    Error,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
}

impl Diagnostic {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Fatal,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.level, self.message)
    }
}

/// Job Entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub specification: JobSpecification,
    pub state: State,
    pub flow_cache_id: Option<i64>,
    pub sink_cache_id: Option<i64>,
    pub number_of_chunks: u32,
    pub number_of_items: u64,
    pub fatal_error: bool,
    pub aborted: bool,
    pub diagnostics: Vec<Diagnostic>,
    pub time_of_creation: i64,
    pub time_of_last_modification: i64,
    pub time_of_completion: Option<i64>,
}

impl Job {
    /// New job before it is stored (id is assigned on insert)
    pub fn new(specification: JobSpecification, now: i64) -> Self {
        let mut state = State::default();
        state.partitioning.begin_at = Some(now);
        Self {
            id: 0,
            specification,
            state,
            flow_cache_id: None,
            sink_cache_id: None,
            number_of_chunks: 0,
            number_of_items: 0,
            fatal_error: false,
            aborted: false,
            diagnostics: Vec::new(),
            time_of_creation: now,
            time_of_last_modification: now,
            time_of_completion: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.time_of_completion.is_some()
    }

    pub fn priority(&self) -> Priority {
        self.specification.priority
    }

    /// Record a fatal job-level diagnostic
    pub fn mark_fatal(&mut self, diagnostic: Diagnostic) {
        self.fatal_error = true;
        self.diagnostics.push(diagnostic);
    }

    /// End the partitioning phase and re-evaluate completion.
    /// Returns true if the job completed now.
    pub fn finish_partitioning(&mut self, now: i64) -> bool {
        self.state.end_phase(Phase::Partitioning, now);
        self.refresh_completion(now)
    }

    /// End processing/delivering once every item has an outcome, and set the
    /// completion time once all phases are done. Returns true if the job
    /// completed by this call.
    pub fn refresh_completion(&mut self, now: i64) -> bool {
        self.time_of_last_modification = now;
        if !self.state.phase_is_done(Phase::Partitioning) {
            return false;
        }
        for phase in [Phase::Processing, Phase::Delivering] {
            if self.state.phase(phase).count() >= self.number_of_items {
                self.state.end_phase(phase, now);
            }
        }
        if self.state.all_phases_are_done() && self.time_of_completion.is_none() {
            self.time_of_completion = Some(now);
            return true;
        }
        false
    }
}
