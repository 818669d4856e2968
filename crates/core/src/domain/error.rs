// Domain Error Types

use crate::domain::Phase;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid scheduling transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Phase {phase} is already done")]
    PhaseAlreadyDone { phase: Phase },

    #[error("Unknown value '{value}' for {kind}")]
    UnknownValue { kind: &'static str, value: String },

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
