// Partitioner Port - turns a data file into a lazy, one-shot record sequence

use crate::domain::{JobSpecification, RecordInfo};
use crate::error::Result;
use async_trait::async_trait;
use thiserror::Error;

/// One record read from the data file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionResult {
    pub data: String,
    pub record_info: Option<RecordInfo>,
    /// Position of the record in the data file
    pub position: u64,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    /// The record at `position` is unusable; later records may still be read
    #[error("Invalid data at position {position}: {message}")]
    InvalidData { position: u64, message: String },

    /// The stream ended mid-record; nothing more can be read
    #[error("Premature end of data: {0}")]
    PrematureEndOfData(String),
}

impl PartitionError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, PartitionError::PrematureEndOfData(_))
    }
}

/// Finite, non-restartable record sequence
pub trait DataPartitioner:
    Iterator<Item = std::result::Result<PartitionResult, PartitionError>> + Send
{
}

impl<T> DataPartitioner for T where
    T: Iterator<Item = std::result::Result<PartitionResult, PartitionError>> + Send
{
}

/// Opens a fresh partitioner over a job's data file
#[async_trait]
pub trait PartitionerFactory: Send + Sync {
    async fn open(&self, specification: &JobSpecification) -> Result<Box<dyn DataPartitioner>>;
}

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::{Mutex, PoisonError};

    type Records = Vec<std::result::Result<PartitionResult, PartitionError>>;

    /// Serves prepared record sequences keyed by data file name
    #[derive(Default)]
    pub struct StaticPartitionerFactory {
        files: Mutex<HashMap<String, Records>>,
    }

    impl StaticPartitionerFactory {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_file(self, data_file: impl Into<String>, records: Records) -> Self {
            self.files
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(data_file.into(), records);
            self
        }

        /// `count` valid records with ids produced by `id_of`
        pub fn records(count: u64, id_of: impl Fn(u64) -> String) -> Records {
            (0..count)
                .map(|position| {
                    let id = id_of(position);
                    Ok(PartitionResult {
                        data: format!("{{\"id\":\"{}\"}}", id),
                        record_info: Some(RecordInfo {
                            id,
                            parent_id: None,
                            agency_id: Some(870970),
                        }),
                        position,
                    })
                })
                .collect()
        }
    }

    #[async_trait]
    impl PartitionerFactory for StaticPartitionerFactory {
        async fn open(
            &self,
            specification: &JobSpecification,
        ) -> Result<Box<dyn DataPartitioner>> {
            let records = self
                .files
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&specification.data_file)
                .cloned()
                .ok_or_else(|| {
                    AppError::NotFound(format!("Data file {}", specification.data_file))
                })?;
            Ok(Box::new(records.into_iter()))
        }
    }
}
