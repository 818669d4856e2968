// Chunk assembly from partitioner output; replay of stored items for reruns

use crate::application::key_generator;
use crate::domain::{
    Chunk, ChunkId, ChunkItem, ChunkItemStatus, ChunkKey, Diagnostic, Item, JobId, OrderingPolicy,
    Phase, State, StateChange,
};
use crate::error::Result;
use crate::port::{
    DataPartitioner, IdProvider, JobStoreRepository, PartitionError, PartitionResult,
};

/// One batch read from a partitioner
pub(crate) struct Batch {
    pub records: Vec<std::result::Result<PartitionResult, PartitionError>>,
    /// Stream-level failure that ended partitioning
    pub fatal: Option<PartitionError>,
    /// No more records follow
    pub exhausted: bool,
}

/// Read up to `max` records; stops early at the end of data or a fatal error
pub(crate) fn next_batch(partitioner: &mut dyn DataPartitioner, max: usize) -> Batch {
    let mut records = Vec::with_capacity(max);
    while records.len() < max {
        match partitioner.next() {
            None => {
                return Batch {
                    records,
                    fatal: None,
                    exhausted: true,
                }
            }
            Some(Err(e)) if e.is_fatal() => {
                return Batch {
                    records,
                    fatal: Some(e),
                    exhausted: true,
                }
            }
            Some(record) => records.push(record),
        }
    }
    Batch {
        records,
        fatal: None,
        exhausted: false,
    }
}

/// Skip records that earlier runs already partitioned. Returns the fatal error
/// if the stream broke while skipping.
pub(crate) fn skip_partitioned(
    partitioner: &mut dyn DataPartitioner,
    count: u64,
) -> Option<PartitionError> {
    for _ in 0..count {
        match partitioner.next() {
            None => return None,
            Some(Err(e)) if e.is_fatal() => return Some(e),
            Some(_) => {}
        }
    }
    None
}

/// Items and chunk row for one batch; nothing is written here
pub(crate) fn assemble_chunk(
    key: ChunkKey,
    data_file_id: &str,
    ordering: OrderingPolicy,
    records: Vec<std::result::Result<PartitionResult, PartitionError>>,
    ids: &dyn IdProvider,
    now: i64,
) -> Result<(Chunk, Vec<Item>)> {
    let mut change = StateChange::new(Phase::Partitioning).begin(now).end(now);
    let items: Vec<Item> = records
        .into_iter()
        .enumerate()
        .map(|(index, record)| {
            let id = index as u32;
            let (outcome, record_info) = match record {
                Ok(result) => (ChunkItem::success(id, result.data), result.record_info),
                Err(e) => (ChunkItem::failure(id, Diagnostic::fatal(e.to_string())), None),
            };
            change.record(outcome.status);
            Item::partitioned(key, outcome, record_info, ids.generate_id(), now)
        })
        .collect();

    let keys = key_generator::chunk_keys(ordering, items.iter().map(|i| i.record_info.as_ref()));
    let mut state = State::default();
    state.update(&change)?;

    let chunk = Chunk {
        job_id: key.job_id,
        chunk_id: key.chunk_id,
        data_file_id: data_file_id.to_string(),
        number_of_items: items.len() as u32,
        keys,
        state,
        time_of_creation: now,
        time_of_completion: None,
    };
    Ok((chunk, items))
}

/// Termination chunk: one JOB_END item that needs no processing
pub(crate) fn assemble_termination_chunk(
    job_id: JobId,
    chunk_id: ChunkId,
    data_file_id: &str,
    tracking_id: String,
    now: i64,
) -> Result<(Chunk, Item)> {
    let key = ChunkKey::new(job_id, chunk_id);
    let mut item = Item::partitioned(key, ChunkItem::job_end(0), None, tracking_id, now);
    item.apply_outcome(Phase::Processing, ChunkItem::job_end(0), None, now)?;

    let mut state = State::default();
    for phase in [Phase::Partitioning, Phase::Processing] {
        state.update(
            &StateChange::for_outcome(phase, ChunkItemStatus::Success)
                .begin(now)
                .end(now),
        )?;
    }
    let chunk = Chunk {
        job_id,
        chunk_id,
        data_file_id: data_file_id.to_string(),
        number_of_items: 1,
        keys: Default::default(),
        state,
        time_of_creation: now,
        time_of_completion: None,
    };
    Ok((chunk, item))
}

/// Replays the stored partitioning outcomes of an earlier job
pub struct StoredItemsPartitioner {
    records: std::vec::IntoIter<std::result::Result<PartitionResult, PartitionError>>,
}

impl StoredItemsPartitioner {
    /// All items of `job_id`, or only those with a failed phase. JOB_END items
    /// are never replayed.
    pub async fn load(
        jobs: &dyn JobStoreRepository,
        job_id: JobId,
        failed_only: bool,
    ) -> Result<Self> {
        let items = jobs.find_job_items(job_id).await?;
        let records: Vec<_> = items
            .into_iter()
            .filter(|item| !item.is_job_end())
            .filter(|item| !failed_only || item.has_failed())
            .enumerate()
            .map(|(position, item)| replay(item, position as u64))
            .collect();
        Ok(Self {
            records: records.into_iter(),
        })
    }
}

fn replay(item: Item, position: u64) -> std::result::Result<PartitionResult, PartitionError> {
    match item.partitioning_outcome {
        Some(outcome) if outcome.status != ChunkItemStatus::Failure => Ok(PartitionResult {
            data: outcome.data,
            record_info: item.record_info,
            position,
        }),
        Some(outcome) => Err(PartitionError::InvalidData {
            position,
            message: outcome
                .diagnostics
                .first()
                .map(|d| d.message.clone())
                .unwrap_or_else(|| "partitioning failed".to_string()),
        }),
        None => Err(PartitionError::InvalidData {
            position,
            message: format!("item {}/{} has no stored data", item.key(), item.id),
        }),
    }
}

impl Iterator for StoredItemsPartitioner {
    type Item = std::result::Result<PartitionResult, PartitionError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.records.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RecordInfo;
    use crate::port::id_provider::mocks::SequentialIdProvider;

    fn record(position: u64, id: &str) -> std::result::Result<PartitionResult, PartitionError> {
        Ok(PartitionResult {
            data: format!("record {}", id),
            record_info: Some(RecordInfo {
                id: id.to_string(),
                parent_id: None,
                agency_id: None,
            }),
            position,
        })
    }

    #[test]
    fn test_batches_of_max_size() {
        let mut records = (0..25).map(|i| record(i, "r")).collect::<Vec<_>>().into_iter();
        let sizes: Vec<usize> = std::iter::from_fn(|| {
            let batch = next_batch(&mut records, 10);
            (!batch.records.is_empty()).then_some(batch.records.len())
        })
        .collect();
        assert_eq!(sizes, vec![10, 10, 5]);
    }

    #[test]
    fn test_fatal_error_ends_batch_keeping_records() {
        let mut records = vec![
            record(0, "a"),
            Err(PartitionError::InvalidData {
                position: 1,
                message: "bad".to_string(),
            }),
            Err(PartitionError::PrematureEndOfData("eof".to_string())),
            record(3, "never"),
        ]
        .into_iter();
        let batch = next_batch(&mut records, 10);
        assert_eq!(batch.records.len(), 2);
        assert!(batch.exhausted);
        assert!(matches!(batch.fatal, Some(PartitionError::PrematureEndOfData(_))));
    }

    #[test]
    fn test_item_error_fails_only_that_item() {
        let ids = SequentialIdProvider::default();
        let key = ChunkKey::new(1, 0);
        let records = vec![
            record(0, "rec1"),
            Err(PartitionError::InvalidData {
                position: 1,
                message: "broken".to_string(),
            }),
        ];
        let (chunk, items) =
            assemble_chunk(key, "f", OrderingPolicy::PerRecord, records, &ids, 7).unwrap();
        assert_eq!(chunk.number_of_items, 2);
        assert_eq!(chunk.state.partitioning.succeeded, 1);
        assert_eq!(chunk.state.partitioning.failed, 1);
        assert!(chunk.state.phase_is_done(Phase::Partitioning));
        assert_eq!(chunk.keys.len(), 1);
        assert_eq!(items[1].state.partitioning.failed, 1);
        assert_eq!(items[0].tracking_id, "t-1");
    }

    #[test]
    fn test_assembled_chunk_seals_partitioning() {
        let ids = SequentialIdProvider::default();
        let (mut chunk, items) = assemble_chunk(
            ChunkKey::new(1, 0),
            "f",
            OrderingPolicy::None,
            vec![record(0, "a")],
            &ids,
            7,
        )
        .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(chunk.state.partitioning.begin_at, Some(7));
        assert_eq!(chunk.state.partitioning.end_at, Some(7));
        let late = StateChange::new(Phase::Partitioning).end(8);
        tokio_test::assert_err!(chunk.state.update(&late));
        assert_eq!(chunk.state.partitioning.succeeded, 1);
    }

    #[test]
    fn test_termination_chunk_skips_processing() {
        let (chunk, item) = assemble_termination_chunk(3, 4, "f", "t".to_string(), 9).unwrap();
        assert!(item.is_job_end());
        assert!(chunk.state.phase_is_done(Phase::Processing));
        assert!(!chunk.state.phase_is_done(Phase::Delivering));
        assert!(item.processing_outcome.is_some());
    }
}
