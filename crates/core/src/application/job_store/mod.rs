//! Job store service - jobs, chunks and items through their phases
//!
//! Every mutation runs in its own unit of work. Outcome writes are validated
//! completely before anything is written, so a rejected chunk leaves no trace.

mod partitioning;

pub use partitioning::StoredItemsPartitioner;

use crate::application::config::SchedulerConfig;
use crate::application::dependency_tracker::DependencyTracker;
use crate::application::key_generator;
use crate::application::worker::constants::JOB_END_DATA_FILE_ID;
use crate::domain::{
    Chunk, ChunkId, ChunkItem, ChunkKey, ChunkResult, Diagnostic, Item, Job, JobId,
    JobQueueEntry, JobSpecification, MessagePayload, OutboundMessage, PartitioningSource, Phase,
    Priority, Sink, StateChange,
};
use crate::error::{AppError, Result};
use crate::port::{
    DataPartitioner, FlowStore, IdProvider, JobNotifier, JobStoreRepository, MessageSender,
    PartitionError, PartitionerFactory, TimeProvider,
};
use partitioning::{assemble_chunk, assemble_termination_chunk, next_batch, skip_partitioned};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Result of folding a chunk result in
#[derive(Debug, Clone)]
pub struct ChunkResultOutcome {
    /// False when every outcome was already recorded
    pub applied: bool,
    pub job: Option<Job>,
}

pub struct JobStoreService {
    jobs: Arc<dyn JobStoreRepository>,
    flows: Arc<dyn FlowStore>,
    partitioners: Arc<dyn PartitionerFactory>,
    tracker: Arc<DependencyTracker>,
    sender: Arc<dyn MessageSender>,
    notifier: Arc<dyn JobNotifier>,
    ids: Arc<dyn IdProvider>,
    clock: Arc<dyn TimeProvider>,
    config: SchedulerConfig,
}

impl JobStoreService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        jobs: Arc<dyn JobStoreRepository>,
        flows: Arc<dyn FlowStore>,
        partitioners: Arc<dyn PartitionerFactory>,
        tracker: Arc<DependencyTracker>,
        sender: Arc<dyn MessageSender>,
        notifier: Arc<dyn JobNotifier>,
        ids: Arc<dyn IdProvider>,
        clock: Arc<dyn TimeProvider>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            jobs,
            flows,
            partitioners,
            tracker,
            sender,
            notifier,
            ids,
            clock,
            config,
        }
    }

    /// Create a job and queue it for partitioning.
    ///
    /// A specification without a flow binding yields a job that is already
    /// complete, marked fatal.
    pub async fn add_job(&self, specification: JobSpecification) -> Result<Job> {
        self.create_job(specification, PartitioningSource::DataFile)
            .await
    }

    /// New job replaying the items of `of_job` (all, or only failed ones)
    pub async fn create_rerun_job(&self, of_job: JobId, failed_only: bool) -> Result<Job> {
        let original = self
            .jobs
            .find_job(of_job)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job {}", of_job)))?;
        let job = self
            .create_job(
                original.specification,
                PartitioningSource::Rerun {
                    of_job,
                    failed_only,
                },
            )
            .await?;
        info!(job_id = job.id, of_job, failed_only, "Rerun job created");
        Ok(job)
    }

    async fn create_job(
        &self,
        specification: JobSpecification,
        source: PartitioningSource,
    ) -> Result<Job> {
        let now = self.clock.now_millis();
        let binding = self.flows.resolve(&specification).await?;
        let mut job = Job::new(specification, now);

        let mut tx = self.jobs.begin_transaction().await?;
        let Some(binding) = binding else {
            let spec = &job.specification;
            let diagnostic = Diagnostic::fatal(format!(
                "No flow binding for packaging={} format={} charset={} destination={} submitter={}",
                spec.packaging, spec.format, spec.charset, spec.destination, spec.submitter_id
            ));
            fail_job(&mut job, diagnostic, now);
            job.id = tx.insert_job(&job).await?;
            tx.commit().await?;
            warn!(job_id = job.id, "Job has no flow binding");
            self.notify(&job).await;
            return Ok(job);
        };

        job.flow_cache_id = Some(tx.cache_flow(&binding.flow).await?);
        job.sink_cache_id = Some(tx.cache_sink(&binding.sink).await?);
        job.id = tx.insert_job(&job).await?;
        tx.enqueue_partitioning(&JobQueueEntry::new(job.id, binding.sink.id, source, now))
            .await?;
        tx.commit().await?;

        info!(job_id = job.id, sink_id = binding.sink.id, "Job added");
        Ok(job)
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<Job> {
        self.jobs
            .find_job(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job {}", job_id)))
    }

    /// Partition a job chunk by chunk, resuming after the chunks already stored
    pub async fn partition_job(&self, job_id: JobId, source: PartitioningSource) -> Result<Job> {
        let job = self.get_job(job_id).await?;
        if job.aborted {
            return Err(AppError::JobAborted(job_id));
        }
        if job.state.phase_is_done(Phase::Partitioning) {
            return Ok(job);
        }
        let Some(sink) = self.jobs.find_cached_sink(job_id).await? else {
            return self
                .fail_stored_job(job_id, Diagnostic::fatal("Job has no cached sink"))
                .await;
        };

        let mut partitioner: Box<dyn DataPartitioner> = match source {
            PartitioningSource::DataFile => match self.partitioners.open(&job.specification).await
            {
                Ok(partitioner) => partitioner,
                Err(e) => {
                    error!(job_id, error = %e, "Unable to open data file");
                    return self
                        .fail_stored_job(
                            job_id,
                            Diagnostic::fatal(format!(
                                "Unable to read data file {}: {}",
                                job.specification.data_file, e
                            )),
                        )
                        .await;
                }
            },
            PartitioningSource::Rerun {
                of_job,
                failed_only,
            } => Box::new(StoredItemsPartitioner::load(&*self.jobs, of_job, failed_only).await?),
        };

        let barrier = key_generator::barrier_key(&sink, &job.specification);
        let mut fatal = skip_partitioned(partitioner.as_mut(), job.number_of_items);
        let mut next_chunk_id = job.number_of_chunks;
        if next_chunk_id > 0
            && self
                .reverify_last_chunk(&job, &sink, barrier.as_deref())
                .await?
        {
            return self.finish_partitioning(job_id, None).await;
        }

        let max = self.config.max_chunk_size.max(1) as usize;
        while fatal.is_none() {
            let batch = next_batch(partitioner.as_mut(), max);
            fatal = batch.fatal;
            if !batch.records.is_empty() {
                let chunk = self
                    .create_chunk(job_id, next_chunk_id, &sink, batch.records)
                    .await?;
                self.tracker
                    .track_chunk(&chunk, &sink, job.priority(), barrier.as_deref())
                    .await?;
                next_chunk_id += 1;
            }
            if batch.exhausted {
                break;
            }
        }

        if let Some(e) = &fatal {
            warn!(job_id, error = %e, chunks = next_chunk_id, "Partitioning aborted");
        } else if sink.job_termination {
            self.create_termination_chunk(
                job_id,
                next_chunk_id,
                &sink,
                job.priority(),
                barrier.as_deref(),
            )
            .await?;
        }
        self.finish_partitioning(job_id, fatal).await
    }

    /// Re-track the last stored chunk. Returns true when it is the job's
    /// termination chunk, i.e. partitioning had already run to the end.
    async fn reverify_last_chunk(
        &self,
        job: &Job,
        sink: &Sink,
        barrier: Option<&str>,
    ) -> Result<bool> {
        let key = ChunkKey::new(job.id, job.number_of_chunks - 1);
        let Some(chunk) = self.jobs.find_chunk(key).await? else {
            return Ok(false);
        };
        let is_termination = self
            .jobs
            .find_items(key)
            .await?
            .first()
            .is_some_and(Item::is_job_end);
        if chunk.state.phase_is_done(Phase::Delivering) {
            return Ok(is_termination);
        }
        info!(job_id = job.id, chunk_id = key.chunk_id, "Re-verifying last chunk");
        if is_termination {
            self.tracker
                .track_job_termination(&chunk, sink, job.priority(), barrier)
                .await?;
        } else {
            self.tracker
                .track_chunk(&chunk, sink, job.priority(), barrier)
                .await?;
        }
        Ok(is_termination)
    }

    async fn create_chunk(
        &self,
        job_id: JobId,
        chunk_id: ChunkId,
        sink: &Sink,
        records: Vec<std::result::Result<crate::port::PartitionResult, PartitionError>>,
    ) -> Result<Chunk> {
        let now = self.clock.now_millis();
        let mut tx = self.jobs.begin_transaction().await?;
        let mut job = lock_live_job(tx.as_mut(), job_id).await?;

        let (chunk, items) = assemble_chunk(
            ChunkKey::new(job_id, chunk_id),
            &job.specification.data_file,
            sink.ordering,
            records,
            &*self.ids,
            now,
        )?;
        tx.insert_chunk(&chunk).await?;
        for item in &items {
            tx.insert_item(item).await?;
        }

        let mut change = StateChange::new(Phase::Partitioning).begin(now);
        change.succeeded = chunk.state.partitioning.succeeded;
        change.failed = chunk.state.partitioning.failed;
        change.ignored = chunk.state.partitioning.ignored;
        job.state.update(&change)?;
        job.number_of_chunks = chunk_id + 1;
        job.number_of_items += u64::from(chunk.number_of_items);
        job.time_of_last_modification = now;
        tx.update_job(&job).await?;
        tx.commit().await?;

        info!(job_id, chunk_id, items = chunk.number_of_items, "Chunk created");
        Ok(chunk)
    }

    async fn create_termination_chunk(
        &self,
        job_id: JobId,
        chunk_id: ChunkId,
        sink: &Sink,
        priority: Priority,
        barrier: Option<&str>,
    ) -> Result<()> {
        let now = self.clock.now_millis();
        let mut tx = self.jobs.begin_transaction().await?;
        let mut job = lock_live_job(tx.as_mut(), job_id).await?;

        let (chunk, item) = assemble_termination_chunk(
            job_id,
            chunk_id,
            JOB_END_DATA_FILE_ID,
            self.ids.generate_id(),
            now,
        )?;
        tx.insert_chunk(&chunk).await?;
        tx.insert_item(&item).await?;
        for phase in [Phase::Partitioning, Phase::Processing] {
            let mut change = StateChange::new(phase).begin(now);
            change.succeeded = 1;
            job.state.update(&change)?;
        }
        job.number_of_chunks = chunk_id + 1;
        job.number_of_items += 1;
        job.time_of_last_modification = now;
        tx.update_job(&job).await?;
        tx.commit().await?;

        info!(job_id, chunk_id, "Termination chunk created");
        self.tracker
            .track_job_termination(&chunk, sink, priority, barrier)
            .await?;
        Ok(())
    }

    async fn finish_partitioning(
        &self,
        job_id: JobId,
        fatal: Option<PartitionError>,
    ) -> Result<Job> {
        let now = self.clock.now_millis();
        let mut tx = self.jobs.begin_transaction().await?;
        let mut job = tx
            .lock_job(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job {}", job_id)))?;
        if let Some(e) = fatal {
            job.mark_fatal(Diagnostic::fatal(e.to_string()));
        }
        let completed = job.finish_partitioning(now);
        tx.update_job(&job).await?;
        tx.commit().await?;

        info!(
            job_id,
            chunks = job.number_of_chunks,
            items = job.number_of_items,
            fatal = job.fatal_error,
            "Partitioning finished"
        );
        if completed {
            self.notify(&job).await;
        }
        Ok(job)
    }

    async fn fail_stored_job(&self, job_id: JobId, diagnostic: Diagnostic) -> Result<Job> {
        let now = self.clock.now_millis();
        let mut tx = self.jobs.begin_transaction().await?;
        let mut job = tx
            .lock_job(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job {}", job_id)))?;
        let completed = fail_job(&mut job, diagnostic, now);
        tx.update_job(&job).await?;
        tx.commit().await?;
        if completed {
            self.notify(&job).await;
        }
        Ok(job)
    }

    /// Fold phase outcomes of one chunk in.
    ///
    /// Rejected without changes: PARTITIONING outcomes, a wrong item count,
    /// `next` outside PROCESSING or of the wrong length, unknown item ids.
    /// Outcomes for an item whose phase is already done give `DuplicateChunk`.
    pub async fn add_chunk(&self, result: ChunkResult) -> Result<Job> {
        let key = result.key();
        let phase = result.phase;
        if phase == Phase::Partitioning {
            return Err(AppError::Validation(format!(
                "Chunk {}: partitioning outcomes are created by the job store",
                key
            )));
        }
        if result.next.is_some() && phase != Phase::Processing {
            return Err(AppError::Validation(format!(
                "Chunk {}: next outcomes are only accepted for PROCESSING",
                key
            )));
        }

        let now = self.clock.now_millis();
        let mut tx = self.jobs.begin_transaction().await?;
        let mut job = lock_live_job(tx.as_mut(), key.job_id).await?;
        let mut chunk = tx
            .lock_chunk(key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Chunk {}", key)))?;

        let expected = chunk.number_of_items as usize;
        if result.items.len() != expected {
            return Err(AppError::Validation(format!(
                "Chunk {}: {} items given, {} expected",
                key,
                result.items.len(),
                expected
            )));
        }
        if let Some(next) = &result.next {
            if next.len() != expected {
                return Err(AppError::Validation(format!(
                    "Chunk {}: {} next items given, {} expected",
                    key,
                    next.len(),
                    expected
                )));
            }
        }

        let mut stored: HashMap<u32, Item> = tx
            .find_items(key)
            .await?
            .into_iter()
            .map(|item| (item.id, item))
            .collect();
        for outcome in &result.items {
            let item = stored.get(&outcome.id).ok_or_else(|| {
                AppError::Validation(format!("Chunk {}: unknown item {}", key, outcome.id))
            })?;
            if item.state.phase_is_done(phase) {
                return Err(AppError::DuplicateChunk(format!(
                    "Chunk {}: {} already recorded for item {}",
                    key, phase, outcome.id
                )));
            }
        }

        let mut change = StateChange::new(phase).begin(now);
        let mut next_outcomes = result.next.map(|n| n.into_iter());
        for outcome in result.items {
            let next: Option<ChunkItem> = next_outcomes.as_mut().and_then(Iterator::next);
            let item = stored.get_mut(&outcome.id).ok_or_else(|| {
                AppError::Internal(format!("Chunk {}: item {} vanished", key, outcome.id))
            })?;
            change.record(outcome.status);
            item.apply_outcome(phase, outcome, next, now)?;
            tx.update_item(item).await?;
        }

        chunk.apply(change.clone(), now)?;
        tx.update_chunk(&chunk).await?;
        job.state.update(&change)?;
        let completed = job.refresh_completion(now);
        tx.update_job(&job).await?;
        tx.commit().await?;

        info!(
            job_id = key.job_id,
            chunk_id = key.chunk_id,
            phase = %phase,
            succeeded = change.succeeded,
            failed = change.failed,
            ignored = change.ignored,
            "Chunk outcomes recorded"
        );
        if completed {
            info!(job_id = job.id, "Job completed");
            self.notify(&job).await;
        }
        Ok(job)
    }

    /// Inbound result consumer: record the outcomes, then tell the tracker.
    ///
    /// Duplicates still reach the tracker, which ignores callbacks for chunks
    /// no longer in the matching queued status.
    pub async fn handle_chunk_result(&self, result: ChunkResult) -> Result<ChunkResultOutcome> {
        let key = result.key();
        let phase = result.phase;
        let outcome = match self.add_chunk(result).await {
            Ok(job) => ChunkResultOutcome {
                applied: true,
                job: Some(job),
            },
            Err(AppError::DuplicateChunk(message)) => {
                info!(job_id = key.job_id, chunk_id = key.chunk_id, %message, "Duplicate chunk result");
                ChunkResultOutcome {
                    applied: false,
                    job: None,
                }
            }
            Err(AppError::JobAborted(job_id)) => {
                // frees the slot and the chunks waiting on this one
                self.signal_tracker(key, phase).await?;
                self.release_tracked(job_id).await?;
                return Err(AppError::JobAborted(job_id));
            }
            Err(e) => return Err(e),
        };
        self.signal_tracker(key, phase).await?;
        Ok(outcome)
    }

    async fn signal_tracker(&self, key: ChunkKey, phase: Phase) -> Result<()> {
        match phase {
            Phase::Processing => self.tracker.chunk_processing_done(key).await,
            Phase::Delivering => self.tracker.chunk_delivering_done(key).await,
            Phase::Partitioning => Ok(()),
        }
    }

    /// Flag a job aborted and tell its processors to drop it
    pub async fn abort_job(&self, job_id: JobId) -> Result<Job> {
        let now = self.clock.now_millis();
        let mut tx = self.jobs.begin_transaction().await?;
        let mut job = tx
            .lock_job(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job {}", job_id)))?;
        if job.aborted {
            tx.rollback().await?;
            return Ok(job);
        }
        job.aborted = true;
        job.time_of_last_modification = now;
        tx.update_job(&job).await?;
        tx.commit().await?;
        warn!(job_id, "Job aborted");

        let notice = OutboundMessage {
            destination: job.specification.processor_destination().to_string(),
            priority: Priority::Highest.value(),
            payload: MessagePayload::JobAbort { job_id },
        };
        if let Err(e) = self.sender.send(notice).await {
            warn!(job_id, error = %e, "Unable to send job abort notice");
        }
        self.release_tracked(job_id).await?;
        Ok(job)
    }

    async fn release_tracked(&self, job_id: JobId) -> Result<()> {
        if let Some(sink) = self.jobs.find_cached_sink(job_id).await? {
            self.tracker.release_job(job_id, sink.id).await?;
        }
        Ok(())
    }

    async fn notify(&self, job: &Job) {
        if let Err(e) = self.notifier.job_completed(job).await {
            warn!(job_id = job.id, error = %e, "Unable to queue job notification");
        }
    }
}

async fn lock_live_job(
    tx: &mut dyn crate::port::JobStoreTransaction,
    job_id: JobId,
) -> Result<Job> {
    let job = tx
        .lock_job(job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job {}", job_id)))?;
    if job.aborted {
        return Err(AppError::JobAborted(job_id));
    }
    Ok(job)
}

/// Mark a job fatal and end it with the progress it has. Returns true if the
/// job completed now.
fn fail_job(job: &mut Job, diagnostic: Diagnostic, now: i64) -> bool {
    job.mark_fatal(diagnostic);
    for phase in Phase::ALL {
        job.state.end_phase(phase, now);
    }
    job.time_of_last_modification = now;
    if job.time_of_completion.is_none() {
        job.time_of_completion = Some(now);
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::{self, Harness, ServiceFixture};
    use crate::application::SchedulerConfig;
    use crate::domain::{ChunkItemStatus, OrderingPolicy, RecordInfo};
    use crate::port::partitioner::mocks::StaticPartitionerFactory;
    use crate::port::{DependencyTrackingRepository, NotificationKind, PartitionResult};

    fn records(count: u64) -> Vec<std::result::Result<PartitionResult, PartitionError>> {
        StaticPartitionerFactory::records(count, |i| format!("rec{}", i))
    }

    async fn fixture(
        ordering: OrderingPolicy,
        termination: bool,
        files: StaticPartitionerFactory,
    ) -> (Harness, ServiceFixture) {
        let h = Harness::new(1000).await;
        let sink = testing::sink(ordering, termination);
        let f = h.service(&sink, files, SchedulerConfig::default());
        (h, f)
    }

    async fn added_and_partitioned(f: &ServiceFixture, data_file: &str) -> Job {
        let job = f.service.add_job(testing::spec(data_file)).await.unwrap();
        f.service
            .partition_job(job.id, PartitioningSource::DataFile)
            .await
            .unwrap()
    }

    fn outcomes(count: u32, status: ChunkItemStatus) -> Vec<ChunkItem> {
        (0..count)
            .map(|id| ChunkItem::success(id, "out").with_status(status))
            .collect()
    }

    fn result(job: &Job, chunk_id: ChunkId, phase: Phase, items: Vec<ChunkItem>) -> ChunkResult {
        ChunkResult {
            job_id: job.id,
            chunk_id,
            phase,
            items,
            next: None,
        }
    }

    #[tokio::test]
    async fn test_partitions_into_bounded_chunks() {
        let files = StaticPartitionerFactory::new().with_file("big", records(25));
        let (h, f) = fixture(OrderingPolicy::None, false, files).await;
        let job = added_and_partitioned(&f, "big").await;

        assert_eq!(job.number_of_chunks, 3);
        assert_eq!(job.number_of_items, 25);
        assert!(job.state.phase_is_done(Phase::Partitioning));
        let sizes: Vec<u32> = {
            let mut sizes = Vec::new();
            for chunk_id in 0..3 {
                let chunk = h
                    .jobs
                    .find_chunk(ChunkKey::new(job.id, chunk_id))
                    .await
                    .unwrap()
                    .unwrap();
                sizes.push(chunk.number_of_items);
            }
            sizes
        };
        assert_eq!(sizes, vec![10, 10, 5]);
        assert_eq!(h.processed().len(), 3);
        assert_eq!(h.jobs.queued().await.len(), 1);
    }

    #[tokio::test]
    async fn test_full_lifecycle_completes_job_once() {
        let files = StaticPartitionerFactory::new().with_file("small", records(3));
        let (h, f) = fixture(OrderingPolicy::PerRecord, false, files).await;
        let job = added_and_partitioned(&f, "small").await;

        let processed = f
            .service
            .handle_chunk_result(result(&job, 0, Phase::Processing, outcomes(3, ChunkItemStatus::Success)))
            .await
            .unwrap();
        assert!(processed.applied);
        assert_eq!(h.delivered(), vec![ChunkKey::new(job.id, 0)]);

        let delivered = f
            .service
            .handle_chunk_result(result(&job, 0, Phase::Delivering, outcomes(3, ChunkItemStatus::Ignore)))
            .await
            .unwrap();
        let done = delivered.job.unwrap();
        assert!(done.is_complete());
        assert_eq!(done.state.delivering.ignored, 3);
        assert!(h.tracking.find(ChunkKey::new(job.id, 0)).await.unwrap().is_none());
        assert_eq!(f.notifier.notified(), vec![(job.id, NotificationKind::JobCompleted)]);
    }

    #[tokio::test]
    async fn test_duplicate_result_is_reported_not_applied() {
        let files = StaticPartitionerFactory::new().with_file("small", records(2));
        let (_h, f) = fixture(OrderingPolicy::None, false, files).await;
        let job = added_and_partitioned(&f, "small").await;

        let first = result(&job, 0, Phase::Processing, outcomes(2, ChunkItemStatus::Success));
        f.service.handle_chunk_result(first.clone()).await.unwrap();
        let again = f.service.handle_chunk_result(first.clone()).await.unwrap();
        assert!(!again.applied);
        assert!(matches!(
            f.service.add_chunk(first).await,
            Err(AppError::DuplicateChunk(_))
        ));
        let job = f.service.get_job(job.id).await.unwrap();
        assert_eq!(job.state.processing.succeeded, 2);
    }

    #[tokio::test]
    async fn test_invalid_results_change_nothing() {
        let files = StaticPartitionerFactory::new().with_file("small", records(2));
        let (_h, f) = fixture(OrderingPolicy::None, false, files).await;
        let job = added_and_partitioned(&f, "small").await;

        let wrong_count = result(&job, 0, Phase::Processing, outcomes(1, ChunkItemStatus::Success));
        let partitioning = result(&job, 0, Phase::Partitioning, outcomes(2, ChunkItemStatus::Success));
        let mut unknown = result(&job, 0, Phase::Processing, outcomes(2, ChunkItemStatus::Success));
        unknown.items[1].id = 7;
        let mut next_on_delivery =
            result(&job, 0, Phase::Delivering, outcomes(2, ChunkItemStatus::Success));
        next_on_delivery.next = Some(outcomes(2, ChunkItemStatus::Success));
        let mut short_next = result(&job, 0, Phase::Processing, outcomes(2, ChunkItemStatus::Success));
        short_next.next = Some(outcomes(1, ChunkItemStatus::Success));

        for bad in [wrong_count, partitioning, unknown, next_on_delivery, short_next] {
            let err = f.service.add_chunk(bad).await.unwrap_err();
            assert!(matches!(err, AppError::Validation(_)), "got {err:?}");
        }
        let missing = result(&job, 9, Phase::Processing, outcomes(2, ChunkItemStatus::Success));
        assert!(matches!(
            f.service.add_chunk(missing).await,
            Err(AppError::NotFound(_))
        ));
        let after = f.service.get_job(job.id).await.unwrap();
        assert_eq!(after.state.processing.count(), 0);
        assert_eq!(after.state.delivering.count(), 0);
    }

    #[tokio::test]
    async fn test_next_outcomes_travel_to_the_sink() {
        let files = StaticPartitionerFactory::new().with_file("small", records(1));
        let (h, f) = fixture(OrderingPolicy::None, false, files).await;
        let job = added_and_partitioned(&f, "small").await;

        let mut processed = result(&job, 0, Phase::Processing, outcomes(1, ChunkItemStatus::Success));
        processed.next = Some(vec![ChunkItem::success(0, "next")]);
        f.service.handle_chunk_result(processed).await.unwrap();

        let sent = h.sender.sent();
        let delivery = sent
            .iter()
            .filter_map(OutboundMessage::chunk)
            .find(|c| c.phase == crate::domain::QueuePhase::Delivering)
            .unwrap();
        assert_eq!(delivery.next.as_ref().map(Vec::len), Some(1));
        assert_eq!(delivery.items[0].tracking_id.as_deref(), Some("t-1"));
    }

    #[tokio::test]
    async fn test_missing_binding_makes_fatal_complete_job() {
        let (_h, f) = fixture(OrderingPolicy::None, false, StaticPartitionerFactory::new()).await;
        let mut spec = testing::spec("x");
        spec.destination = "elsewhere".to_string();
        let job = f.service.add_job(spec).await.unwrap();

        assert!(job.fatal_error);
        assert!(job.is_complete());
        assert!(job.state.all_phases_are_done());
        assert_eq!(job.number_of_items, 0);
        assert_eq!(f.notifier.notified(), vec![(job.id, NotificationKind::JobFatal)]);
    }

    #[tokio::test]
    async fn test_unreadable_data_file_fails_job() {
        let (_h, f) = fixture(OrderingPolicy::None, false, StaticPartitionerFactory::new()).await;
        let job = added_and_partitioned(&f, "missing").await;
        assert!(job.fatal_error);
        assert!(job.is_complete());
    }

    #[tokio::test]
    async fn test_premature_end_keeps_partial_chunk() {
        let mut data = records(3);
        data[1] = Err(PartitionError::InvalidData {
            position: 1,
            message: "bad record".to_string(),
        });
        data.push(Err(PartitionError::PrematureEndOfData("cut".to_string())));
        let files = StaticPartitionerFactory::new().with_file("cut", data);
        let (h, f) = fixture(OrderingPolicy::None, true, files).await;
        let job = added_and_partitioned(&f, "cut").await;

        assert!(job.fatal_error);
        assert_eq!(job.number_of_chunks, 1, "no termination chunk after a fatal error");
        assert_eq!(job.number_of_items, 3);
        assert_eq!(job.state.partitioning.failed, 1);
        let items = h.jobs.find_items(ChunkKey::new(job.id, 0)).await.unwrap();
        assert!(items[1].partitioning_outcome.as_ref().unwrap().diagnostics[0]
            .message
            .contains("bad record"));
    }

    #[tokio::test]
    async fn test_termination_chunk_delivered_last() {
        let files = StaticPartitionerFactory::new().with_file("small", records(2));
        let (h, f) = fixture(OrderingPolicy::None, true, files).await;
        let job = added_and_partitioned(&f, "small").await;
        assert_eq!(job.number_of_chunks, 2);
        assert_eq!(job.number_of_items, 3);

        let end = ChunkKey::new(job.id, 1);
        assert_eq!(h.processed(), vec![ChunkKey::new(job.id, 0)]);
        let row = h.tracking.find(end).await.unwrap().unwrap();
        assert_eq!(row.waiting_on.len(), 1);

        f.service
            .handle_chunk_result(result(&job, 0, Phase::Processing, outcomes(2, ChunkItemStatus::Success)))
            .await
            .unwrap();
        f.service
            .handle_chunk_result(result(&job, 0, Phase::Delivering, outcomes(2, ChunkItemStatus::Success)))
            .await
            .unwrap();
        assert_eq!(h.delivered(), vec![ChunkKey::new(job.id, 0), end]);

        let finished = f
            .service
            .handle_chunk_result(ChunkResult {
                job_id: job.id,
                chunk_id: 1,
                phase: Phase::Delivering,
                items: vec![ChunkItem::job_end(0)],
                next: None,
            })
            .await
            .unwrap();
        assert!(finished.job.unwrap().is_complete());
    }

    #[tokio::test]
    async fn test_next_job_waits_for_previous_termination() {
        let files = StaticPartitionerFactory::new()
            .with_file("a", records(2))
            .with_file("b", records(1));
        let (h, f) = fixture(OrderingPolicy::None, true, files).await;
        let first = added_and_partitioned(&f, "a").await;
        let second = added_and_partitioned(&f, "b").await;
        let first_end = ChunkKey::new(first.id, 1);
        let second_start = ChunkKey::new(second.id, 0);

        let row = h.tracking.find(second_start).await.unwrap().unwrap();
        assert_eq!(
            row.waiting_on,
            [ChunkKey::new(first.id, 0), first_end].into_iter().collect()
        );
        // only delivery waits
        assert_eq!(h.processed(), vec![ChunkKey::new(first.id, 0), second_start]);

        f.service
            .handle_chunk_result(result(&second, 0, Phase::Processing, outcomes(1, ChunkItemStatus::Success)))
            .await
            .unwrap();
        f.service
            .handle_chunk_result(result(&first, 0, Phase::Processing, outcomes(2, ChunkItemStatus::Success)))
            .await
            .unwrap();
        f.service
            .handle_chunk_result(result(&first, 0, Phase::Delivering, outcomes(2, ChunkItemStatus::Success)))
            .await
            .unwrap();
        assert_eq!(h.delivered(), vec![ChunkKey::new(first.id, 0), first_end]);

        f.service
            .handle_chunk_result(result(&first, 1, Phase::Delivering, vec![ChunkItem::job_end(0)]))
            .await
            .unwrap();
        assert_eq!(
            h.delivered(),
            vec![ChunkKey::new(first.id, 0), first_end, second_start]
        );
    }

    #[tokio::test]
    async fn test_abort_blocks_outcomes_and_notifies_processor() {
        let files = StaticPartitionerFactory::new().with_file("small", records(2));
        let (h, f) = fixture(OrderingPolicy::None, false, files).await;
        let job = added_and_partitioned(&f, "small").await;

        let aborted = f.service.abort_job(job.id).await.unwrap();
        assert!(aborted.aborted);
        let notice = h.sender.sent().into_iter().last().unwrap();
        assert_eq!(notice.priority, Priority::Highest.value());
        assert_eq!(notice.payload, MessagePayload::JobAbort { job_id: job.id });

        let err = f
            .service
            .handle_chunk_result(result(&job, 0, Phase::Processing, outcomes(2, ChunkItemStatus::Success)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::JobAborted(id) if id == job.id));
        assert!(matches!(
            f.service.partition_job(job.id, PartitioningSource::DataFile).await,
            Err(AppError::JobAborted(_))
        ));
    }

    #[tokio::test]
    async fn test_resume_skips_partitioned_records() {
        let files = StaticPartitionerFactory::new().with_file("big", records(15));
        let (h, f) = fixture(OrderingPolicy::None, false, files).await;
        let job = f.service.add_job(testing::spec("big")).await.unwrap();

        // first chunk stored before a crash
        f.service
            .create_chunk(job.id, 0, &testing::sink(OrderingPolicy::None, false), records(10))
            .await
            .unwrap();

        let job = f
            .service
            .partition_job(job.id, PartitioningSource::DataFile)
            .await
            .unwrap();
        assert_eq!(job.number_of_chunks, 2);
        assert_eq!(job.number_of_items, 15);
        let second = h.jobs.find_items(ChunkKey::new(job.id, 1)).await.unwrap();
        let info: Option<&RecordInfo> = second[0].record_info.as_ref();
        assert_eq!(info.map(|i| i.id.as_str()), Some("rec10"));
        // the chunk stored before the crash was tracked on resume
        assert_eq!(h.processed(), vec![ChunkKey::new(job.id, 0), ChunkKey::new(job.id, 1)]);
    }

    #[tokio::test]
    async fn test_rerun_replays_failed_items_only() {
        let mut data = records(3);
        data[2] = Err(PartitionError::InvalidData {
            position: 2,
            message: "bad".to_string(),
        });
        let files = StaticPartitionerFactory::new().with_file("mixed", data);
        let (h, f) = fixture(OrderingPolicy::None, false, files).await;
        let job = added_and_partitioned(&f, "mixed").await;

        let rerun = f.service.create_rerun_job(job.id, true).await.unwrap();
        let queued = h.jobs.queued().await;
        assert_eq!(
            queued.last().map(|e| e.source),
            Some(PartitioningSource::Rerun {
                of_job: job.id,
                failed_only: true
            })
        );
        let rerun = f
            .service
            .partition_job(
                rerun.id,
                PartitioningSource::Rerun {
                    of_job: job.id,
                    failed_only: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(rerun.number_of_items, 1);
        assert_eq!(rerun.state.partitioning.failed, 1);
    }
}
