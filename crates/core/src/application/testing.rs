// Shared fixtures for application tests

use crate::application::dependency_tracker::DependencyTracker;
use crate::application::queue_status::QueueStatusRegistry;
use crate::application::scheduler::Scheduler;
use crate::domain::{
    Chunk, ChunkItem, ChunkKey, ChunkId, Flow, Item, Job, JobId, JobSpecification, JobType,
    OrderingPolicy, Phase, Priority, RecordInfo, Sink, State, StateChange,
    PROCESSOR_BUSINESS_DESTINATION,
};
use crate::port::dependency_tracking::mocks::InMemoryDependencyTracking;
use crate::port::job_store::mocks::InMemoryJobStore;
use crate::port::message_sender::mocks::RecordingMessageSender;
use crate::port::{DependencyTrackingRepository, JobStoreRepository, MessageSender};
use std::collections::BTreeSet;
use std::sync::Arc;

pub(crate) fn spec(data_file: &str) -> JobSpecification {
    JobSpecification {
        packaging: "lin".to_string(),
        format: "marc2".to_string(),
        charset: "utf8".to_string(),
        destination: "broend".to_string(),
        submitter_id: 870970,
        data_file: data_file.to_string(),
        job_type: JobType::Transient,
        priority: Priority::Normal,
    }
}

pub(crate) fn flow() -> Flow {
    Flow {
        id: 1,
        version: 1,
        name: "broend-flow".to_string(),
        content: serde_json::json!({"script": "noop"}),
    }
}

pub(crate) fn sink(ordering: OrderingPolicy, job_termination: bool) -> Sink {
    Sink {
        id: 5,
        version: 1,
        name: "dummy".to_string(),
        destination: "sink::dummy".to_string(),
        ordering,
        job_termination,
    }
}

pub(crate) struct Harness {
    pub jobs: Arc<InMemoryJobStore>,
    pub tracking: Arc<InMemoryDependencyTracking>,
    pub sender: Arc<RecordingMessageSender>,
    pub registry: Arc<QueueStatusRegistry>,
    pub scheduler: Arc<Scheduler>,
    pub tracker: Arc<DependencyTracker>,
    pub sink: Sink,
    pub job_id: JobId,
}

impl Harness {
    /// Scheduler and tracker over in-memory stores, with one stored job
    pub async fn new(capacity: u64) -> Self {
        let jobs = Arc::new(InMemoryJobStore::new());
        let tracking = Arc::new(InMemoryDependencyTracking::new());
        let sender = Arc::new(RecordingMessageSender::new());
        let registry = Arc::new(QueueStatusRegistry::new(capacity));
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&jobs) as Arc<dyn JobStoreRepository>,
            Arc::clone(&tracking) as Arc<dyn DependencyTrackingRepository>,
            Arc::clone(&sender) as Arc<dyn MessageSender>,
            Arc::clone(&registry),
        ));
        let tracker = Arc::new(DependencyTracker::new(
            Arc::clone(&tracking) as Arc<dyn DependencyTrackingRepository>,
            Arc::clone(&scheduler),
        ));
        let sink = sink(OrderingPolicy::PerRecord, false);

        let mut tx = jobs.begin_transaction().await.unwrap();
        let mut job = Job::new(spec("data.jsonl"), 0);
        job.flow_cache_id = Some(tx.cache_flow(&flow()).await.unwrap());
        job.sink_cache_id = Some(tx.cache_sink(&sink).await.unwrap());
        let job_id = tx.insert_job(&job).await.unwrap();
        tx.commit().await.unwrap();

        Self {
            jobs,
            tracking,
            sender,
            registry,
            scheduler,
            tracker,
            sink,
            job_id,
        }
    }

    /// Store a chunk with one already processed item per record id
    pub async fn seed_chunk(&self, chunk_id: ChunkId, record_ids: &[&str]) -> Chunk {
        let key = ChunkKey::new(self.job_id, chunk_id);
        let ids: Vec<Option<&str>> = if record_ids.is_empty() {
            vec![None]
        } else {
            record_ids.iter().map(|id| Some(*id)).collect()
        };

        let mut tx = self.jobs.begin_transaction().await.unwrap();
        let mut state = State::default();
        for (index, id) in ids.iter().enumerate() {
            let record_info = id.map(|id| RecordInfo {
                id: id.to_string(),
                parent_id: None,
                agency_id: None,
            });
            let mut item = Item::partitioned(
                key,
                ChunkItem::success(index as u32, "data"),
                record_info,
                format!("t-{}-{}", chunk_id, index),
                0,
            );
            item.processing_outcome = Some(ChunkItem::success(index as u32, "processed"));
            tx.insert_item(&item).await.unwrap();
        }
        let mut change = StateChange::new(Phase::Partitioning).begin(0).end(0);
        change.succeeded = ids.len() as u64;
        state.update(&change).unwrap();

        let chunk = Chunk {
            job_id: self.job_id,
            chunk_id,
            data_file_id: "data.jsonl".to_string(),
            number_of_items: ids.len() as u32,
            keys: record_ids.iter().map(|id| id.to_string()).collect::<BTreeSet<_>>(),
            state,
            time_of_creation: 0,
            time_of_completion: None,
        };
        tx.insert_chunk(&chunk).await.unwrap();
        tx.commit().await.unwrap();
        chunk
    }

    pub fn processed(&self) -> Vec<ChunkKey> {
        self.sender.chunks_sent_to(PROCESSOR_BUSINESS_DESTINATION)
    }

    pub fn delivered(&self) -> Vec<ChunkKey> {
        self.sender.chunks_sent_to(&self.sink.destination)
    }
}

pub(crate) fn binding_rule(sink: &Sink) -> crate::port::FlowBindingRule {
    let spec = spec("any");
    crate::port::FlowBindingRule {
        packaging: spec.packaging,
        format: spec.format,
        charset: spec.charset,
        destination: spec.destination,
        submitter_ids: Vec::new(),
        flow: flow(),
        sink: sink.clone(),
    }
}

/// Job store service over the harness stores
pub(crate) struct ServiceFixture {
    pub service: Arc<crate::application::JobStoreService>,
    pub notifier: Arc<crate::port::notifier::mocks::RecordingNotifier>,
}

impl Harness {
    pub fn service(
        &self,
        sink: &Sink,
        partitioners: crate::port::partitioner::mocks::StaticPartitionerFactory,
        config: crate::application::SchedulerConfig,
    ) -> ServiceFixture {
        use crate::port::id_provider::mocks::SequentialIdProvider;
        use crate::port::notifier::mocks::RecordingNotifier;
        use crate::port::time_provider::mocks::ManualTimeProvider;
        use crate::port::StaticFlowStore;

        let notifier = Arc::new(RecordingNotifier::new());
        let service = Arc::new(crate::application::JobStoreService::new(
            Arc::clone(&self.jobs) as Arc<dyn JobStoreRepository>,
            Arc::new(StaticFlowStore::new(vec![binding_rule(sink)])),
            Arc::new(partitioners),
            Arc::clone(&self.tracker),
            Arc::clone(&self.sender) as Arc<dyn MessageSender>,
            Arc::clone(&notifier) as Arc<dyn crate::port::JobNotifier>,
            Arc::new(SequentialIdProvider::default()),
            Arc::new(ManualTimeProvider::new(1_000)),
            config,
        ));
        ServiceFixture { service, notifier }
    }
}
