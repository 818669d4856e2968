//! Full stack over a file-backed SQLite database and the in-process broker

#![allow(dead_code)]

use jobstore_core::application::{
    BulkSubmitter, ChunkResultOutcome, DependencyTracker, JobQueueWatcher, JobStoreService,
    QueueStatusRegistry, QueueStatusSnapshot, RecoveryService, RerunService, SchedulerConfig,
    Scheduler,
};
use jobstore_core::domain::{
    ChunkItemStatus, ChunkMessage, ChunkResult, Flow, Job, JobId, JobSpecification, JobType,
    MessagePayload, OrderingPolicy, OutboundMessage, Phase, Priority, QueuePhase, Sink,
    PROCESSOR_ACCTEST_DESTINATION, PROCESSOR_BUSINESS_DESTINATION,
};
use jobstore_core::error::Result;
use jobstore_core::port::id_provider::mocks::SequentialIdProvider;
use jobstore_core::port::time_provider::mocks::ManualTimeProvider;
use jobstore_core::port::{FlowBindingRule, MessageSource, StaticFlowStore};
use jobstore_infra_io::{ChannelBroker, FileSystemPartitionerFactory, Mailboxes};
use jobstore_infra_sqlite::{
    create_pool, run_migrations, SqliteDependencyTracking, SqliteJobQueue, SqliteJobStore,
    SqliteNotificationStore, SqlitePool, SqliteRerunQueue,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const SINK_DESTINATION: &str = "sink::dummy";
pub const SINK_ID: i64 = 5;

/// Database file and data directory shared by every stack opened on it
pub struct Env {
    dir: TempDir,
}

impl Env {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        Self { dir }
    }

    pub fn database_url(&self) -> String {
        format!("sqlite://{}", self.dir.path().join("jobstore.db").display())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    /// Write a data file, one line per entry
    pub fn write_lines(&self, name: &str, lines: &[String]) {
        let mut content = lines.join("\n");
        content.push('\n');
        std::fs::write(self.data_dir().join(name), content).unwrap();
    }

    pub fn write_raw(&self, name: &str, content: &str) {
        std::fs::write(self.data_dir().join(name), content).unwrap();
    }
}

pub fn sink(ordering: OrderingPolicy, job_termination: bool) -> Sink {
    Sink {
        id: SINK_ID,
        version: 1,
        name: "dummy".to_string(),
        destination: SINK_DESTINATION.to_string(),
        ordering,
        job_termination,
    }
}

pub fn config(max_chunk_size: u32, queue_capacity: u64) -> SchedulerConfig {
    SchedulerConfig {
        max_chunk_size,
        queue_capacity,
        clean_sweeps_to_direct: 2,
        rerun_backoff_ms: 1_000,
        ..Default::default()
    }
}

pub fn spec(packaging: &str, data_file: &str) -> JobSpecification {
    JobSpecification {
        packaging: packaging.to_string(),
        format: "marc2".to_string(),
        charset: "utf8".to_string(),
        destination: "broend".to_string(),
        submitter_id: 870970,
        data_file: data_file.to_string(),
        job_type: JobType::Transient,
        priority: Priority::Normal,
    }
}

fn bindings(sink: &Sink) -> Vec<FlowBindingRule> {
    ["lin", "jsonl"]
        .into_iter()
        .map(|packaging| FlowBindingRule {
            packaging: packaging.to_string(),
            format: "marc2".to_string(),
            charset: "utf8".to_string(),
            destination: "broend".to_string(),
            submitter_ids: Vec::new(),
            flow: Flow {
                id: 1,
                version: 1,
                name: "broend-flow".to_string(),
                content: serde_json::json!({"script": "noop"}),
            },
            sink: sink.clone(),
        })
        .collect()
}

pub fn lines(count: usize, line: impl Fn(usize) -> String) -> Vec<String> {
    (0..count).map(line).collect()
}

pub struct Stack {
    pub pool: SqlitePool,
    pub jobs: Arc<JobStoreService>,
    pub tracker: Arc<DependencyTracker>,
    pub registry: Arc<QueueStatusRegistry>,
    pub bulk: Arc<BulkSubmitter>,
    pub watcher: Arc<JobQueueWatcher>,
    pub reruns: Arc<RerunService>,
    pub recovery: RecoveryService,
    pub mailboxes: Arc<Mailboxes>,
    pub notifications: Arc<SqliteNotificationStore>,
    pub job_queue: Arc<SqliteJobQueue>,
    pub clock: Arc<ManualTimeProvider>,
}

impl Stack {
    pub async fn open(env: &Env, sink: Sink, config: SchedulerConfig) -> Self {
        let pool = create_pool(&env.database_url()).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let clock = Arc::new(ManualTimeProvider::new(1_000));
        let job_store = Arc::new(SqliteJobStore::new(pool.clone()));
        let tracking = Arc::new(SqliteDependencyTracking::new(pool.clone()));
        let job_queue = Arc::new(SqliteJobQueue::new(pool.clone()));
        let rerun_queue = Arc::new(SqliteRerunQueue::new(pool.clone()));
        let notifications = Arc::new(SqliteNotificationStore::new(pool.clone()));

        let broker = Arc::new(ChannelBroker::new(1_000));
        let mailboxes = Arc::new(Mailboxes::open(
            &broker,
            [
                PROCESSOR_BUSINESS_DESTINATION,
                PROCESSOR_ACCTEST_DESTINATION,
                SINK_DESTINATION,
            ],
        ));

        let registry = Arc::new(QueueStatusRegistry::new(config.queue_capacity));
        let scheduler = Arc::new(Scheduler::new(
            job_store.clone(),
            tracking.clone(),
            broker.clone(),
            registry.clone(),
        ));
        let tracker = Arc::new(DependencyTracker::new(tracking.clone(), scheduler.clone()));
        let jobs = Arc::new(JobStoreService::new(
            job_store,
            Arc::new(StaticFlowStore::new(bindings(&sink))),
            Arc::new(FileSystemPartitionerFactory::new(env.data_dir())),
            tracker.clone(),
            broker,
            notifications.clone(),
            Arc::new(SequentialIdProvider::default()),
            clock.clone(),
            config.clone(),
        ));
        let reruns = Arc::new(RerunService::new(
            rerun_queue.clone(),
            jobs.clone(),
            clock.clone(),
            config.rerun_backoff_ms,
        ));
        let watcher = Arc::new(JobQueueWatcher::new(job_queue.clone(), jobs.clone()));
        let bulk = Arc::new(BulkSubmitter::new(tracking.clone(), scheduler, config));
        let recovery =
            RecoveryService::new(job_queue.clone(), rerun_queue, tracking, registry.clone());

        Self {
            pool,
            jobs,
            tracker,
            registry,
            bulk,
            watcher,
            reruns,
            recovery,
            mailboxes,
            notifications,
            job_queue,
            clock,
        }
    }

    pub async fn add_job(&self, packaging: &str, data_file: &str) -> Job {
        self.jobs.add_job(spec(packaging, data_file)).await.unwrap()
    }

    /// One watcher pass, waiting for every partitioning it started
    pub async fn partition(&self) {
        for handle in self.watcher.tick().await.unwrap() {
            handle.await.unwrap();
        }
    }

    pub async fn job(&self, job_id: JobId) -> Job {
        self.jobs.get_job(job_id).await.unwrap()
    }

    pub async fn poll(&self, destination: &str) -> Vec<OutboundMessage> {
        self.mailboxes.poll(destination, 1_000).await.unwrap()
    }

    pub async fn poll_chunks(&self, destination: &str) -> Vec<ChunkMessage> {
        self.poll(destination)
            .await
            .into_iter()
            .filter_map(|m| match m.payload {
                MessagePayload::Chunk(chunk) => Some(chunk),
                MessagePayload::JobAbort { .. } => None,
            })
            .collect()
    }

    /// Report `phase` for a received chunk, every item with `status`
    pub async fn confirm(
        &self,
        message: &ChunkMessage,
        phase: Phase,
        status: ChunkItemStatus,
    ) -> Result<ChunkResultOutcome> {
        let items = message
            .items
            .iter()
            .cloned()
            .map(|item| item.with_status(status))
            .collect();
        self.jobs
            .handle_chunk_result(ChunkResult {
                job_id: message.job_id,
                chunk_id: message.chunk_id,
                phase,
                items,
                next: None,
            })
            .await
    }

    /// Process every chunk waiting at the processor, returning their ids
    pub async fn process_all(&self) -> Vec<u32> {
        let mut done = Vec::new();
        for message in self.poll_chunks(PROCESSOR_BUSINESS_DESTINATION).await {
            self.confirm(&message, Phase::Processing, ChunkItemStatus::Success)
                .await
                .unwrap();
            done.push(message.chunk_id);
        }
        done
    }

    /// Deliver every chunk waiting at the sink, returning their ids
    pub async fn deliver_all(&self) -> Vec<u32> {
        let mut done = Vec::new();
        for message in self.poll_chunks(SINK_DESTINATION).await {
            self.confirm(&message, Phase::Delivering, ChunkItemStatus::Success)
                .await
                .unwrap();
            done.push(message.chunk_id);
        }
        done
    }

    /// One bulk tick plus time for the sweep it launched to finish
    pub async fn settle(&self) {
        self.bulk.tick();
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    pub fn status(&self, phase: QueuePhase) -> QueueStatusSnapshot {
        self.registry
            .snapshot()
            .into_iter()
            .find(|s| s.sink_id == SINK_ID && s.phase == phase)
            .unwrap_or_else(|| panic!("no queue status for {}", phase))
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
