//! Composition root: adapters and services wired together

use crate::config::DaemonConfig;
use jobstore_api_rpc::RpcHandler;
use jobstore_core::application::{
    BulkSubmitter, DependencyTracker, JobQueueWatcher, JobStoreService, QueueStatusRegistry,
    RecoveryService, RerunService, Scheduler,
};
use jobstore_core::domain::{PROCESSOR_ACCTEST_DESTINATION, PROCESSOR_BUSINESS_DESTINATION};
use jobstore_core::port::id_provider::UuidProvider;
use jobstore_core::port::time_provider::SystemTimeProvider;
use jobstore_core::port::StaticFlowStore;
use jobstore_infra_io::{ChannelBroker, FileSystemPartitionerFactory, Mailboxes};
use jobstore_infra_sqlite::{
    SqliteDependencyTracking, SqliteJobQueue, SqliteJobStore, SqliteNotificationStore,
    SqlitePool, SqliteRerunQueue,
};
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct Services {
    pub reruns: Arc<RerunService>,
    pub watcher: Arc<JobQueueWatcher>,
    pub bulk: Arc<BulkSubmitter>,
    pub recovery: RecoveryService,
    pub rpc: Arc<RpcHandler>,
    pub destinations: Vec<String>,
}

/// Every destination the broker must accept: both processor shards plus each bound sink
fn destinations(config: &DaemonConfig) -> Vec<String> {
    let mut names: BTreeSet<String> =
        [PROCESSOR_BUSINESS_DESTINATION, PROCESSOR_ACCTEST_DESTINATION]
            .into_iter()
            .map(String::from)
            .collect();
    names.extend(config.bindings.iter().map(|b| b.sink.destination.clone()));
    names.into_iter().collect()
}

pub fn build(config: &DaemonConfig, pool: SqlitePool) -> Services {
    let clock = Arc::new(SystemTimeProvider);
    let scheduler_config = config.scheduler.clone();

    let job_store = Arc::new(SqliteJobStore::new(pool.clone()));
    let tracking = Arc::new(SqliteDependencyTracking::new(pool.clone()));
    let job_queue = Arc::new(SqliteJobQueue::new(pool.clone()));
    let rerun_queue = Arc::new(SqliteRerunQueue::new(pool.clone()));
    let notifier = Arc::new(SqliteNotificationStore::new(pool));

    // the cap keeps every destination below this bound; aborts may add a few
    let broker = Arc::new(ChannelBroker::new(
        (scheduler_config.queue_capacity as usize).saturating_mul(2),
    ));
    let destinations = destinations(config);
    let mailboxes = Arc::new(Mailboxes::open(&broker, destinations.clone()));

    let registry = Arc::new(QueueStatusRegistry::new(scheduler_config.queue_capacity));
    let scheduler = Arc::new(Scheduler::new(
        job_store.clone(),
        tracking.clone(),
        broker.clone(),
        registry.clone(),
    ));
    let tracker = Arc::new(DependencyTracker::new(tracking.clone(), scheduler.clone()));

    let jobs = Arc::new(JobStoreService::new(
        job_store,
        Arc::new(StaticFlowStore::new(config.bindings.clone())),
        Arc::new(FileSystemPartitionerFactory::new(config.data_dir())),
        tracker,
        broker,
        notifier,
        Arc::new(UuidProvider),
        clock.clone(),
        scheduler_config.clone(),
    ));
    let reruns = Arc::new(RerunService::new(
        rerun_queue.clone(),
        jobs.clone(),
        clock,
        scheduler_config.rerun_backoff_ms,
    ));
    let watcher = Arc::new(JobQueueWatcher::new(job_queue.clone(), jobs.clone()));
    let bulk = Arc::new(BulkSubmitter::new(
        tracking.clone(),
        scheduler,
        scheduler_config,
    ));
    let recovery = RecoveryService::new(job_queue, rerun_queue, tracking, registry.clone());
    let rpc = Arc::new(RpcHandler::new(
        jobs.clone(),
        reruns.clone(),
        registry,
        mailboxes,
    ));

    Services {
        reruns,
        watcher,
        bulk,
        recovery,
        rpc,
        destinations,
    }
}
