//! Root wiring: no global mutable state, every component is constructed and
//! injected explicitly. `Core::open` builds every collaborator, runs
//! recovery once, then starts the background workers; `Core::shutdown`
//! reverses that in dependency order.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::error::CResult;
use crate::ingest::Ingestor;
use crate::kms::field_policy::FieldPolicy;
use crate::kms::Kms;
use crate::monitor::{FsSensor, Monitor, Thresholds};
use crate::queue::{self, Queue};
use crate::recovery;
use crate::retention::{RetentionConfig, Scheduler};
use crate::shard_lock::ShardedLocks;
use crate::store_api::StoreApi;
use crate::stores::Stores;
use crate::wal::IntakeWal;

pub struct CoreConfig {
    pub store_path: PathBuf,
    pub index_path: PathBuf,
    pub wal_path: PathBuf,
    pub disable_wal: bool,
    pub compute_workers: usize,
    pub queue_capacity: usize,
    pub thread_lock_shards: usize,
    pub kek_hex: Option<String>,
    pub field_policy_paths: Vec<String>,
    pub monitor_thresholds: Thresholds,
    pub retention: RetentionConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            store_path: PathBuf::from("data/store"),
            index_path: PathBuf::from("data/index"),
            wal_path: PathBuf::from("data/wal"),
            disable_wal: false,
            compute_workers: 4,
            queue_capacity: queue::DEFAULT_CAPACITY,
            thread_lock_shards: crate::shard_lock::DEFAULT_SHARDS,
            kek_hex: None,
            field_policy_paths: Vec::new(),
            monitor_thresholds: Thresholds::default(),
            retention: RetentionConfig {
                enabled: false,
                cron_expr: None,
                period: "30d".to_string(),
                lock_ttl: Duration::from_secs(30),
                dry_run: false,
                lock_path: PathBuf::from("data/retention/retention.lock"),
                audit_path: PathBuf::from("data/retention/audit.log"),
            },
        }
    }
}

/// Every long-lived collaborator the engine needs, held together so the CLI
/// (or any other embedder) has one thing to construct and tear down.
pub struct Core {
    pub stores: Stores,
    pub kms: Arc<Kms>,
    pub policy: Arc<FieldPolicy>,
    pub thread_locks: Arc<ShardedLocks>,
    pub wal: Arc<IntakeWal>,
    pub queue: Arc<Queue>,
    pub ingestor: Arc<Ingestor>,
    pub store_api: Arc<StoreApi>,
    pub monitor: Arc<Monitor>,
    pub retention: Arc<Scheduler>,
    pub clock: Arc<dyn Clock>,
}

impl Core {
    pub fn open(config: CoreConfig) -> CResult<Arc<Self>> {
        let stores = Stores::open(&config.store_path, &config.index_path, config.disable_wal)?;

        let kms = Arc::new(Kms::new());
        if let Some(hex) = &config.kek_hex {
            kms.set_key_hex(hex)?;
        }
        let policy = Arc::new(if config.field_policy_paths.is_empty() {
            FieldPolicy::default()
        } else {
            FieldPolicy::parse(&config.field_policy_paths)?
        });
        let thread_locks = Arc::new(ShardedLocks::new(config.thread_lock_shards));

        let wal = Arc::new(IntakeWal::open(config.wal_path.clone(), config.disable_wal)?);
        let queue = Arc::new(Queue::new(config.queue_capacity));

        let stats = recovery::run(&wal, &queue, &stores)?;
        log::info!(
            "recovery complete: wal_replayed={} wal_errors={} temp_idx_recovered={} temp_idx_errors={} duration_ms={}",
            stats.wal_replayed,
            stats.wal_errors,
            stats.temp_idx_recovered,
            stats.temp_idx_errors,
            stats.duration_ms
        );

        let ingestor = Arc::new(Ingestor::new(
            queue.clone(),
            stores.clone(),
            wal.clone(),
            kms.clone(),
            (*policy).clone(),
            thread_locks.clone(),
        ));
        ingestor.start(config.compute_workers);

        let store_api = Arc::new(StoreApi::new(stores.clone(), kms.clone(), policy.clone(), thread_locks.clone(), wal.clone(), queue.clone()));

        let sensor = Arc::new(FsSensor::new(config.store_path.clone(), wal.clone()));
        let monitor = Arc::new(Monitor::new(sensor, ingestor.clone(), stores.clone(), config.monitor_thresholds));
        monitor.start();

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let retention = Scheduler::new(config.retention, store_api.clone(), clock.clone(), "retention-scheduler");
        retention.start();

        Ok(Arc::new(Core { stores, kms, policy, thread_locks, wal, queue, ingestor, store_api, monitor, retention, clock }))
    }

    /// Stops the background workers in dependency order: retention and the
    /// monitor first (neither should observe a closing queue), then the
    /// ingestor, then the queue itself.
    pub fn shutdown(&self) {
        self.retention.stop();
        self.monitor.stop();
        self.ingestor.shutdown();
        self.queue.close_and_drain();
        if let Err(e) = self.wal.sync() {
            log::warn!("failed to sync WAL during shutdown: {e}");
        }
    }
}
