//! Retention scheduler: a cron-driven single-leader worker that holds a
//! file lease, sweeps soft-deleted threads past their retention window, and
//! purges them through `StoreApi`.

pub mod audit;
pub mod lease;
pub mod period;

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use cron::Schedule;

use crate::clock::Clock;
use crate::error::CResult;
use crate::keys;
use crate::model::{AuditRecord, AuditStatus};
use crate::store_api::StoreApi;

use audit::AuditLog;
use lease::FileLease;
use period::parse_period;

#[derive(Clone, Debug)]
pub struct RetentionConfig {
    pub enabled: bool,
    pub cron_expr: Option<String>,
    pub period: String,
    pub lock_ttl: Duration,
    pub dry_run: bool,
    pub lock_path: PathBuf,
    pub audit_path: PathBuf,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub purged: u64,
    pub dry_run: u64,
    pub failed: u64,
}

pub struct Scheduler {
    config: RetentionConfig,
    store: Arc<StoreApi>,
    clock: Arc<dyn Clock>,
    owner: String,
    stop: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(config: RetentionConfig, store: Arc<StoreApi>, clock: Arc<dyn Clock>, owner: impl Into<String>) -> Arc<Self> {
        Arc::new(Scheduler {
            config,
            store,
            clock,
            owner: owner.into(),
            stop: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        })
    }

    /// Spawns the tick loop. A no-op when retention is disabled or no cron
    /// expression is configured.
    pub fn start(self: &Arc<Self>) {
        if !self.config.enabled {
            return;
        }
        let Some(expr) = self.config.cron_expr.clone() else { return };
        let schedule = match Schedule::from_str(&expr) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("invalid retention cron expression {expr}: {e}");
                return;
            }
        };

        let this = self.clone();
        let handle = std::thread::spawn(move || this.run_loop(schedule));
        *self.handle.lock().unwrap() = Some(handle);
    }

    fn run_loop(&self, schedule: Schedule) {
        while !self.stop.load(Ordering::Acquire) {
            let now = chrono::DateTime::<chrono::Utc>::from_timestamp_nanos(self.clock.now_ns());
            let Some(next) = schedule.after(&now).next() else { break };
            let wait = (next - now).to_std().unwrap_or(Duration::from_secs(1));
            if !self.sleep_or_stop(wait) {
                break;
            }
            if self.stop.load(Ordering::Acquire) {
                break;
            }
            if let Err(e) = self.run_once() {
                log::warn!("retention run failed: {e}");
            }
        }
    }

    /// Sleeps in small slices so `stop()` is noticed promptly instead of
    /// after a multi-hour cron interval. Returns false if stopped early.
    fn sleep_or_stop(&self, wait: Duration) -> bool {
        const STEP: Duration = Duration::from_millis(100);
        let mut remaining = wait;
        while remaining > Duration::ZERO {
            if self.stop.load(Ordering::Acquire) {
                return false;
            }
            let slice = remaining.min(STEP);
            std::thread::sleep(slice);
            remaining -= slice;
        }
        true
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Acquires the lease, sweeps soft-deleted threads past the retention
    /// window, purges them (unless `dry_run`), and releases the lease. A
    /// lease that can't be acquired is not an error — another runner holds
    /// it, so this call simply returns with no work done.
    pub fn run_once(&self) -> CResult<RunStats> {
        let run_key = format!("run-{}", self.clock.now_ns());
        let lease = FileLease::new(self.config.lock_path.clone(), self.owner.clone());
        let ttl_ns = self.config.lock_ttl.as_nanos() as i64;

        if let Err(e) = lease.acquire(self.clock.as_ref(), ttl_ns) {
            log::info!("retention lease not acquired: {e}");
            return Ok(RunStats::default());
        }

        let result = self.sweep(&run_key);

        if let Err(e) = lease.release() {
            log::warn!("failed to release retention lease: {e}");
        }
        result
    }

    fn sweep(&self, run_key: &str) -> CResult<RunStats> {
        let period = parse_period(&self.config.period)?;
        let cutoff = self.clock.now_ns() - period.as_nanos() as i64;
        let audit = AuditLog::open(self.config.audit_path.clone())?;

        let mut stats = RunStats::default();
        for thread in self.store.list_soft_deleted_threads()? {
            let Some(deleted_ts) = thread.deleted_ts else { continue };
            if deleted_ts >= cutoff {
                continue;
            }

            let thread_id = thread.thread_ts.to_string();
            let status = if self.config.dry_run {
                stats.dry_run += 1;
                AuditStatus::DryRun
            } else {
                match self.store.purge_thread_permanently(&thread_id) {
                    Ok(()) => {
                        stats.purged += 1;
                        AuditStatus::Success
                    }
                    Err(e) => {
                        log::warn!("failed to purge thread {thread_id}: {e}");
                        stats.failed += 1;
                        AuditStatus::Failed
                    }
                }
            };

            audit.append(&AuditRecord {
                run_key: run_key.to_string(),
                item_type: "thread".to_string(),
                item_key: keys::fmt_ts(thread.thread_ts),
                status,
                ts: self.clock.now_ns(),
            })?;
        }
        Ok(stats)
    }
}
