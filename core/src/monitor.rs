//! Hardware/resource sensor and monitor: a polling sensor samples disk,
//! WAL, and memory pressure; a monitor evaluates the sample against
//! watermarks and pauses, degrades, or resumes the Ingestor. A separate
//! 100ms ticker force-syncs both stores whenever writes are pending, the
//! way `storage::log::Log` group-commits fsyncs.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::ingest::{BatchParams, Ingestor};
use crate::stores::Stores;
use crate::wal::IntakeWal;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HwSample {
    pub disk_util_pct: f64,
    pub wal_bytes_pending: u64,
    pub mem_available_bytes: u64,
}

pub trait Sensor: Send + Sync {
    fn sample(&self) -> HwSample;
}

/// Samples real OS state: disk utilization via `fs4`, WAL pressure from the
/// intake log's own unapplied entries, and free memory via `libc::sysinfo`
/// (the same FFI idiom the KMS uses for `mlock`/`munlock`).
pub struct FsSensor {
    watch_path: PathBuf,
    wal: Arc<IntakeWal>,
}

impl FsSensor {
    pub fn new(watch_path: PathBuf, wal: Arc<IntakeWal>) -> Self {
        FsSensor { watch_path, wal }
    }
}

impl Sensor for FsSensor {
    fn sample(&self) -> HwSample {
        let disk_util_pct = match (fs4::total_space(&self.watch_path), fs4::available_space(&self.watch_path)) {
            (Ok(total), Ok(avail)) if total > 0 => 100.0 * (1.0 - avail as f64 / total as f64),
            _ => 0.0,
        };
        let wal_bytes_pending = self
            .wal
            .scan_all()
            .map(|entries| entries.iter().map(|(_, op)| op.payload.len() as u64).sum())
            .unwrap_or(0);
        HwSample { disk_util_pct, wal_bytes_pending, mem_available_bytes: read_mem_available() }
    }
}

fn read_mem_available() -> u64 {
    unsafe {
        let mut info: libc::sysinfo = std::mem::zeroed();
        if libc::sysinfo(&mut info) == 0 {
            (info.freeram as u64).saturating_mul(info.mem_unit as u64)
        } else {
            0
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Thresholds {
    pub wal_bytes_high: u64,
    pub disk_util_high_pct: f64,
    pub wal_bytes_mid: u64,
    pub disk_util_mid_pct: f64,
    pub recovery_window: Duration,
    pub poll_interval: Duration,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            wal_bytes_high: 256 * 1024 * 1024,
            disk_util_high_pct: 90.0,
            wal_bytes_mid: 64 * 1024 * 1024,
            disk_util_mid_pct: 75.0,
            recovery_window: Duration::from_secs(30),
            poll_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, PartialEq)]
enum Stress {
    High,
    Mid,
    Low,
}

fn classify(sample: &HwSample, t: &Thresholds) -> Stress {
    if sample.wal_bytes_pending >= t.wal_bytes_high || sample.disk_util_pct >= t.disk_util_high_pct {
        Stress::High
    } else if sample.wal_bytes_pending >= t.wal_bytes_mid || sample.disk_util_pct >= t.disk_util_mid_pct {
        Stress::Mid
    } else {
        Stress::Low
    }
}

pub struct Monitor {
    sensor: Arc<dyn Sensor>,
    ingestor: Arc<Ingestor>,
    stores: Stores,
    thresholds: Thresholds,
    stop: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Monitor {
    pub fn new(sensor: Arc<dyn Sensor>, ingestor: Arc<Ingestor>, stores: Stores, thresholds: Thresholds) -> Self {
        Monitor { sensor, ingestor, stores, thresholds, stop: Arc::new(AtomicBool::new(false)), handles: Mutex::new(Vec::new()) }
    }

    pub fn start(&self) {
        let handles = vec![self.spawn_poll_loop(), self.spawn_force_sync_loop()];
        *self.handles.lock().unwrap() = handles;
    }

    fn spawn_poll_loop(&self) -> JoinHandle<()> {
        let sensor = self.sensor.clone();
        let ingestor = self.ingestor.clone();
        let thresholds = self.thresholds;
        let stop = self.stop.clone();
        let original = ingestor.batch_params();

        std::thread::spawn(move || {
            let mut degraded = false;
            let mut low_since: Option<Instant> = None;

            while !stop.load(Ordering::Acquire) {
                std::thread::sleep(thresholds.poll_interval.min(Duration::from_millis(100)));
                if stop.load(Ordering::Acquire) {
                    break;
                }

                let sample = sensor.sample();
                match classify(&sample, &thresholds) {
                    Stress::High => {
                        low_since = None;
                        degraded = true;
                        if !ingestor.is_paused() {
                            log::warn!(
                                "ingest pressure high (wal_bytes={} disk_util={:.1}%), pausing ingest",
                                sample.wal_bytes_pending,
                                sample.disk_util_pct
                            );
                            ingestor.pause();
                        }
                    }
                    Stress::Mid => {
                        low_since = None;
                        if ingestor.is_paused() {
                            ingestor.resume();
                        }
                        if !degraded {
                            let current = ingestor.batch_params();
                            ingestor.set_batch_params(BatchParams {
                                max_size: (current.max_size / 2).max(1),
                                flush_interval: (current.flush_interval * 2).min(Duration::from_secs(1)),
                            });
                            degraded = true;
                        }
                    }
                    Stress::Low => {
                        if ingestor.is_paused() {
                            ingestor.resume();
                        }
                        if degraded {
                            let since = *low_since.get_or_insert_with(Instant::now);
                            if since.elapsed() >= thresholds.recovery_window {
                                ingestor.set_batch_params(original);
                                degraded = false;
                                low_since = None;
                            }
                        }
                    }
                }
            }
        })
    }

    fn spawn_force_sync_loop(&self) -> JoinHandle<()> {
        let stores = self.stores.clone();
        let stop = self.stop.clone();
        std::thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_millis(100));
                if stores.store_db.pending_since_sync() > 0 {
                    if let Err(e) = stores.store_db.force_sync() {
                        log::warn!("force sync of store_db failed: {e}");
                    }
                }
                if stores.index_db.pending_since_sync() > 0 {
                    if let Err(e) = stores.index_db.force_sync() {
                        log::warn!("force sync of index_db failed: {e}");
                    }
                }
            }
        })
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        let mut handles = self.handles.lock().unwrap();
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }
}
