//! The ingest pipeline: a Compute-stage worker pool that loads thread
//! metadata and encrypts payloads, feeding a single Apply-stage writer that
//! assigns sequences and commits batches to both stores. The worker-pool-
//! plus-internal-channel shape follows the same bounded-queue idiom
//! `Queue` itself uses.

pub mod apply;
pub mod compute;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;

use crate::kms::field_policy::FieldPolicy;
use crate::kms::Kms;
use crate::queue::Queue;
use crate::shard_lock::ShardedLocks;
use crate::stores::Stores;
use crate::wal::IntakeWal;

use compute::ComputedItem;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BatchParams {
    pub max_size: usize,
    pub flush_interval: Duration,
}

impl Default for BatchParams {
    fn default() -> Self {
        BatchParams { max_size: 256, flush_interval: Duration::from_millis(25) }
    }
}

struct PauseState {
    paused: Mutex<bool>,
    cvar: Condvar,
}

/// Owns the Compute/Apply worker pools. Built with already-opened
/// collaborators; `Core` is responsible for their lifecycle.
pub struct Ingestor {
    queue: Arc<Queue>,
    stores: Stores,
    wal: Arc<IntakeWal>,
    kms: Arc<Kms>,
    policy: Arc<FieldPolicy>,
    thread_locks: Arc<ShardedLocks>,
    batch_params: Arc<Mutex<BatchParams>>,
    pause: Arc<PauseState>,
    stop: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Ingestor {
    pub fn new(
        queue: Arc<Queue>,
        stores: Stores,
        wal: Arc<IntakeWal>,
        kms: Arc<Kms>,
        policy: FieldPolicy,
        thread_locks: Arc<ShardedLocks>,
    ) -> Self {
        Ingestor {
            queue,
            stores,
            wal,
            kms,
            policy: Arc::new(policy),
            thread_locks,
            batch_params: Arc::new(Mutex::new(BatchParams::default())),
            pause: Arc::new(PauseState { paused: Mutex::new(false), cvar: Condvar::new() }),
            stop: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawns `compute_workers` Stage A threads (clamp to at least 1) and
    /// one Stage B writer thread. Idempotent only in the sense that calling
    /// it twice spawns a second pool on top of the first; callers should
    /// call it once.
    pub fn start(&self, compute_workers: usize) {
        let channel_cap = self.batch_params.lock().unwrap().max_size * 4;
        let (tx, rx) = bounded::<ComputedItem>(channel_cap.max(1));

        let mut handles = Vec::with_capacity(compute_workers.max(1) + 1);

        for _ in 0..compute_workers.max(1) {
            let queue = self.queue.clone();
            let stores = self.stores.clone();
            let kms = self.kms.clone();
            let policy = self.policy.clone();
            let tx = tx.clone();
            let stop = self.stop.clone();

            handles.push(std::thread::spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    let Some(item) = queue.recv(Duration::from_millis(100)) else { continue };
                    match compute::compute_one(item, &stores, &kms, &policy) {
                        Ok(computed) => {
                            if tx.send(computed).is_err() {
                                break;
                            }
                        }
                        Err(e) => log::warn!("compute stage error: {e}"),
                    }
                }
            }));
        }
        drop(tx);

        {
            let stores = self.stores.clone();
            let wal = self.wal.clone();
            let thread_locks = self.thread_locks.clone();
            let stop = self.stop.clone();
            let pause = self.pause.clone();
            let batch_params = self.batch_params.clone();

            handles.push(std::thread::spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    {
                        let mut guard = pause.paused.lock().unwrap();
                        while *guard && !stop.load(Ordering::Acquire) {
                            guard = pause.cvar.wait_timeout(guard, Duration::from_millis(100)).unwrap().0;
                        }
                    }
                    if stop.load(Ordering::Acquire) {
                        break;
                    }

                    let params = *batch_params.lock().unwrap();
                    let first = match rx.recv_timeout(params.flush_interval.max(Duration::from_millis(1))) {
                        Ok(item) => item,
                        Err(_) => continue,
                    };

                    let mut batch = vec![first];
                    let deadline = Instant::now() + params.flush_interval;
                    while batch.len() < params.max_size {
                        match rx.try_recv() {
                            Ok(item) => batch.push(item),
                            Err(_) if Instant::now() >= deadline => break,
                            Err(_) => std::thread::yield_now(),
                        }
                    }

                    if let Err(e) = apply::apply_batch(batch, &stores, &wal, &thread_locks) {
                        log::warn!("apply stage error, batch retried from WAL on next restart: {e}");
                    }
                }
            }));
        }

        *self.workers.lock().unwrap() = handles;
    }

    pub fn pause(&self) {
        *self.pause.paused.lock().unwrap() = true;
    }

    pub fn resume(&self) {
        *self.pause.paused.lock().unwrap() = false;
        self.pause.cvar.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        *self.pause.paused.lock().unwrap()
    }

    pub fn batch_params(&self) -> BatchParams {
        *self.batch_params.lock().unwrap()
    }

    pub fn set_batch_params(&self, params: BatchParams) {
        *self.batch_params.lock().unwrap() = params;
    }

    /// Stops accepting new work, wakes any paused worker, and joins every
    /// spawned thread. Does not close `self.queue` — `Core` owns that
    /// lifecycle decision since other components may still enqueue.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Release);
        self.pause.cvar.notify_all();
        let mut handles = self.workers.lock().unwrap();
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys;
    use crate::model::{Op, Thread};
    use crate::storage::kv_store::KvStore;
    use crate::storage::log_cask::LogCask;
    use std::collections::HashMap;

    fn setup(dir: &tempdir::TempDir) -> (Stores, Arc<IntakeWal>) {
        let stores = Stores {
            store_db: KvStore::new(LogCask::open(dir.path().join("store"), false, false).unwrap()),
            index_db: KvStore::new(LogCask::open(dir.path().join("index"), false, false).unwrap()),
        };
        let wal = Arc::new(IntakeWal::open(dir.path().join("wal"), false).unwrap());
        (stores, wal)
    }

    fn put_thread(stores: &Stores, thread_ts: i64) {
        let t = Thread {
            thread_ts,
            author: "u1".into(),
            title: None,
            created_ts: thread_ts,
            updated_ts: thread_ts,
            deleted: false,
            deleted_ts: None,
            kms: None,
        };
        stores.store_db.set(&keys::thread_key(thread_ts), serde_json::to_vec(&t).unwrap(), true).unwrap();
    }

    #[test]
    fn a_queued_message_lands_as_a_current_row_after_start() {
        let dir = tempdir::TempDir::new("demo").unwrap();
        let (stores, wal) = setup(&dir);
        put_thread(&stores, 10);

        let queue = Arc::new(Queue::new(16));
        let ingestor = Ingestor::new(
            queue.clone(),
            stores.clone(),
            wal,
            Arc::new(Kms::new()),
            FieldPolicy::default(),
            Arc::new(ShardedLocks::new(4)),
        );
        ingestor.start(1);

        queue
            .try_enqueue(Op {
                handler_id: "save_message".into(),
                thread_id: "10".into(),
                message_id: "100".into(),
                payload: br#"{"text":"hi"}"#.to_vec(),
                client_ts: 1,
                is_delete: false,
                extras: HashMap::new(),
                enq_seq: 0,
            })
            .unwrap();

        let mut rows = Vec::new();
        for _ in 0..50 {
            rows = stores.store_db.scan_prefix(&keys::thread_messages_prefix(10)).unwrap();
            if !rows.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        ingestor.shutdown();

        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn pause_prevents_apply_until_resume() {
        let dir = tempdir::TempDir::new("demo").unwrap();
        let (stores, wal) = setup(&dir);
        put_thread(&stores, 10);

        let queue = Arc::new(Queue::new(16));
        let ingestor = Ingestor::new(
            queue.clone(),
            stores.clone(),
            wal,
            Arc::new(Kms::new()),
            FieldPolicy::default(),
            Arc::new(ShardedLocks::new(4)),
        );
        ingestor.pause();
        ingestor.start(1);

        queue
            .try_enqueue(Op {
                handler_id: "save_message".into(),
                thread_id: "10".into(),
                message_id: "100".into(),
                payload: b"{}".to_vec(),
                client_ts: 1,
                is_delete: false,
                extras: HashMap::new(),
                enq_seq: 0,
            })
            .unwrap();

        std::thread::sleep(Duration::from_millis(150));
        let rows_while_paused = stores.store_db.scan_prefix(&keys::thread_messages_prefix(10)).unwrap();
        assert!(rows_while_paused.is_empty());

        ingestor.resume();
        let mut rows = Vec::new();
        for _ in 0..50 {
            rows = stores.store_db.scan_prefix(&keys::thread_messages_prefix(10)).unwrap();
            if !rows.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        ingestor.shutdown();
        assert_eq!(rows.len(), 1);
    }
}
