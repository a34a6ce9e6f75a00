//! Bounded queue of pooled `Item`s, the seam where concurrency is
//! introduced on top of the otherwise single-threaded `Engine`, backed by
//! `crossbeam-channel`.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::error::{CResult, Error};
use crate::model::Op;

pub const DEFAULT_CAPACITY: usize = 64 * 1024;
const POOL_BUFFER_CAP: usize = 256 * 1024;

/// An item in flight through the queue. Exclusively owns its payload buffer
/// until `done()` is called, at which point the buffer returns to the pool
/// (or is dropped, if it grew past `POOL_BUFFER_CAP`).
pub struct Item {
    pub op: Op,
    done: Arc<AtomicBool>,
    pool: Arc<BufferPool>,
}

impl Item {
    /// Marks the item done exactly once; idempotent under concurrent calls.
    pub fn done(&mut self) {
        if !self.done.swap(true, Ordering::AcqRel) {
            let buf = std::mem::take(&mut self.op.payload);
            self.pool.release(buf);
        }
    }
}

impl Drop for Item {
    fn drop(&mut self) {
        self.done();
    }
}

/// Pool of reusable payload buffers, capped so a burst of oversized
/// payloads doesn't pin memory forever — buffers above the cap are simply
/// dropped instead of being reused.
struct BufferPool {
    available: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    fn new() -> Self {
        BufferPool { available: Mutex::new(Vec::new()) }
    }

    fn acquire(&self) -> Option<Vec<u8>> {
        self.available.lock().unwrap().pop()
    }

    fn release(&self, mut buf: Vec<u8>) {
        if buf.capacity() <= POOL_BUFFER_CAP {
            buf.clear();
            self.available.lock().unwrap().push(buf);
        }
    }
}

/// A bounded FIFO of `Item`s with in-flight accounting and a one-shot close.
pub struct Queue {
    sender: Sender<Item>,
    receiver: Receiver<Item>,
    closed: AtomicBool,
    in_flight: AtomicI64,
    enq_seq: AtomicU64,
    dropped: AtomicU64,
    failed_total: AtomicU64,
    pool: Arc<BufferPool>,
}

impl Queue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        Queue {
            sender,
            receiver,
            closed: AtomicBool::new(false),
            in_flight: AtomicI64::new(0),
            enq_seq: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            failed_total: AtomicU64::new(0),
            pool: Arc::new(BufferPool::new()),
        }
    }

    /// Non-blocking enqueue. Returns `Error::QueueFull` on overflow and
    /// `Error::QueueClosed` after `close`.
    pub fn try_enqueue(&self, op: Op) -> CResult<()> {
        self.enqueue_inner(op, None)
    }

    /// Blocking enqueue with a timeout standing in for caller cancellation.
    pub fn enqueue(&self, op: Op, timeout: Duration) -> CResult<()> {
        self.enqueue_inner(op, Some(timeout))
    }

    fn enqueue_inner(&self, mut op: Op, timeout: Option<Duration>) -> CResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::QueueClosed);
        }

        if let Some(mut buf) = self.pool.acquire() {
            buf.clear();
            buf.extend_from_slice(&op.payload);
            op.payload = buf;
        }
        op.enq_seq = self.enq_seq.fetch_add(1, Ordering::Relaxed);
        let item = Item { op, done: Arc::new(AtomicBool::new(false)), pool: self.pool.clone() };

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let result = match timeout {
            None => self.sender.try_send(item).map_err(|e| match e {
                TrySendError::Full(_) => Error::QueueFull,
                TrySendError::Disconnected(_) => Error::QueueClosed,
            }),
            Some(d) => self.sender.send_timeout(item, d).map_err(|_| Error::QueueFull),
        };

        if result.is_err() {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            self.failed_total.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Enqueues a replayed item preserving its original `enq_seq`, used by
    /// recovery so ordering is stable across a restart.
    pub fn replay_enqueue(&self, op: Op) -> CResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::QueueClosed);
        }
        if let Some(mut buf) = self.pool.acquire() {
            buf.clear();
            buf.extend_from_slice(&op.payload);
            op.payload = buf;
        }
        let item = Item { op, done: Arc::new(AtomicBool::new(false)), pool: self.pool.clone() };
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.sender.send(item).map_err(|_| Error::QueueClosed)
    }

    /// Blocks until an item is available or the queue is closed and drained.
    pub fn recv(&self, timeout: Duration) -> Option<Item> {
        match self.receiver.recv_timeout(timeout) {
            Ok(item) => {
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                Some(item)
            }
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Drains up to `max` additional items without blocking, for batch
    /// workers that block on the first item then top up the batch.
    pub fn try_drain(&self, max: usize) -> Vec<Item> {
        let mut out = Vec::with_capacity(max);
        while out.len() < max {
            match self.receiver.try_recv() {
                Ok(item) => {
                    self.in_flight.fetch_sub(1, Ordering::AcqRel);
                    out.push(item);
                }
                Err(_) => break,
            }
        }
        out
    }

    /// Prevents new enqueues. Existing items already on the channel remain
    /// available to consumers until drained.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Closes, then marks every remaining item done without processing it
    /// (the test/shutdown path).
    pub fn close_and_drain(&self) {
        self.close();
        while let Ok(mut item) = self.receiver.try_recv() {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            item.done();
        }
    }

    pub fn in_flight(&self) -> i64 {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn failed_total(&self) -> u64 {
        self.failed_total.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
