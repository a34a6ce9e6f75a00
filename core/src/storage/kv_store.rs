use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::CResult;
use crate::keys;
use crate::storage::engine::Engine;
use crate::storage::{Batch, Status};

/// A handle to a single underlying `Engine`, shared across threads.
///
/// Every caller serializes through one `Mutex<E>` (the engine itself only
/// supports single-threaded access, see `Engine`'s doc comment), so
/// `KvStore` is the seam where concurrency gets layered onto the log. It
/// also tracks writes made since the last fsync, so callers that write with
/// `sync=false` for throughput can still periodically force a group commit.
pub struct KvStore<E: Engine> {
    engine: Arc<Mutex<E>>,
    pending_since_sync: Arc<AtomicU64>,
}

impl<E: Engine> KvStore<E> {
    pub fn new(engine: E) -> Self {
        KvStore { engine: Arc::new(Mutex::new(engine)), pending_since_sync: Arc::new(AtomicU64::new(0)) }
    }

    pub fn get(&self, key: &[u8]) -> CResult<Option<Vec<u8>>> {
        self.engine.lock().unwrap().get(key)
    }

    pub fn set(&self, key: &[u8], value: Vec<u8>, sync: bool) -> CResult<()> {
        self.engine.lock().unwrap().set(key, value, sync)?;
        self.note_write(sync);
        Ok(())
    }

    pub fn delete(&self, key: &[u8], sync: bool) -> CResult<()> {
        self.engine.lock().unwrap().delete(key, sync)?;
        self.note_write(sync);
        Ok(())
    }

    /// Applies a batch of mutations as one critical section under the lock.
    pub fn apply(&self, batch: Batch, sync: bool) -> CResult<()> {
        let n = batch.len() as u64;
        self.engine.lock().unwrap().apply(batch, sync)?;
        if sync {
            self.pending_since_sync.store(0, Ordering::Relaxed);
        } else {
            self.pending_since_sync.fetch_add(n, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Collects a range scan into an owned vector. The engine's borrowed
    /// scan iterator can't outlive the lock guard, so reads here are
    /// necessarily eager rather than streaming.
    pub fn scan(&self, range: (std::ops::Bound<Vec<u8>>, std::ops::Bound<Vec<u8>>)) -> CResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.engine.lock().unwrap().scan_dyn(range).collect()
    }

    pub fn scan_prefix(&self, prefix: &[u8]) -> CResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let start = std::ops::Bound::Included(prefix.to_vec());
        let end = match prefix.iter().rposition(|b| *b != 0xff) {
            Some(i) => std::ops::Bound::Excluded(
                prefix.iter().take(i).copied().chain(std::iter::once(prefix[i] + 1)).collect(),
            ),
            None => std::ops::Bound::Unbounded,
        };
        self.scan((start, end))
    }

    pub fn status(&self) -> CResult<Status> {
        self.engine.lock().unwrap().status()
    }

    pub fn flush(&self) -> CResult<()> {
        self.engine.lock().unwrap().flush()
    }

    /// Number of writes applied with `sync=false` since the last group
    /// commit. Read by the hardware sensor (C10) to decide when to force
    /// one.
    pub fn pending_since_sync(&self) -> u64 {
        self.pending_since_sync.load(Ordering::Relaxed)
    }

    /// Writes a sentinel key with `sync=true`, fsyncing every write buffered
    /// behind it and resetting the pending counter. The key's value carries
    /// no meaning; only the durable write matters.
    pub fn force_sync(&self) -> CResult<()> {
        self.engine.lock().unwrap().set(keys::SYNC_MARKER, vec![1], true)?;
        self.pending_since_sync.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn note_write(&self, sync: bool) {
        if sync {
            self.pending_since_sync.store(0, Ordering::Relaxed);
        } else {
            self.pending_since_sync.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl<E: Engine> Clone for KvStore<E> {
    fn clone(&self) -> Self {
        KvStore { engine: self.engine.clone(), pending_since_sync: self.pending_since_sync.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::Memory;

    #[test]
    fn tracks_pending_writes_and_resets_on_force_sync() {
        let store = KvStore::new(Memory::new());
        store.set(b"a", vec![1], false).unwrap();
        store.set(b"b", vec![2], false).unwrap();
        assert_eq!(store.pending_since_sync(), 2);

        store.force_sync().unwrap();
        assert_eq!(store.pending_since_sync(), 0);
        assert_eq!(store.get(b"a").unwrap(), Some(vec![1]));
    }

    #[test]
    fn sync_write_resets_pending_counter() {
        let store = KvStore::new(Memory::new());
        store.set(b"a", vec![1], false).unwrap();
        store.set(b"b", vec![2], true).unwrap();
        assert_eq!(store.pending_since_sync(), 0);
    }

    #[test]
    fn clone_shares_the_same_underlying_engine() {
        let store = KvStore::new(Memory::new());
        let clone = store.clone();
        store.set(b"a", vec![1], true).unwrap();
        assert_eq!(clone.get(b"a").unwrap(), Some(vec![1]));
    }

    #[test]
    fn clone_shares_the_same_pending_since_sync_counter() {
        let store = KvStore::new(Memory::new());
        let clone = store.clone();
        store.set(b"a", vec![1], false).unwrap();
        assert_eq!(clone.pending_since_sync(), 1);

        clone.force_sync().unwrap();
        assert_eq!(store.pending_since_sync(), 0);
    }
}
