use crate::error::CResult;
use crate::storage::{Batch, ScanIteratorT, Status};

/// A key/value storage engine, where both keys and values are arbitrary byte
/// strings, stored in lexicographical key order. Writes are only guaranteed
/// durable after a `sync=true` operation.
///
/// Only supports single-threaded use since all methods (including reads) take
/// a mutable reference -- serialized access can't be avoided anyway, since
/// file access is serial. Concurrent access is layered on top by `KvStore`
/// (a `Mutex<E>` per store) and by the per-thread mutex map in the ingestor.
pub trait Engine: std::fmt::Display + Send {
    /// The iterator returned by scan().
    type ScanIterator<'a>: ScanIteratorT + 'a
    where
        Self: Sized + 'a; // omit in trait objects, for object safety

    /// Deletes a key, or does nothing if it does not exist.
    fn delete(&mut self, key: &[u8], sync: bool) -> CResult<()>;

    /// Flushes any buffered data and fsyncs the underlying file.
    fn flush(&mut self) -> CResult<()>;

    /// Gets a value for a key, if it exists.
    fn get(&mut self, key: &[u8]) -> CResult<Option<Vec<u8>>>;

    /// Iterates over an ordered range of key/value pairs.
    fn scan(&mut self, range: impl std::ops::RangeBounds<Vec<u8>>) -> Self::ScanIterator<'_>
    where
        Self: Sized; // omit in trait objects, for object safety

    /// Like scan, but can be used from trait objects. The iterator will use
    /// dynamic dispatch, which has a minor performance penalty.
    fn scan_dyn(
        &mut self,
        range: (std::ops::Bound<Vec<u8>>, std::ops::Bound<Vec<u8>>),
    ) -> Box<dyn ScanIteratorT + '_>;

    /// Iterates over all key/value pairs starting with prefix.
    fn scan_prefix(&mut self, prefix: &[u8]) -> Self::ScanIterator<'_>
    where
        Self: Sized, // omit in trait objects, for object safety
    {
        let start = std::ops::Bound::Included(prefix.to_vec());
        let end = match prefix.iter().rposition(|b| *b != 0xff) {
            Some(i) => std::ops::Bound::Excluded(
                prefix.iter().take(i).copied().chain(std::iter::once(prefix[i] + 1)).collect(),
            ),
            None => std::ops::Bound::Unbounded,
        };
        self.scan((start, end))
    }

    /// Sets a value for a key, replacing the existing value if any.
    fn set(&mut self, key: &[u8], value: Vec<u8>, sync: bool) -> CResult<()>;

    /// Applies every operation in `batch` in order, as a single `flush` at
    /// the end when `sync` is true. Not atomic against a mid-batch crash on
    /// this single-file log engine; atomicity is provided one level up, by
    /// `Recovery` replaying the WAL. See DESIGN.md.
    fn apply(&mut self, batch: Batch, sync: bool) -> CResult<()>;

    /// Returns engine status.
    fn status(&mut self) -> CResult<Status>;
}
