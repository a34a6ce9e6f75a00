//! IntakeWAL: a dedicated append-log of queued `Op`s, keyed by monotonic
//! sequence, built on the same `Log`/`fs4` idiom the KV engines use but
//! repurposed as a sequence-keyed operation log rather than a key-value
//! store.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::codec::json_codec::JsonCodec;
use crate::error::{CResult, Error};
use crate::keys::{self, parse_wal_seq_key};
use crate::model::Op;
use crate::storage::engine::Engine;
use crate::storage::log_cask::LogCask;
use crate::storage::Batch;

pub struct IntakeWal {
    engine: Mutex<LogCask>,
    codec: JsonCodec,
    next_seq: AtomicU64,
    disable_wal: bool,
}

impl IntakeWal {
    pub fn open(path: PathBuf, disable_wal: bool) -> CResult<Self> {
        let mut engine = LogCask::open(path, true, disable_wal)?;
        let next_seq = Self::load_next_seq(&mut engine)?;
        Ok(IntakeWal { engine: Mutex::new(engine), codec: JsonCodec::new(), next_seq: AtomicU64::new(next_seq), disable_wal })
    }

    fn load_next_seq(engine: &mut LogCask) -> CResult<u64> {
        match engine.get(keys::META_NEXT_SEQ)? {
            Some(bytes) => {
                let s = String::from_utf8(bytes).map_err(|e| Error::WALCorrupt(e.to_string()))?;
                s.parse::<u64>().map_err(|e| Error::WALCorrupt(e.to_string()))
            }
            None => Ok(0),
        }
    }

    /// Atomically reads-and-increments the persisted sequence counter and
    /// appends `op` (with `enq_seq` overwritten to the assigned sequence).
    pub fn write_with_sequence(&self, mut op: Op) -> CResult<u64> {
        let mut engine = self.engine.lock().unwrap();
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        op.enq_seq = seq;

        let mut batch = Batch::new();
        batch.set(keys::wal_seq_key(seq), self.codec.encode(&op)?);
        batch.set(keys::META_NEXT_SEQ.to_vec(), (seq + 1).to_string().into_bytes());
        engine.apply(batch, !self.disable_wal)?;
        Ok(seq)
    }

    pub fn read(&self, seq: u64) -> CResult<Option<Op>> {
        let mut engine = self.engine.lock().unwrap();
        match engine.get(&keys::wal_seq_key(seq))? {
            Some(bytes) => Ok(Some(self.codec.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Iterates `[FirstIndex, LastIndex]` and decodes each stored `Op`.
    pub fn scan_all(&self) -> CResult<Vec<(u64, Op)>> {
        let mut engine = self.engine.lock().unwrap();
        let mut out = Vec::new();
        for item in engine.scan_prefix(b"") {
            let (key, value) = item?;
            if key == keys::META_NEXT_SEQ || key == keys::SYNC_MARKER {
                continue;
            }
            let seq = parse_wal_seq_key(&key)?;
            out.push((seq, self.codec.decode::<Op>(&value)?));
        }
        out.sort_by_key(|(seq, _)| *seq);
        Ok(out)
    }

    pub fn first_index(&self) -> CResult<Option<u64>> {
        Ok(self.scan_all()?.first().map(|(seq, _)| *seq))
    }

    pub fn last_index(&self) -> CResult<Option<u64>> {
        Ok(self.scan_all()?.last().map(|(seq, _)| *seq))
    }

    /// Deletes exactly the listed sequences in one batch, marking those Ops
    /// as durably applied.
    pub fn truncate_sequences(&self, seqs: &[u64]) -> CResult<()> {
        if seqs.is_empty() {
            return Ok(());
        }
        let mut batch = Batch::new();
        for seq in seqs {
            batch.delete(keys::wal_seq_key(*seq));
        }
        self.engine.lock().unwrap().apply(batch, !self.disable_wal)
    }

    pub fn sync(&self) -> CResult<()> {
        self.engine.lock().unwrap().flush()
    }
}
