pub mod engine;
pub mod kv_store;
pub mod log;
pub mod log_cask;
pub mod memory;

use crate::error::CResult;
use serde_derive::{Deserialize, Serialize};

/// In-memory map from key to a value's file position and length. BTreeMap so
/// that compaction and scans can walk keys in order.
pub type KeyDir = std::collections::BTreeMap<Vec<u8>, (u64, u32)>;

/// Engine status, used both for operator diagnostics and by the hardware
/// sensor (C10) to estimate WAL/disk pressure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub name: String,
    pub keys: u64,
    pub size: u64,
    pub total_disk_size: u64,
    pub live_disk_size: u64,
    pub garbage_disk_size: u64,
}

/// A scan iterator, with a blanket implementation (in lieu of trait aliases).
pub trait ScanIteratorT: DoubleEndedIterator<Item = CResult<(Vec<u8>, Vec<u8>)>> {}

impl<I: DoubleEndedIterator<Item = CResult<(Vec<u8>, Vec<u8>)>>> ScanIteratorT for I {}

/// A single mutation within a `Batch`.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Set(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// An ordered group of mutations applied together by `Engine::apply`. Used
/// by the Ingestor's apply stage to write a message's current-version row
/// and its index updates in one call, and by recovery/retention for their
/// 1,000-key batch commits.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub ops: Vec<BatchOp>,
}

impl Batch {
    pub fn new() -> Self {
        Batch { ops: Vec::new() }
    }

    pub fn set(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Set(key.into(), value.into()));
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete(key.into()));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn extend(&mut self, other: Batch) {
        self.ops.extend(other.ops);
    }
}
