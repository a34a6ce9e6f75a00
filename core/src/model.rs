//! Shared record types passed between the ingest pipeline, the KMS, and
//! `StoreAPI`: a single, serde-annotated type per concern rather than
//! scattering structs by file.

use std::collections::HashMap;

use serde_derive::{Deserialize, Serialize};

/// A reference to the wrapped DEK backing a thread's encryption, embedded in
/// `Thread.kms`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KmsRef {
    pub key_id: String,
    #[serde(with = "serde_bytes")]
    pub wrapped_dek: Vec<u8>,
    pub kek_id: String,
    pub kek_version: u32,
}

/// Primary thread record, stored at `t:<20d threadTS>` in `storeDB`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub thread_ts: i64,
    pub author: String,
    pub title: Option<String>,
    pub created_ts: i64,
    pub updated_ts: i64,
    pub deleted: bool,
    pub deleted_ts: Option<i64>,
    pub kms: Option<KmsRef>,
}

impl Thread {
    pub fn id(&self) -> String {
        crate::keys::fmt_ts(self.thread_ts)
    }
}

/// A single immutable message version. The row with the highest `seq` for a
/// given `(thread_ts, msg_ts)` pair is the current version, kept in
/// `storeDB`; all others live in `indexDB` under `idx:versions:...`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageVersion {
    pub thread_ts: i64,
    pub msg_ts: i64,
    pub seq: u64,
    pub author: String,
    pub role: String,
    pub created_ts: i64,
    pub updated_ts: i64,
    /// Arbitrary JSON body, possibly containing `{"_enc":"gcm","v":"..."}`
    /// envelopes produced by field-selective encryption.
    pub body: serde_json::Value,
    pub reply_to: Option<String>,
    pub deleted: bool,
}

impl MessageVersion {
    pub fn message_key(&self) -> String {
        crate::keys::message_key(self.thread_ts, self.msg_ts)
    }
}

/// Per-thread range metadata, the four `idx:t:<ts>:ms:*` rows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadRange {
    pub start_seq: u64,
    pub end_seq: u64,
    pub last_created_ts: i64,
    pub last_updated_ts: i64,
}

/// A queued write request, as accepted by `Queue::enqueue`. Cloned shallowly
/// on accept; `extras` is deep-copied since callers may keep mutating their
/// own copy after submission.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Op {
    pub handler_id: String,
    pub thread_id: String,
    pub message_id: String,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    pub client_ts: i64,
    pub is_delete: bool,
    pub extras: HashMap<String, String>,
    /// Assigned by the queue on accept; preserved across WAL replay so that
    /// Apply-stage ordering survives a restart.
    pub enq_seq: u64,
}

/// Outcome reported by `Recovery::run`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStats {
    pub wal_replayed: u64,
    pub wal_errors: u64,
    pub temp_idx_recovered: u64,
    pub temp_idx_errors: u64,
    pub duration_ms: u64,
}

/// One line of the retention audit trail.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub run_key: String,
    pub item_type: String,
    pub item_key: String,
    pub status: AuditStatus,
    pub ts: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    DryRun,
    Success,
    Failed,
}
