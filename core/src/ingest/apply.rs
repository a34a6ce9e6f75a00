//! Stage B of the Ingestor: assigns per-thread sequences, relocates
//! superseded current-version rows into `indexDB`, and commits a batch
//! under `storeDB` then `indexDB`, truncating the WAL only after both
//! commit.
//!
//! Ownership relationship rows (`rel:u:*`/`rel:t:*`) are written once by
//! `StoreAPI::create_thread`, not re-emitted here — a thread's identity is
//! unique by construction (I1), so there is nothing to reconcile on a
//! later apply.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{CResult, Error};
use crate::ingest::compute::ComputedItem;
use crate::keys::{self, RangeField};
use crate::model::{MessageVersion, ThreadRange};
use crate::shard_lock::ShardedLocks;
use crate::storage::Batch;
use crate::stores::Stores;
use crate::wal::IntakeWal;

/// Applies one Apply-stage batch. On any error the batch is abandoned
/// before either store is touched; the WAL is left untruncated so the
/// batch's items are replayed by Recovery on the next restart.
pub fn apply_batch(
    items: Vec<ComputedItem>,
    stores: &Stores,
    wal: &IntakeWal,
    thread_locks: &ShardedLocks,
) -> CResult<()> {
    if items.is_empty() {
        return Ok(());
    }

    let mut by_thread: BTreeMap<i64, Vec<ComputedItem>> = BTreeMap::new();
    for item in items {
        by_thread.entry(item.thread.thread_ts).or_default().push(item);
    }

    let mut store_batch = Batch::new();
    let mut index_batch = Batch::new();
    let mut temp_idx_keys = Vec::new();
    let mut enq_seqs = Vec::new();

    for (thread_ts, mut group) in by_thread {
        group.sort_by_key(|c| c.item.op.enq_seq);
        let lock = thread_locks.get(&keys::fmt_ts(thread_ts));
        let _guard = lock.lock().unwrap();

        apply_thread_group(thread_ts, &group, stores, &mut store_batch, &mut index_batch, &mut temp_idx_keys)?;
        enq_seqs.extend(group.iter().map(|c| c.item.op.enq_seq));
    }

    stores.store_db.apply(store_batch, true)?;
    stores.index_db.apply(index_batch, true)?;

    let mut cleanup = Batch::new();
    for key in temp_idx_keys {
        cleanup.delete(key);
    }
    if !cleanup.is_empty() {
        stores.store_db.apply(cleanup, false)?;
    }

    wal.truncate_sequences(&enq_seqs)
}

fn apply_thread_group(
    thread_ts: i64,
    group: &[ComputedItem],
    stores: &Stores,
    store_batch: &mut Batch,
    index_batch: &mut Batch,
    temp_idx_keys: &mut Vec<Vec<u8>>,
) -> CResult<()> {
    let mut next_seq = max_existing_seq(stores, thread_ts)? + 1;
    let mut range = load_thread_range(stores, thread_ts)?;

    for computed in group {
        let op = &computed.item.op;
        let msg_ts = op.message_id.parse::<i64>().map_err(|_| Error::InvalidKey(op.message_id.clone()))?;
        let seq = next_seq;
        next_seq += 1;

        let prefix = keys::message_key_prefix(thread_ts, msg_ts);
        let existing = stores.store_db.scan_prefix(prefix.as_bytes())?;

        let created_ts = if let Some((old_key, old_value)) = existing.into_iter().next() {
            let (_, _, old_seq) = keys::parse_message_current_key(&old_key)?;
            let old: MessageVersion = serde_json::from_slice(&old_value)?;
            let message_key = old.message_key();
            let version_key = keys::version_key(&message_key, old.updated_ts, old_seq);

            mirror_into_temp_idx(&version_key, &old_value, store_batch, temp_idx_keys);
            index_batch.set(version_key, old_value);
            store_batch.delete(old_key);
            old.created_ts
        } else {
            op.client_ts
        };

        let body: Value = serde_json::from_slice(&computed.encrypted_payload)?;
        let author = op.extras.get("user").cloned().unwrap_or_else(|| computed.thread.author.clone());
        let role = op.extras.get("role").cloned().unwrap_or_else(|| "user".to_string());
        let reply_to = op.extras.get("reply_to").cloned();

        let version = MessageVersion {
            thread_ts,
            msg_ts,
            seq,
            author,
            role,
            created_ts,
            updated_ts: op.client_ts,
            body,
            reply_to,
            deleted: op.is_delete,
        };
        store_batch.set(keys::message_current_key(thread_ts, msg_ts, seq), serde_json::to_vec(&version)?);

        if op.is_delete {
            let sd_key = keys::soft_delete_key(&version.message_key());
            mirror_into_temp_idx(&sd_key, keys::SOFT_DELETE_VALUE, store_batch, temp_idx_keys);
            index_batch.set(sd_key, keys::SOFT_DELETE_VALUE.to_vec());
        }

        if range.start_seq == 0 {
            range.start_seq = seq;
        }
        range.end_seq = seq;
        range.last_updated_ts = op.client_ts;
        range.last_created_ts = created_ts.max(range.last_created_ts);
    }

    write_thread_range(thread_ts, &range, store_batch, index_batch, temp_idx_keys);
    Ok(())
}

/// Writes the pre-commit scratch copy of a row headed for `indexDB`, keyed
/// by the row's own eventual key so Recovery can reconcile it if the
/// process dies between the `storeDB` and `indexDB` commits.
fn mirror_into_temp_idx(real_key: &[u8], value: &[u8], store_batch: &mut Batch, temp_idx_keys: &mut Vec<Vec<u8>>) {
    let target = String::from_utf8_lossy(real_key).into_owned();
    let temp_key = keys::temp_idx_key("idx", &target);
    store_batch.set(temp_key.clone(), value.to_vec());
    temp_idx_keys.push(temp_key);
}

fn write_thread_range(
    thread_ts: i64,
    range: &ThreadRange,
    store_batch: &mut Batch,
    index_batch: &mut Batch,
    temp_idx_keys: &mut Vec<Vec<u8>>,
) {
    let fields: [(RangeField, String); 4] = [
        (RangeField::Start, range.start_seq.to_string()),
        (RangeField::End, range.end_seq.to_string()),
        (RangeField::LastCreated, range.last_created_ts.to_string()),
        (RangeField::LastUpdated, range.last_updated_ts.to_string()),
    ];
    for (field, value) in fields {
        let key = keys::thread_range_key(thread_ts, field);
        mirror_into_temp_idx(&key, value.as_bytes(), store_batch, temp_idx_keys);
        index_batch.set(key, value.into_bytes());
    }
}

/// The next sequence to assign is `max(existing current-row seq) + 1`,
/// computed once per batch per thread by a single prefix scan.
fn max_existing_seq(stores: &Stores, thread_ts: i64) -> CResult<u64> {
    let prefix = keys::thread_messages_prefix(thread_ts);
    let rows = stores.store_db.scan_prefix(&prefix)?;
    let mut max_seq = 0u64;
    for (key, _) in rows {
        let (_, _, seq) = keys::parse_message_current_key(&key)?;
        max_seq = max_seq.max(seq);
    }
    Ok(max_seq)
}

fn load_thread_range(stores: &Stores, thread_ts: i64) -> CResult<ThreadRange> {
    let read = |field: RangeField| -> CResult<i64> {
        match stores.index_db.get(&keys::thread_range_key(thread_ts, field))? {
            Some(bytes) => {
                let s = String::from_utf8(bytes).map_err(|e| Error::Value(e.to_string()))?;
                s.parse::<i64>().map_err(|e| Error::Value(e.to_string()))
            }
            None => Ok(0),
        }
    };
    Ok(ThreadRange {
        start_seq: read(RangeField::Start)? as u64,
        end_seq: read(RangeField::End)? as u64,
        last_created_ts: read(RangeField::LastCreated)?,
        last_updated_ts: read(RangeField::LastUpdated)?,
    })
}
