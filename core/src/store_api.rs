//! Typed public operations: `CreateThread`, `SaveMessage`,
//! `ListThreadMessages`, `ListMessageVersions`, `RotateThreadDEK`,
//! `SoftDeleteThread`, `PurgeThreadPermanently`.
//!
//! Reads are lock-free; admin writes (create/rotate/soft-delete/purge)
//! serialize per thread through the same `ShardedLocks` the Apply stage
//! uses. `SaveMessage` is the one operation that does not write directly:
//! it durably appends to `IntakeWal` then hands the op to the `Queue`,
//! preserving the WAL-assigned sequence as `EnqSeq` — the actual row
//! writes happen later, under the thread lock, inside the Apply stage.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine as _;
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CResult, Error};
use crate::keys::{self, RangeField};
use crate::kms::field_policy::FieldPolicy;
use crate::kms::Kms;
use crate::model::{KmsRef, MessageVersion, Op, Thread};
use crate::queue::Queue;
use crate::shard_lock::ShardedLocks;
use crate::storage::engine::Engine;
use crate::storage::kv_store::KvStore;
use crate::storage::Batch;
use crate::stores::Stores;
use crate::wal::IntakeWal;

const PURGE_BATCH_SIZE: usize = 1000;

pub struct StoreApi {
    stores: Stores,
    kms: Arc<Kms>,
    policy: Arc<FieldPolicy>,
    thread_locks: Arc<ShardedLocks>,
    wal: Arc<IntakeWal>,
    queue: Arc<Queue>,
}

#[derive(Serialize, Deserialize)]
struct Cursor {
    thread_ts: i64,
    ts: i64,
    seq: u64,
}

impl StoreApi {
    pub fn new(
        stores: Stores,
        kms: Arc<Kms>,
        policy: Arc<FieldPolicy>,
        thread_locks: Arc<ShardedLocks>,
        wal: Arc<IntakeWal>,
        queue: Arc<Queue>,
    ) -> Self {
        StoreApi { stores, kms, policy, thread_locks, wal, queue }
    }

    /// Allocates `threadTS = now_ns`, persists the thread record, sets up
    /// its zeroed range rows and ownership relationship, and (if
    /// `encrypt_enabled`) mints a DEK up front.
    pub fn create_thread(&self, author: &str, title: Option<String>, encrypt_enabled: bool, now_ns: i64) -> CResult<Thread> {
        let thread_ts = now_ns;
        let lock = self.thread_locks.get(&keys::fmt_ts(thread_ts));
        let _guard = lock.lock().unwrap();

        let kms_ref = if encrypt_enabled {
            let (key_id, wrapped) = self.kms.create_dek_for_thread(&keys::fmt_ts(thread_ts))?;
            let (kek_id, kek_version) = self.kms.kek_meta().ok_or(Error::KMSNoProvider)?;
            Some(KmsRef { key_id, wrapped_dek: wrapped, kek_id, kek_version })
        } else {
            None
        };

        let thread = Thread {
            thread_ts,
            author: author.to_string(),
            title,
            created_ts: thread_ts,
            updated_ts: thread_ts,
            deleted: false,
            deleted_ts: None,
            kms: kms_ref,
        };

        let mut store_batch = Batch::new();
        store_batch.set(keys::thread_key(thread_ts), serde_json::to_vec(&thread)?);
        self.stores.store_db.apply(store_batch, true)?;

        let mut index_batch = Batch::new();
        for field in [RangeField::Start, RangeField::End, RangeField::LastCreated, RangeField::LastUpdated] {
            index_batch.set(keys::thread_range_key(thread_ts, field), b"0".to_vec());
        }
        index_batch.set(keys::rel_user_key(author, thread_ts), b"1".to_vec());
        index_batch.set(keys::rel_thread_key(thread_ts, author), b"1".to_vec());
        self.stores.index_db.apply(index_batch, true)?;

        Ok(thread)
    }

    /// Durably appends `body` as a pending write and returns immediately;
    /// the Apply stage assigns its sequence and makes it visible.
    #[allow(clippy::too_many_arguments)]
    pub fn save_message(
        &self,
        thread_id: &str,
        msg_id: &str,
        body: Value,
        ts: i64,
        author: Option<String>,
        role: Option<String>,
        reply_to: Option<String>,
        is_delete: bool,
    ) -> CResult<()> {
        let mut extras = HashMap::new();
        if let Some(a) = author {
            extras.insert("user".to_string(), a);
        }
        if let Some(r) = role {
            extras.insert("role".to_string(), r);
        }
        if let Some(rt) = reply_to {
            extras.insert("reply_to".to_string(), rt);
        }

        let op = Op {
            handler_id: "save_message".to_string(),
            thread_id: thread_id.to_string(),
            message_id: msg_id.to_string(),
            payload: serde_json::to_vec(&body)?,
            client_ts: ts,
            is_delete,
            extras,
            enq_seq: 0,
        };

        let seq = self.wal.write_with_sequence(op.clone())?;
        let mut op = op;
        op.enq_seq = seq;
        self.queue.replay_enqueue(op)
    }

    /// Prefix scan from `cursor` (exclusive), decrypting each row on the
    /// way out. The returned cursor is opaque and only meaningful as input
    /// to a later call with the same `thread_id`.
    pub fn list_thread_messages(
        &self,
        thread_id: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> CResult<(Vec<MessageVersion>, Option<String>)> {
        let thread_ts = parse_thread_id(thread_id)?;
        let thread = self.load_thread(thread_ts)?;

        let mut rows = self.stores.store_db.scan_prefix(&keys::thread_messages_prefix(thread_ts))?;
        if let Some(cursor) = cursor {
            let (cursor_thread_ts, cursor_ts, cursor_seq) = decode_cursor(cursor)?;
            let after_key = keys::message_current_key(cursor_thread_ts, cursor_ts, cursor_seq);
            rows.retain(|(k, _)| k.as_slice() > after_key.as_slice());
        }

        let has_more = rows.len() > limit;
        let mut out = Vec::with_capacity(limit.min(rows.len()));
        for (_, value) in rows.into_iter().take(limit) {
            let mut version: MessageVersion = serde_json::from_slice(&value)?;
            version.body = self.decrypt_if_needed(&thread, &version.body)?;
            out.push(version);
        }

        let next_cursor = if has_more {
            out.last().map(|v| encode_cursor(thread_ts, v.msg_ts, v.seq))
        } else {
            None
        };
        Ok((out, next_cursor))
    }

    pub fn list_message_versions(&self, thread_id: &str, msg_id: &str) -> CResult<Vec<MessageVersion>> {
        let thread_ts = parse_thread_id(thread_id)?;
        let msg_ts = parse_msg_id(msg_id)?;
        let thread = self.load_thread(thread_ts)?;

        let message_key = keys::message_key(thread_ts, msg_ts);
        let rows = self.stores.index_db.scan_prefix(&keys::version_prefix(&message_key))?;

        let mut out = Vec::with_capacity(rows.len());
        for (_, value) in rows {
            let mut version: MessageVersion = serde_json::from_slice(&value)?;
            version.body = self.decrypt_if_needed(&thread, &version.body)?;
            out.push(version);
        }
        Ok(out)
    }

    /// Every row under the thread re-wrapped under a new DEK before the
    /// thread's `kms` pointer switches. If anything fails before that last
    /// write, the old DEK is still the one readers use.
    pub fn rotate_thread_dek(&self, thread_id: &str, now_ns: i64) -> CResult<String> {
        let thread_ts = parse_thread_id(thread_id)?;
        let lock = self.thread_locks.get(&keys::fmt_ts(thread_ts));
        let _guard = lock.lock().unwrap();

        let mut thread = self.load_thread(thread_ts)?;
        let old_kms = thread.kms.clone().ok_or(Error::NoThreadKey)?;
        let (new_key_id, wrapped) = self.kms.create_dek_for_thread(&keys::fmt_ts(thread_ts))?;

        let mut store_batch = Batch::new();
        for (key, value) in self.stores.store_db.scan_prefix(&keys::thread_messages_prefix(thread_ts))? {
            let mut version: MessageVersion = serde_json::from_slice(&value)?;
            let plain = self.policy.decrypt_body(&self.kms, &old_kms.key_id, &version.body)?;
            version.body = self.policy.encrypt_body(&self.kms, &new_key_id, &plain)?;
            store_batch.set(key, serde_json::to_vec(&version)?);
        }

        let mut index_batch = Batch::new();
        for (key, value) in self.stores.index_db.scan_prefix(&keys::thread_versions_prefix(thread_ts))? {
            let mut version: MessageVersion = serde_json::from_slice(&value)?;
            let plain = self.policy.decrypt_body(&self.kms, &old_kms.key_id, &version.body)?;
            version.body = self.policy.encrypt_body(&self.kms, &new_key_id, &plain)?;
            index_batch.set(key, serde_json::to_vec(&version)?);
        }

        self.stores.store_db.apply(store_batch, true)?;
        self.stores.index_db.apply(index_batch, true)?;

        let (kek_id, kek_version) = self.kms.kek_meta().ok_or(Error::KMSNoProvider)?;
        thread.kms = Some(KmsRef { key_id: new_key_id.clone(), wrapped_dek: wrapped, kek_id, kek_version });
        thread.updated_ts = now_ns;
        self.stores.store_db.set(&keys::thread_key(thread_ts), serde_json::to_vec(&thread)?, true)?;

        Ok(new_key_id)
    }

    pub fn soft_delete_thread(&self, thread_id: &str, now_ns: i64) -> CResult<()> {
        let thread_ts = parse_thread_id(thread_id)?;
        let lock = self.thread_locks.get(&keys::fmt_ts(thread_ts));
        let _guard = lock.lock().unwrap();

        let mut thread = self.load_thread(thread_ts)?;
        thread.deleted = true;
        thread.deleted_ts = Some(now_ns);
        self.stores.store_db.set(&keys::thread_key(thread_ts), serde_json::to_vec(&thread)?, true)?;

        let thread_key_str = String::from_utf8_lossy(&keys::thread_key(thread_ts)).into_owned();
        self.stores.index_db.set(&keys::soft_delete_key(&thread_key_str), keys::SOFT_DELETE_VALUE.to_vec(), true)?;
        Ok(())
    }

    /// Deletes every key scoped to this thread, batched at 1,000 keys per
    /// commit: message rows, version rows, range rows, both relationship
    /// rows, the soft-delete marker, and finally the thread record itself.
    pub fn purge_thread_permanently(&self, thread_id: &str) -> CResult<()> {
        let thread_ts = parse_thread_id(thread_id)?;
        let lock = self.thread_locks.get(&keys::fmt_ts(thread_ts));
        let _guard = lock.lock().unwrap();

        let thread = self.load_thread(thread_ts)?;

        let message_keys: Vec<Vec<u8>> =
            self.stores.store_db.scan_prefix(&keys::thread_messages_prefix(thread_ts))?.into_iter().map(|(k, _)| k).collect();
        delete_in_batches(&self.stores.store_db, message_keys)?;

        let version_keys: Vec<Vec<u8>> =
            self.stores.index_db.scan_prefix(&keys::thread_versions_prefix(thread_ts))?.into_iter().map(|(k, _)| k).collect();
        delete_in_batches(&self.stores.index_db, version_keys)?;

        let message_sd_prefix = [b"sd:".as_slice(), &keys::thread_messages_prefix(thread_ts)].concat();
        let message_sd_keys: Vec<Vec<u8>> =
            self.stores.index_db.scan_prefix(&message_sd_prefix)?.into_iter().map(|(k, _)| k).collect();
        delete_in_batches(&self.stores.index_db, message_sd_keys)?;

        let thread_key_str = String::from_utf8_lossy(&keys::thread_key(thread_ts)).into_owned();
        let index_keys = vec![
            keys::thread_range_key(thread_ts, RangeField::Start),
            keys::thread_range_key(thread_ts, RangeField::End),
            keys::thread_range_key(thread_ts, RangeField::LastCreated),
            keys::thread_range_key(thread_ts, RangeField::LastUpdated),
            keys::rel_user_key(&thread.author, thread_ts),
            keys::rel_thread_key(thread_ts, &thread.author),
            keys::soft_delete_key(&thread_key_str),
        ];
        delete_in_batches(&self.stores.index_db, index_keys)?;

        self.stores.store_db.delete(&keys::thread_key(thread_ts), true)
    }

    /// Every thread a user owns, read via the `rel:u:` ownership rows.
    pub fn list_threads_for_user(&self, user_id: &str) -> CResult<Vec<i64>> {
        let rows = self.stores.index_db.scan_prefix(&keys::rel_user_prefix(user_id))?;
        rows.into_iter().map(|(key, _)| keys::parse_rel_user_key(&key, user_id)).collect()
    }

    /// Every thread record currently marked `deleted`, for the retention
    /// scheduler's sweep. Reads raw thread rows directly rather than going
    /// through `list_threads_for_user`, since retention has no single user
    /// to scope to.
    pub fn list_soft_deleted_threads(&self) -> CResult<Vec<Thread>> {
        let rows = self.stores.store_db.scan_prefix(b"t:")?;
        let mut out = Vec::new();
        for (key, value) in rows {
            if keys::parse_thread_key(&key).is_err() {
                continue;
            }
            let thread: Thread = serde_json::from_slice(&value)?;
            if thread.deleted {
                out.push(thread);
            }
        }
        Ok(out)
    }

    fn load_thread(&self, thread_ts: i64) -> CResult<Thread> {
        let raw =
            self.stores.store_db.get(&keys::thread_key(thread_ts))?.ok_or_else(|| Error::ThreadNotFound(keys::fmt_ts(thread_ts)))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    fn decrypt_if_needed(&self, thread: &Thread, body: &Value) -> CResult<Value> {
        match &thread.kms {
            Some(kms_ref) => self.policy.decrypt_body(&self.kms, &kms_ref.key_id, body),
            None => Ok(body.clone()),
        }
    }
}

fn delete_in_batches<E: Engine>(store: &KvStore<E>, keys: Vec<Vec<u8>>) -> CResult<()> {
    for chunk in keys.chunks(PURGE_BATCH_SIZE) {
        let mut batch = Batch::new();
        for key in chunk {
            batch.delete(key.clone());
        }
        store.apply(batch, true)?;
    }
    Ok(())
}

fn parse_thread_id(thread_id: &str) -> CResult<i64> {
    thread_id.parse::<i64>().map_err(|_| Error::InvalidKey(thread_id.to_string()))
}

fn parse_msg_id(msg_id: &str) -> CResult<i64> {
    msg_id.parse::<i64>().map_err(|_| Error::InvalidKey(msg_id.to_string()))
}

fn encode_cursor(thread_ts: i64, ts: i64, seq: u64) -> String {
    let json = serde_json::to_vec(&Cursor { thread_ts, ts, seq }).expect("cursor always serializes");
    base64::engine::general_purpose::STANDARD.encode(json)
}

fn decode_cursor(cursor: &str) -> CResult<(i64, i64, u64)> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(cursor).map_err(|e| Error::Value(e.to_string()))?;
    let c: Cursor = serde_json::from_slice(&bytes)?;
    Ok((c.thread_ts, c.ts, c.seq))
}
