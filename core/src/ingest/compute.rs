//! Stage A of the Ingestor: load the owning thread's metadata and encrypt
//! the payload under its DEK before handing off to the Apply stage.

use crate::error::{CResult, Error};
use crate::keys;
use crate::kms::field_policy::FieldPolicy;
use crate::kms::Kms;
use crate::model::Thread;
use crate::queue::Item;
use crate::stores::Stores;

/// An item carried forward from Stage A with its thread metadata loaded and
/// its payload already encrypted (or passed through, if encryption is off).
pub struct ComputedItem {
    pub item: Item,
    pub encrypted_payload: Vec<u8>,
    pub thread: Thread,
}

/// Loads the thread named by `item.op.thread_id` and encrypts its payload.
/// Fails with `Error::ThreadDeleted` if the thread has been soft-deleted.
/// Whether to encrypt is decided per thread, from `thread.kms` — set at
/// `CreateThread` time — not from any process-wide setting, since threads
/// can be individually created with or without encryption.
pub fn compute_one(item: Item, stores: &Stores, kms: &Kms, policy: &FieldPolicy) -> CResult<ComputedItem> {
    let thread_ts = item
        .op
        .thread_id
        .parse::<i64>()
        .map_err(|_| Error::InvalidKey(item.op.thread_id.clone()))?;

    let raw = stores
        .store_db
        .get(&keys::thread_key(thread_ts))?
        .ok_or_else(|| Error::ThreadNotFound(item.op.thread_id.clone()))?;
    let thread: Thread = serde_json::from_slice(&raw)?;

    if thread.deleted {
        return Err(Error::ThreadDeleted(item.op.thread_id.clone()));
    }

    let encrypted_payload = if let Some(kms_ref) = thread.kms.as_ref() {
        let body: serde_json::Value = serde_json::from_slice(&item.op.payload)?;
        let sealed = policy.encrypt_body(kms, &kms_ref.key_id, &body)?;
        serde_json::to_vec(&sealed)?
    } else {
        item.op.payload.clone()
    };

    Ok(ComputedItem { item, encrypted_payload, thread })
}
