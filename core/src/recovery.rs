//! Startup recovery: replay unapplied WAL entries back onto the queue, then
//! reconcile any `temp_idx:` scratch rows left behind by an apply that
//! committed `storeDB` but died before `indexDB`. Runs once, before the
//! Ingestor's worker pools start.

use std::time::Instant;

use crate::error::CResult;
use crate::keys::{self, parse_temp_idx};
use crate::model::RecoveryStats;
use crate::queue::Queue;
use crate::storage::Batch;
use crate::stores::Stores;
use crate::wal::IntakeWal;

const RECONCILE_BATCH_SIZE: usize = 1000;

/// Runs the full recovery sequence, returning a stats record regardless of
/// whether individual entries failed — only a fatal WAL-open failure (which
/// would have surfaced earlier, at `IntakeWal::open`) aborts the process.
pub fn run(wal: &IntakeWal, queue: &Queue, stores: &Stores) -> CResult<RecoveryStats> {
    let start = Instant::now();
    let mut stats = RecoveryStats::default();

    replay_wal(wal, queue, &mut stats);
    reconcile_temp_idx(stores, &mut stats);

    stats.duration_ms = start.elapsed().as_millis() as u64;
    Ok(stats)
}

fn replay_wal(wal: &IntakeWal, queue: &Queue, stats: &mut RecoveryStats) {
    let entries = match wal.scan_all() {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("WAL scan failed during recovery: {e}");
            stats.wal_errors += 1;
            return;
        }
    };

    let mut seqs = Vec::with_capacity(entries.len());
    for (seq, op) in entries {
        match queue.replay_enqueue(op) {
            Ok(()) => {
                stats.wal_replayed += 1;
                seqs.push(seq);
            }
            Err(e) => {
                log::warn!("failed to replay WAL entry {seq}: {e}");
                stats.wal_errors += 1;
            }
        }
    }

    if let Err(e) = wal.truncate_sequences(&seqs) {
        log::warn!("failed to truncate replayed WAL sequences: {e}");
        stats.wal_errors += 1;
    }
}

fn reconcile_temp_idx(stores: &Stores, stats: &mut RecoveryStats) {
    let rows = match stores.store_db.scan_prefix(keys::TEMP_IDX_PREFIX) {
        Ok(rows) => rows,
        Err(e) => {
            log::warn!("failed to scan temp_idx rows: {e}");
            stats.temp_idx_errors += 1;
            return;
        }
    };

    for chunk in rows.chunks(RECONCILE_BATCH_SIZE) {
        let mut index_batch = Batch::new();
        let mut cleanup = Batch::new();

        for (key, value) in chunk {
            let key_str = match std::str::from_utf8(key) {
                Ok(s) => s,
                Err(_) => {
                    stats.temp_idx_errors += 1;
                    continue;
                }
            };
            match parse_temp_idx(key_str) {
                Ok((kind, target)) => {
                    index_batch.set(keys::recovery_idx_key(&kind, &target), value.clone());
                    cleanup.delete(key.clone());
                    stats.temp_idx_recovered += 1;
                }
                Err(e) => {
                    log::warn!("malformed temp_idx row {key_str}: {e}");
                    stats.temp_idx_errors += 1;
                }
            }
        }

        if !index_batch.is_empty() {
            if let Err(e) = stores.index_db.apply(index_batch, true) {
                log::warn!("failed to apply reconciled index rows: {e}");
                stats.temp_idx_errors += 1;
                continue;
            }
        }
        if !cleanup.is_empty() {
            if let Err(e) = stores.store_db.apply(cleanup, false) {
                log::warn!("failed to clear temp_idx rows: {e}");
                stats.temp_idx_errors += 1;
            }
        }
    }
}
