//! End-to-end seed scenarios, exercised against a fully wired `Core` rather
//! than individual components. Mirrors the store-level round-trips already
//! covered under `#[cfg(test)]` in each module, but run them through the
//! same entry point a real caller uses.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use progressdb_core::clock::{Clock, FakeClock};
use progressdb_core::monitor::Thresholds;
use progressdb_core::retention::lease::FileLease;
use progressdb_core::retention::RetentionConfig;
use progressdb_core::storage::Batch;
use progressdb_core::stores::Stores;
use progressdb_core::wal::IntakeWal;
use progressdb_core::{keys, Core, CoreConfig};

fn config(dir: &tempdir::TempDir) -> CoreConfig {
    CoreConfig {
        store_path: dir.path().join("store"),
        index_path: dir.path().join("index"),
        wal_path: dir.path().join("wal"),
        disable_wal: false,
        compute_workers: 2,
        queue_capacity: 1024,
        thread_lock_shards: 8,
        kek_hex: None,
        field_policy_paths: Vec::new(),
        monitor_thresholds: Thresholds::default(),
        retention: RetentionConfig {
            enabled: true,
            cron_expr: None,
            period: "0s".to_string(),
            lock_ttl: Duration::from_secs(30),
            dry_run: false,
            lock_path: dir.path().join("retention/retention.lock"),
            audit_path: dir.path().join("retention/audit.log"),
        },
    }
}

fn poll<T>(mut attempt: impl FnMut() -> Option<T>) -> T {
    for _ in 0..200 {
        if let Some(v) = attempt() {
            return v;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("condition never became true within 2s");
}

/// Scenario 1: soft-delete then purge. A thread with messages, soft-deleted
/// and swept by one immediate retention run, disappears entirely: no
/// thread/message/index/relationship rows remain, and the sweep is
/// recorded in the audit log.
#[test]
fn soft_delete_then_purge_removes_every_scoped_key() {
    let dir = tempdir::TempDir::new("scenario1").unwrap();
    let core = Core::open(config(&dir)).unwrap();

    let thread = core.store_api.create_thread("u1", None, false, 1_000).unwrap();
    let thread_id = thread.thread_ts.to_string();
    for i in 0..3 {
        core.store_api
            .save_message(&thread_id, &i.to_string(), serde_json::json!({"n": i}), 1_000 + i, None, None, None, false)
            .unwrap();
    }
    poll(|| {
        let (rows, _) = core.store_api.list_thread_messages(&thread_id, None, 10).unwrap();
        (rows.len() == 3).then_some(())
    });

    core.store_api.soft_delete_thread(&thread_id, 2_000).unwrap();
    let stats = core.retention.run_once().unwrap();
    assert_eq!(stats.purged, 1);
    assert_eq!(stats.failed, 0);

    assert_eq!(core.store_api.list_threads_for_user("u1").unwrap(), Vec::<i64>::new());
    assert!(core.store_api.list_soft_deleted_threads().unwrap().is_empty());

    for prefix in [b"t:".as_slice(), b"idx:t:".as_slice(), b"rel:".as_slice()] {
        assert!(core.stores.store_db.scan_prefix(prefix).unwrap().is_empty());
        assert!(core.stores.index_db.scan_prefix(prefix).unwrap().is_empty());
    }

    let audit = std::fs::read_to_string(dir.path().join("retention/audit.log")).unwrap();
    assert_eq!(audit.lines().count(), 1);
    assert!(audit.contains("\"item_type\":\"thread\""));
    assert!(audit.contains("\"status\":\"success\""));

    core.shutdown();
}

/// Scenario 2: rotating a thread's DEK doesn't change what callers read
/// back, including a second rotation on top of the first.
#[test]
fn dek_rotation_preserves_message_body() {
    let dir = tempdir::TempDir::new("scenario2").unwrap();
    let mut cfg = config(&dir);
    cfg.kek_hex = Some(hex::encode([9u8; 32]));
    let core = Core::open(cfg).unwrap();

    let thread = core.store_api.create_thread("u1", None, true, 1_000).unwrap();
    let thread_id = thread.thread_ts.to_string();
    let body = serde_json::json!({"text": "rotate-me"});
    core.store_api.save_message(&thread_id, "1", body.clone(), 1_000, None, None, None, false).unwrap();

    poll(|| {
        let (rows, _) = core.store_api.list_thread_messages(&thread_id, None, 10).unwrap();
        (!rows.is_empty()).then_some(())
    });

    core.store_api.rotate_thread_dek(&thread_id, 2_000).unwrap();
    let (rows, _) = core.store_api.list_thread_messages(&thread_id, None, 10).unwrap();
    assert_eq!(rows[0].body, body);

    core.store_api.rotate_thread_dek(&thread_id, 3_000).unwrap();
    let (rows, _) = core.store_api.list_thread_messages(&thread_id, None, 10).unwrap();
    assert_eq!(rows[0].body, body);

    core.shutdown();
}

/// Scenario 3: messages durably WAL-appended but never applied (simulating
/// a crash between WAL write and Apply commit) become visible, and the WAL
/// empties out, once a fresh `Core` runs recovery over the same paths.
#[test]
fn crash_recovery_replays_unapplied_messages() {
    let dir = tempdir::TempDir::new("scenario3").unwrap();
    let cfg = config(&dir);

    {
        let stores = Stores::open(&cfg.store_path, &cfg.index_path, cfg.disable_wal).unwrap();
        let wal = IntakeWal::open(cfg.wal_path.clone(), cfg.disable_wal).unwrap();

        let mut batch = Batch::new();
        let thread = progressdb_core::model::Thread {
            thread_ts: 500,
            author: "u1".to_string(),
            title: None,
            created_ts: 500,
            updated_ts: 500,
            deleted: false,
            deleted_ts: None,
            kms: None,
        };
        batch.set(keys::thread_key(500), serde_json::to_vec(&thread).unwrap());
        stores.store_db.apply(batch, true).unwrap();

        for i in 0..100 {
            let op = progressdb_core::model::Op {
                handler_id: "save_message".to_string(),
                thread_id: "500".to_string(),
                message_id: i.to_string(),
                payload: serde_json::to_vec(&serde_json::json!({"n": i})).unwrap(),
                client_ts: 500 + i,
                is_delete: false,
                extras: Default::default(),
                enq_seq: 0,
            };
            wal.write_with_sequence(op).unwrap();
        }
        wal.sync().unwrap();
    }

    let core = Core::open(cfg).unwrap();
    poll(|| {
        let (rows, _) = core.store_api.list_thread_messages("500", None, 200).unwrap();
        (rows.len() == 100).then_some(())
    });

    assert!(core.wal.scan_all().unwrap().is_empty());
    core.shutdown();
}

/// Scenario 4: 8 concurrent enqueuers submitting 1000 messages each to one
/// thread end up with a gapless, strictly increasing sequence 1..=8000.
#[test]
fn per_thread_ordering_survives_concurrent_enqueuers() {
    let dir = tempdir::TempDir::new("scenario4").unwrap();
    let core = Core::open(config(&dir)).unwrap();
    let thread = core.store_api.create_thread("u1", None, false, 1_000).unwrap();
    let thread_id = thread.thread_ts.to_string();

    let handles: Vec<_> = (0..8)
        .map(|w| {
            let api = core.store_api.clone();
            let thread_id = thread_id.clone();
            thread::spawn(move || {
                for i in 0..1000 {
                    let msg_id = format!("{}-{}", w, i);
                    api.save_message(&thread_id, &msg_id, serde_json::json!({"w": w, "i": i}), 1_000, None, None, None, false)
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let all = poll(|| {
        let mut acc = Vec::new();
        let mut cur = None;
        loop {
            let (rows, next) = core.store_api.list_thread_messages(&thread_id, cur.as_deref(), 500).unwrap();
            acc.extend(rows);
            match next {
                Some(n) => cur = Some(n),
                None => break,
            }
        }
        (acc.len() == 8000).then_some(acc)
    });

    let mut seqs: Vec<u64> = all.iter().map(|m| m.seq).collect();
    seqs.sort_unstable();
    let expected: Vec<u64> = (1..=8000).collect();
    assert_eq!(seqs, expected);

    core.shutdown();
}

/// Scenario 5: field-selective encryption only seals the configured leaves;
/// everything else round-trips untouched, and callers always read back the
/// original plaintext JSON regardless of policy.
#[test]
fn field_level_encryption_seals_only_matched_leaves() {
    let dir = tempdir::TempDir::new("scenario5").unwrap();
    let mut cfg = config(&dir);
    cfg.kek_hex = Some(hex::encode([5u8; 32]));
    cfg.field_policy_paths = vec!["body.ssn".to_string(), "body.items.*.token".to_string()];
    let core = Core::open(cfg).unwrap();

    let thread = core.store_api.create_thread("u1", None, true, 1_000).unwrap();
    let thread_id = thread.thread_ts.to_string();
    let body = serde_json::json!({
        "ssn": "X",
        "items": [{"token": "a", "keep": "k"}, {"token": "b"}],
    });
    core.store_api.save_message(&thread_id, "1", body.clone(), 1_000, None, None, None, false).unwrap();

    let rows = poll(|| {
        let (rows, _) = core.store_api.list_thread_messages(&thread_id, None, 10).unwrap();
        (!rows.is_empty()).then_some(rows)
    });
    assert_eq!(rows[0].body, body);

    let raw = core
        .stores
        .store_db
        .scan_prefix(&keys::thread_messages_prefix(thread.thread_ts))
        .unwrap();
    let stored: serde_json::Value = serde_json::from_slice(&raw[0].1).unwrap();
    let stored_body = &stored["body"];
    assert!(stored_body["ssn"]["_enc"] == "gcm");
    assert!(stored_body["items"][0]["token"]["_enc"] == "gcm");
    assert!(stored_body["items"][1]["token"]["_enc"] == "gcm");
    assert_eq!(stored_body["items"][0]["keep"], "k");

    core.shutdown();
}

/// Scenario 6: two runners racing to acquire the same retention lease never
/// both win.
#[test]
fn lease_contention_allows_exactly_one_winner() {
    let dir = tempdir::TempDir::new("scenario6").unwrap();
    let path = dir.path().join("retention.lock");
    let clock = Arc::new(FakeClock::new(1_000));

    let barrier = Arc::new(std::sync::Barrier::new(2));
    let handles: Vec<_> = ["runner-a", "runner-b"]
        .into_iter()
        .map(|name| {
            let path = path.clone();
            let clock = clock.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let lease = FileLease::new(path, name);
                barrier.wait();
                lease.acquire(clock.as_ref(), 2_000_000_000).is_ok()
            })
        })
        .collect();

    let results: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|&&won| won).count(), 1);
}
