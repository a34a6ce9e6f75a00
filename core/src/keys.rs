//! Bit-exact key encoding for threads, messages, message-versions, index
//! entries and relationship rows.
//!
//! Every timestamp component is a 20-digit zero-padded decimal (covers any
//! `i64` nanosecond value with room to spare); every sequence component is a
//! 9-digit zero-padded decimal. Zero-padding keeps keys byte-sortable so
//! `storage::Engine::scan`/`scan_prefix` range scans return rows in the
//! intended order without a custom comparator, the same trick
//! `storage::engine::scan_prefix` uses for its prefix upper bounds.
//!
//! Parse failures are fatal only for the one operation touching the bad key,
//! never for the process: every parser returns `CResult`.

use crate::error::{CResult, Error};

pub const TS_WIDTH: usize = 20;
pub const SEQ_WIDTH: usize = 9;

pub fn fmt_ts(ts: i64) -> String {
    format!("{:0width$}", ts, width = TS_WIDTH)
}

pub fn fmt_seq(seq: u64) -> String {
    format!("{:0width$}", seq, width = SEQ_WIDTH)
}

pub fn parse_ts(s: &str) -> CResult<i64> {
    if s.len() != TS_WIDTH {
        return Err(Error::InvalidKey(format!("bad timestamp width: {}", s)));
    }
    s.parse::<i64>().map_err(|e| Error::InvalidKey(e.to_string()))
}

pub fn parse_seq(s: &str) -> CResult<u64> {
    if s.len() != SEQ_WIDTH {
        return Err(Error::InvalidKey(format!("bad sequence width: {}", s)));
    }
    s.parse::<u64>().map_err(|e| Error::InvalidKey(e.to_string()))
}

/// `t:<20d threadTS>`
pub fn thread_key(thread_ts: i64) -> Vec<u8> {
    format!("t:{}", fmt_ts(thread_ts)).into_bytes()
}

/// Splits a thread record key `t:<20d threadTS>` back into its timestamp,
/// rejecting anything longer (a message row also starts with `t:`).
pub fn parse_thread_key(key: &[u8]) -> CResult<i64> {
    let s = std::str::from_utf8(key).map_err(|e| Error::InvalidKey(e.to_string()))?;
    let ts = s.strip_prefix("t:").ok_or_else(|| Error::InvalidKey(format!("not a thread key: {}", s)))?;
    if ts.len() != TS_WIDTH {
        return Err(Error::InvalidKey(format!("not a thread key: {}", s)));
    }
    parse_ts(ts)
}

/// `t:<threadTS>:m:` — prefix matching every message of a thread.
pub fn thread_messages_prefix(thread_ts: i64) -> Vec<u8> {
    format!("t:{}:m:", fmt_ts(thread_ts)).into_bytes()
}

/// `t:<threadTS>:m:<msgTS>:<seq>` — the current version of a message.
pub fn message_current_key(thread_ts: i64, msg_ts: i64, seq: u64) -> Vec<u8> {
    format!("t:{}:m:{}:{}", fmt_ts(thread_ts), fmt_ts(msg_ts), fmt_seq(seq)).into_bytes()
}

/// `t:<threadTS>:m:<msgTS>:` — prefix matching every current-row write of a
/// single logical message id (there is ever at most one, but parsing shares
/// this helper with the version-history prefix below).
pub fn message_key_prefix(thread_ts: i64, msg_ts: i64) -> String {
    format!("t:{}:m:{}:", fmt_ts(thread_ts), fmt_ts(msg_ts))
}

/// A message's opaque "key" component (`<threadTS>:m:<msgTS>`), as embedded
/// in `idx:versions:<messageKey>:...` rows.
pub fn message_key(thread_ts: i64, msg_ts: i64) -> String {
    format!("t:{}:m:{}", fmt_ts(thread_ts), fmt_ts(msg_ts))
}

/// Splits a current-version key `t:<threadTS>:m:<msgTS>:<seq>` back into its
/// components.
pub fn parse_message_current_key(key: &[u8]) -> CResult<(i64, i64, u64)> {
    let s = std::str::from_utf8(key).map_err(|e| Error::InvalidKey(e.to_string()))?;
    let mut parts = s.split(':');
    match (parts.next(), parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("t"), Some(thread_ts), Some("m"), Some(msg_ts), Some(seq)) => {
            Ok((parse_ts(thread_ts)?, parse_ts(msg_ts)?, parse_seq(seq)?))
        }
        _ => Err(Error::InvalidKey(format!("malformed message current key: {}", s))),
    }
}

/// `idx:versions:<messageKey>:<20d ts>-<9d seq>`
pub fn version_key(message_key: &str, ts: i64, seq: u64) -> Vec<u8> {
    format!("idx:versions:{}:{}-{}", message_key, fmt_ts(ts), fmt_seq(seq)).into_bytes()
}

/// `idx:versions:<messageKey>:` — prefix matching every historical version.
pub fn version_prefix(message_key: &str) -> Vec<u8> {
    format!("idx:versions:{}:", message_key).into_bytes()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeField {
    Start,
    End,
    LastCreated,
    LastUpdated,
}

impl RangeField {
    fn suffix(self) -> &'static str {
        match self {
            RangeField::Start => "start",
            RangeField::End => "end",
            RangeField::LastCreated => "lc",
            RangeField::LastUpdated => "lu",
        }
    }
}

/// `idx:t:<threadTS>:ms:{start|end|lc|lu}`
pub fn thread_range_key(thread_ts: i64, field: RangeField) -> Vec<u8> {
    format!("idx:t:{}:ms:{}", fmt_ts(thread_ts), field.suffix()).into_bytes()
}

/// `rel:u:<userID>:t:<threadTS>`
pub fn rel_user_key(user_id: &str, thread_ts: i64) -> Vec<u8> {
    format!("rel:u:{}:t:{}", user_id, fmt_ts(thread_ts)).into_bytes()
}

/// `rel:u:<userID>:t:` — prefix matching every thread a user owns.
pub fn rel_user_prefix(user_id: &str) -> Vec<u8> {
    format!("rel:u:{}:t:", user_id).into_bytes()
}

/// Splits a `rel:u:<userID>:t:<threadTS>` row back into its threadTS.
pub fn parse_rel_user_key(key: &[u8], user_id: &str) -> CResult<i64> {
    let s = std::str::from_utf8(key).map_err(|e| Error::InvalidKey(e.to_string()))?;
    let prefix = format!("rel:u:{}:t:", user_id);
    let rest = s
        .strip_prefix(prefix.as_str())
        .ok_or_else(|| Error::InvalidKey(format!("not a rel_user key for {}: {}", user_id, s)))?;
    parse_ts(rest)
}

/// `idx:versions:t:<threadTS>:m:` — every version row of every message in a
/// thread, used by `RotateThreadDEK` to re-wrap the whole history.
pub fn thread_versions_prefix(thread_ts: i64) -> Vec<u8> {
    format!("idx:versions:t:{}:m:", fmt_ts(thread_ts)).into_bytes()
}

/// `rel:t:<threadTS>:u:<userID>`
pub fn rel_thread_key(thread_ts: i64, user_id: &str) -> Vec<u8> {
    format!("rel:t:{}:u:{}", fmt_ts(thread_ts), user_id).into_bytes()
}

/// `sd:<anyKey>` soft-delete marker. `any_key` is the raw UTF-8 key string of
/// the object being marked (a thread key or a message key).
pub fn soft_delete_key(any_key: &str) -> Vec<u8> {
    format!("sd:{}", any_key).into_bytes()
}

pub const SOFT_DELETE_VALUE: &[u8] = b"1";

/// `temp_idx:<type>:<targetKey>`
pub fn temp_idx_key(kind: &str, target_key: &str) -> Vec<u8> {
    format!("temp_idx:{}:{}", kind, target_key).into_bytes()
}

pub const TEMP_IDX_PREFIX: &[u8] = b"temp_idx:";

/// `idx:recovery:<type>:<targetKey>` — the real row a temp_idx entry resolves to.
pub fn recovery_idx_key(kind: &str, target_key: &str) -> Vec<u8> {
    format!("idx:recovery:{}:{}", kind, target_key).into_bytes()
}

/// Splits `temp_idx:<type>:<targetKey>` into its `(type, targetKey)` parts.
pub fn parse_temp_idx(key: &str) -> CResult<(String, String)> {
    let rest = key
        .strip_prefix("temp_idx:")
        .ok_or_else(|| Error::InvalidKey(format!("not a temp_idx key: {}", key)))?;
    let (kind, target) = rest
        .split_once(':')
        .ok_or_else(|| Error::InvalidKey(format!("malformed temp_idx key: {}", key)))?;
    Ok((kind.to_string(), target.to_string()))
}

pub const META_NEXT_SEQ: &[u8] = b"meta:next_seq";
pub const SYNC_MARKER: &[u8] = b"sync:marker";

/// WAL entry key: `<20d seq>`. The WAL's own keyspace uses 20-digit sequence
/// numbers (not 9-digit) since it is process-lifetime monotonic, not
/// per-thread.
pub fn wal_seq_key(seq: u64) -> Vec<u8> {
    format!("{:0width$}", seq, width = TS_WIDTH).into_bytes()
}

pub fn parse_wal_seq_key(key: &[u8]) -> CResult<u64> {
    let s = std::str::from_utf8(key).map_err(|e| Error::InvalidKey(e.to_string()))?;
    s.parse::<u64>().map_err(|e| Error::InvalidKey(e.to_string()))
}
