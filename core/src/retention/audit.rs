//! Append-only audit trail for retention runs, one JSON line per
//! `AuditRecord`. Opened the same way `storage::log::Log` opens its append
//! log — create the parent directory, open for append, no locking since the
//! retention lease already guarantees a single writer.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use crate::error::{CResult, Error};
use crate::model::AuditRecord;

pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn open(path: PathBuf) -> CResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(AuditLog { path })
    }

    pub fn append(&self, record: &AuditRecord) -> CResult<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = OpenOptions::new().append(true).open(&self.path).map_err(Error::Io)?;
        file.write_all(&line).map_err(Error::Io)?;
        log::info!(target: "audit", "{}", String::from_utf8_lossy(&line).trim_end());
        Ok(())
    }
}
