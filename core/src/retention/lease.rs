//! Single-leader file lease: built the same way `storage::log::Log` takes
//! an exclusive lock on open, except here the mutual exclusion must survive
//! across separate processes on a shared volume, so it uses an atomic
//! `link` into place rather than `flock`.

use std::fs;
use std::io;
use std::path::PathBuf;

use serde_derive::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{CResult, Error};

#[derive(Serialize, Deserialize)]
struct LeaseRecord {
    owner: String,
    expires_ns: i64,
}

/// A lease file at `path`, claimed under `owner`'s name. Cheap to construct;
/// holds no file descriptor between calls.
pub struct FileLease {
    path: PathBuf,
    owner: String,
}

impl FileLease {
    pub fn new(path: PathBuf, owner: impl Into<String>) -> Self {
        FileLease { path, owner: owner.into() }
    }

    /// Writes a temp file, then `link`s it into place — atomic on a single
    /// filesystem. If the lease already exists, reads it: an expired lease
    /// is stolen via `rename`; a live one reports `Error::LeaseHeld`.
    pub fn acquire(&self, clock: &dyn Clock, ttl_ns: i64) -> CResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = self.tmp_path();
        self.write_record(&tmp_path, clock.now_ns() + ttl_ns)?;

        match fs::hard_link(&tmp_path, &self.path) {
            Ok(()) => {
                let _ = fs::remove_file(&tmp_path);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => self.steal_if_expired(&tmp_path, clock),
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                Err(Error::Io(e))
            }
        }
    }

    fn steal_if_expired(&self, tmp_path: &PathBuf, clock: &dyn Clock) -> CResult<()> {
        let existing = match self.read() {
            Ok(record) => record,
            // The holder released between our failed link and this read;
            // the slot is free, so take it.
            Err(Error::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                fs::rename(tmp_path, &self.path)?;
                return Ok(());
            }
            Err(e) => {
                let _ = fs::remove_file(tmp_path);
                return Err(e);
            }
        };

        if existing.expires_ns < clock.now_ns() {
            fs::rename(tmp_path, &self.path)?;
            Ok(())
        } else {
            let _ = fs::remove_file(tmp_path);
            Err(Error::LeaseHeld)
        }
    }

    /// Verifies ownership, then rewrites `expires_ns`. Fails with
    /// `Error::LeaseLost` if another owner has since taken the lease.
    pub fn renew(&self, clock: &dyn Clock, ttl_ns: i64) -> CResult<()> {
        let existing = self.read()?;
        if existing.owner != self.owner {
            return Err(Error::LeaseLost);
        }
        let tmp_path = self.tmp_path();
        self.write_record(&tmp_path, clock.now_ns() + ttl_ns)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Verifies ownership, then removes the lease file. A lease that's
    /// already gone (e.g. expired and stolen) is not an error.
    pub fn release(&self) -> CResult<()> {
        match self.read() {
            Ok(existing) if existing.owner == self.owner => {
                fs::remove_file(&self.path).map_err(Error::Io)
            }
            Ok(_) => Err(Error::LeaseLost),
            Err(Error::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension(format!("tmp.{}.{}", std::process::id(), self.owner))
    }

    fn write_record(&self, tmp_path: &PathBuf, expires_ns: i64) -> CResult<()> {
        let record = LeaseRecord { owner: self.owner.clone(), expires_ns };
        fs::write(tmp_path, serde_json::to_vec(&record)?).map_err(Error::Io)
    }

    fn read(&self) -> CResult<LeaseRecord> {
        let bytes = fs::read(&self.path).map_err(Error::Io)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    #[test]
    fn a_fresh_lease_can_be_acquired_and_released() {
        let dir = tempdir::TempDir::new("lease").unwrap();
        let path = dir.path().join("retention.lock");
        let lease = FileLease::new(path, "runner-1");
        let clock = FakeClock::new(1_000);

        lease.acquire(&clock, 10_000).unwrap();
        lease.release().unwrap();
    }

    #[test]
    fn a_second_owner_cannot_acquire_a_live_lease() {
        let dir = tempdir::TempDir::new("lease").unwrap();
        let path = dir.path().join("retention.lock");
        let a = FileLease::new(path.clone(), "runner-a");
        let b = FileLease::new(path, "runner-b");
        let clock = FakeClock::new(1_000);

        a.acquire(&clock, 10_000).unwrap();
        assert!(matches!(b.acquire(&clock, 10_000), Err(Error::LeaseHeld)));
    }

    #[test]
    fn an_expired_lease_can_be_stolen() {
        let dir = tempdir::TempDir::new("lease").unwrap();
        let path = dir.path().join("retention.lock");
        let a = FileLease::new(path.clone(), "runner-a");
        let b = FileLease::new(path, "runner-b");
        let clock = FakeClock::new(1_000);

        a.acquire(&clock, 500).unwrap();
        clock.advance(1_000);
        b.acquire(&clock, 10_000).unwrap();
    }

    #[test]
    fn renew_fails_once_another_owner_holds_the_lease() {
        let dir = tempdir::TempDir::new("lease").unwrap();
        let path = dir.path().join("retention.lock");
        let a = FileLease::new(path.clone(), "runner-a");
        let b = FileLease::new(path, "runner-b");
        let clock = FakeClock::new(1_000);

        a.acquire(&clock, 500).unwrap();
        clock.advance(1_000);
        b.acquire(&clock, 10_000).unwrap();

        assert!(matches!(a.renew(&clock, 10_000), Err(Error::LeaseLost)));
    }
}
