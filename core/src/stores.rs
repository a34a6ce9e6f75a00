//! The two independent ordered KV engines this store is built on: `store_db`
//! holds canonical thread/message rows, `index_db` holds everything
//! derived (history, range metadata, ownership, soft-delete markers).
//! Bundled together since almost every higher component needs both.

use std::path::Path;

use crate::error::CResult;
use crate::storage::kv_store::KvStore;
use crate::storage::log_cask::LogCask;

#[derive(Clone)]
pub struct Stores {
    pub store_db: KvStore<LogCask>,
    pub index_db: KvStore<LogCask>,
}

impl Stores {
    pub fn open(store_path: &Path, index_path: &Path, disable_wal: bool) -> CResult<Self> {
        let store_db = KvStore::new(LogCask::open(store_path.to_path_buf(), true, disable_wal)?);
        let index_db = KvStore::new(LogCask::open(index_path.to_path_buf(), true, disable_wal)?);
        Ok(Stores { store_db, index_db })
    }
}
