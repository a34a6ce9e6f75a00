//! Typed errors shared across every component of the engine.
//!
//! Library code returns `CResult<T>` end to end; nothing in `progressdb-core`
//! panics except the unrecoverable KEK-length check at boot.

use thiserror::Error;

pub type CResult<T> = Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("queue is full")]
    QueueFull,

    #[error("queue is closed")]
    QueueClosed,

    #[error("thread not found: {0}")]
    ThreadNotFound(String),

    #[error("thread deleted: {0}")]
    ThreadDeleted(String),

    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid retention period: {0}")]
    InvalidPeriod(String),

    #[error("lease already held")]
    LeaseHeld,

    #[error("lease lost")]
    LeaseLost,

    #[error("no KMS provider configured")]
    KMSNoProvider,

    #[error("no DEK registered for thread")]
    NoThreadKey,

    #[error("invalid KMS key length")]
    KMSInvalidKey,

    #[error("decryption failed")]
    DecryptFailed,

    #[error("encryption failed")]
    EncryptFailed,

    #[error("WAL is corrupt: {0}")]
    WALCorrupt(String),

    #[error("WAL is closed")]
    WALClosed,

    #[error("storage unavailable: {0}")]
    StoreUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("value error: {0}")]
    Value(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Parse(e.to_string())
    }
}
