use mos_store::{Status, StoreError};

/// Errors produced by the identity ledger and its bitmap stores.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A log record whose key or packed value cannot be decoded.
    #[error("corrupt log record {key}: {len} value bytes")]
    CorruptLogRecord { key: String, len: usize },

    /// A bitmap page whose stored length does not match its configured width.
    #[error("corrupt bitmap page {key}: {len} bytes, expected {expected}")]
    CorruptPage {
        key: String,
        len: usize,
        expected: usize,
    },

    /// The substrate refused a write the ledger requires to succeed.
    #[error("{op} of key {key} returned {status:?}")]
    WriteFailed {
        op: &'static str,
        key: String,
        status: Status,
    },

    #[error("invalid ledger configuration: {0}")]
    Config(String),

    #[error("ledger consistency violation: {0}")]
    Consistency(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Require `Status::Success` from a write the ledger depends on.
pub(crate) fn expect_success(status: Status, op: &'static str, key: &[u8]) -> LedgerResult<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(LedgerError::WriteFailed {
            op,
            key: hex::encode(key),
            status,
        })
    }
}
