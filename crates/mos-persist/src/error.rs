use mos_store::{Status, StoreError};
use mos_types::Identifier;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("ledger error: {0}")]
    Ledger(#[from] mos_ledger::LedgerError),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A required write did not succeed; fatal to the enclosing transaction.
    #[error("{op} of object {id} returned {status:?}")]
    WriteFailed {
        id: Identifier,
        op: &'static str,
        status: Status,
    },

    #[error("consistency violation: {0}")]
    Consistency(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("batched transaction already completed")]
    BatchCompleted,
}

pub type PersistResult<T> = Result<T, PersistError>;

pub(crate) fn expect_success(status: Status, id: Identifier, op: &'static str) -> PersistResult<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(PersistError::WriteFailed { id, op, status })
    }
}
