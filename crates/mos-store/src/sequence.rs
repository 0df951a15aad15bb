use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::{StoreError, StoreResult};
use crate::traits::TransactionProvider;

/// A durable, monotonically increasing counter.
///
/// Values are handed out in contiguous batches so callers can hold a range in
/// memory and touch storage only once per batch.
pub trait MutableSequence: Send + Sync {
    /// Reserve `size` values and return the first. The caller owns
    /// `[first, first + size)`.
    fn next_batch(&self, size: u64) -> StoreResult<u64>;

    /// The next value that [`MutableSequence::next_batch`] would hand out.
    fn current(&self) -> StoreResult<u64>;

    /// Move the counter forward to `next`. Moving it backwards is an error.
    fn set_next(&self, next: u64) -> StoreResult<()>;
}

/// A [`MutableSequence`] persisted as one big-endian `u64` row in a table.
///
/// Every call runs in its own committed transaction.
pub struct KvSequence {
    provider: Arc<dyn TransactionProvider>,
    table: String,
    name: String,
    start: u64,
    lock: Mutex<()>,
}

impl KvSequence {
    /// A sequence stored under `name` in `table`, starting at `start` when no
    /// row exists yet.
    pub fn new(
        provider: Arc<dyn TransactionProvider>,
        table: impl Into<String>,
        name: impl Into<String>,
        start: u64,
    ) -> Self {
        Self {
            provider,
            table: table.into(),
            name: name.into(),
            start,
            lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn decode(&self, raw: &[u8]) -> StoreResult<u64> {
        let bytes: [u8; 8] = raw.try_into().map_err(|_| StoreError::Storage {
            table: self.table.clone(),
            op: "read",
            reason: format!("sequence {} holds {} bytes, expected 8", self.name, raw.len()),
        })?;
        Ok(u64::from_be_bytes(bytes))
    }

    fn read(&self, tx: &mut dyn crate::traits::Transaction) -> StoreResult<u64> {
        match tx.get(&self.table, self.name.as_bytes())? {
            Some(raw) => self.decode(&raw),
            None => Ok(self.start),
        }
    }

    fn advance(&self, compute: impl FnOnce(u64) -> StoreResult<u64>) -> StoreResult<u64> {
        let _guard = self.lock.lock();
        let mut tx = self.provider.new_transaction()?;
        let current = self.read(tx.as_mut())?;
        let next = compute(current)?;
        tx.put(&self.table, self.name.as_bytes(), &next.to_be_bytes())?;
        tx.commit()?;
        trace!(sequence = %self.name, current, next, "sequence advanced");
        Ok(current)
    }
}

impl MutableSequence for KvSequence {
    fn next_batch(&self, size: u64) -> StoreResult<u64> {
        self.advance(|current| {
            current.checked_add(size).ok_or_else(|| StoreError::Storage {
                table: self.table.clone(),
                op: "next_batch",
                reason: format!("sequence {} overflows reserving {size}", self.name),
            })
        })
    }

    fn current(&self) -> StoreResult<u64> {
        let _guard = self.lock.lock();
        let mut tx = self.provider.new_transaction()?;
        let value = self.read(tx.as_mut())?;
        tx.abort();
        Ok(value)
    }

    fn set_next(&self, next: u64) -> StoreResult<()> {
        self.advance(|current| {
            if next < current {
                Err(StoreError::SequenceRegression {
                    name: self.name.clone(),
                    current,
                    requested: next,
                })
            } else {
                Ok(next)
            }
        })
        .map(|_| ())
    }
}

impl std::fmt::Debug for KvSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvSequence")
            .field("table", &self.table)
            .field("name", &self.name)
            .field("start", &self.start)
            .finish()
    }
}
