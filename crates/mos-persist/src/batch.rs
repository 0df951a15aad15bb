use std::sync::Arc;

use mos_store::{Transaction, TransactionProvider};
use tracing::debug;

use crate::error::{PersistError, PersistResult};

/// A transaction that commits and reopens itself every `batch_size`
/// accumulated changes.
///
/// ```text
/// start -> (tx / optional_commit)* -> complete
/// ```
///
/// A completed batch cannot be restarted.
pub struct BatchedTransaction {
    provider: Arc<dyn TransactionProvider>,
    batch_size: usize,
    current: Option<Box<dyn Transaction>>,
    pending: usize,
    total: usize,
    commits: usize,
    completed: bool,
}

impl BatchedTransaction {
    pub fn new(provider: Arc<dyn TransactionProvider>, batch_size: usize) -> PersistResult<Self> {
        if batch_size == 0 {
            return Err(PersistError::Config(
                "batched transaction size must be positive".into(),
            ));
        }
        Ok(Self {
            provider,
            batch_size,
            current: None,
            pending: 0,
            total: 0,
            commits: 0,
            completed: false,
        })
    }

    pub fn start(&mut self) -> PersistResult<()> {
        if self.completed {
            return Err(PersistError::BatchCompleted);
        }
        if self.current.is_some() {
            return Err(PersistError::Consistency(
                "batched transaction already started".into(),
            ));
        }
        self.current = Some(self.provider.new_transaction()?);
        Ok(())
    }

    /// The open transaction.
    pub fn tx(&mut self) -> PersistResult<&mut (dyn Transaction + 'static)> {
        if self.completed {
            return Err(PersistError::BatchCompleted);
        }
        match self.current.as_mut() {
            Some(tx) => Ok(tx.as_mut()),
            None => Err(PersistError::Consistency(
                "batched transaction not started".into(),
            )),
        }
    }

    /// Changes the next commit may still absorb before the batch boundary.
    pub fn remaining(&self) -> usize {
        self.batch_size.saturating_sub(self.pending)
    }

    /// Record `changes` made through [`BatchedTransaction::tx`]; commit and
    /// reopen once the batch is full. Returns `true` if a commit happened.
    pub fn optional_commit(&mut self, changes: usize) -> PersistResult<bool> {
        if self.completed {
            return Err(PersistError::BatchCompleted);
        }
        self.pending += changes;
        self.total += changes;
        if self.pending < self.batch_size {
            return Ok(false);
        }
        let tx = self.current.take().ok_or_else(|| {
            PersistError::Consistency("batched transaction not started".into())
        })?;
        tx.commit()?;
        self.commits += 1;
        debug!(
            changes = self.pending,
            total = self.total,
            commits = self.commits,
            "batched transaction committed"
        );
        self.pending = 0;
        self.current = Some(self.provider.new_transaction()?);
        Ok(true)
    }

    /// Commit whatever is left and return the total changes processed.
    pub fn complete(&mut self) -> PersistResult<usize> {
        if self.completed {
            return Err(PersistError::BatchCompleted);
        }
        self.completed = true;
        if let Some(tx) = self.current.take() {
            tx.commit()?;
            self.commits += 1;
        }
        debug!(total = self.total, commits = self.commits, "batched transaction completed");
        Ok(self.total)
    }

    /// Discard the open transaction; the batch cannot be used afterwards.
    pub fn abort(&mut self) {
        self.completed = true;
        if let Some(tx) = self.current.take() {
            tx.abort();
        }
    }

    pub fn commits(&self) -> usize {
        self.commits
    }
}

impl std::fmt::Debug for BatchedTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchedTransaction")
            .field("batch_size", &self.batch_size)
            .field("pending", &self.pending)
            .field("total", &self.total)
            .field("commits", &self.commits)
            .field("completed", &self.completed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mos_store::MemoryKvStore;

    fn batch(store: &MemoryKvStore, size: usize) -> BatchedTransaction {
        let mut batch = BatchedTransaction::new(Arc::new(store.clone()), size).unwrap();
        batch.start().unwrap();
        batch
    }

    fn write(batch: &mut BatchedTransaction, i: u32) {
        batch.tx().unwrap().put("t", &i.to_be_bytes(), b"v").unwrap();
    }

    #[test]
    fn commits_once_per_full_batch() {
        let store = MemoryKvStore::new();
        let mut batch = batch(&store, 3);
        let mut committed = Vec::new();
        for i in 0..7 {
            write(&mut batch, i);
            committed.push(batch.optional_commit(1).unwrap());
        }
        assert_eq!(
            committed,
            vec![false, false, true, false, false, true, false]
        );
        assert_eq!(store.commit_count(), 2);
        assert_eq!(store.len("t"), 6);

        assert_eq!(batch.complete().unwrap(), 7);
        assert_eq!(store.commit_count(), 3);
        assert_eq!(store.len("t"), 7);
    }

    #[test]
    fn large_increment_commits_once_and_resets() {
        let store = MemoryKvStore::new();
        let mut batch = batch(&store, 5);
        assert!(batch.optional_commit(12).unwrap());
        assert_eq!(batch.remaining(), 5);
        assert!(!batch.optional_commit(4).unwrap());
        assert_eq!(batch.remaining(), 1);
        assert_eq!(batch.complete().unwrap(), 16);
        assert_eq!(batch.commits(), 2);
    }

    #[test]
    fn failed_commit_leaves_no_remaining_budget() {
        let store = MemoryKvStore::new();
        let mut batch = batch(&store, 3);
        write(&mut batch, 1);
        store.inject_commit_fault();
        assert!(batch.optional_commit(7).is_err());
        assert_eq!(batch.remaining(), 0);
        assert!(batch.tx().is_err());
        batch.abort();
        assert!(store.is_empty("t"));
    }

    #[test]
    fn zero_size_is_a_config_error() {
        let store = MemoryKvStore::new();
        assert!(matches!(
            BatchedTransaction::new(Arc::new(store), 0),
            Err(PersistError::Config(_))
        ));
    }

    #[test]
    fn reuse_after_complete_fails() {
        let store = MemoryKvStore::new();
        let mut batch = batch(&store, 2);
        batch.complete().unwrap();
        assert!(matches!(batch.complete(), Err(PersistError::BatchCompleted)));
        assert!(matches!(batch.optional_commit(1), Err(PersistError::BatchCompleted)));
        assert!(matches!(batch.start(), Err(PersistError::BatchCompleted)));
        assert!(batch.tx().is_err());
    }

    #[test]
    fn use_before_start_fails() {
        let store = MemoryKvStore::new();
        let mut batch = BatchedTransaction::new(Arc::new(store), 2).unwrap();
        assert!(matches!(batch.tx(), Err(PersistError::Consistency(_))));
    }

    #[test]
    fn abort_discards_pending_writes() {
        let store = MemoryKvStore::new();
        let mut batch = batch(&store, 10);
        write(&mut batch, 1);
        batch.optional_commit(1).unwrap();
        batch.abort();
        assert!(store.is_empty("t"));
        assert!(matches!(batch.complete(), Err(PersistError::BatchCompleted)));
    }
}
