use std::sync::Arc;

use mos_store::{Transaction, TransactionProvider};
use mos_types::Identifier;
use tracing::debug;

use crate::batch::BatchedTransaction;
use crate::delta::delete_rows;
use crate::error::PersistResult;
use crate::state::ManagedObjectState;

/// Saves, loads and deletes the row-stored entries of persistable
/// collection states.
#[derive(Clone, Debug)]
pub struct CollectionsPersistor {
    table: String,
    delete_batch_size: usize,
}

impl CollectionsPersistor {
    pub fn new(table: impl Into<String>, delete_batch_size: usize) -> Self {
        Self {
            table: table.into(),
            delete_batch_size,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Commit the pending changes of `state`'s collection, if it has one.
    /// Returns `None` for states that are not persistable collections.
    pub fn save_collection(
        &self,
        tx: &mut dyn Transaction,
        id: Identifier,
        state: &mut ManagedObjectState,
    ) -> PersistResult<Option<usize>> {
        match state.collection_mut() {
            Some(collection) => collection.commit(tx, &self.table, id).map(Some),
            None => Ok(None),
        }
    }

    /// Write the rows of `state`'s pending changes without consuming them.
    /// Pair with [`CollectionsPersistor::fold_collection`] once every other
    /// write of the save has succeeded.
    pub fn write_collection(
        &self,
        tx: &mut dyn Transaction,
        id: Identifier,
        state: &ManagedObjectState,
    ) -> PersistResult<Option<usize>> {
        match state.collection() {
            Some(collection) => collection.write(tx, &self.table, id).map(Some),
            None => Ok(None),
        }
    }

    pub fn fold_collection(&self, id: Identifier, state: &mut ManagedObjectState) -> PersistResult<()> {
        match state.collection_mut() {
            Some(collection) => collection.fold(id),
            None => Ok(()),
        }
    }

    /// Load the committed entries of `state`'s collection, if it has one.
    pub fn load_collection(
        &self,
        tx: &mut dyn Transaction,
        id: Identifier,
        state: &mut ManagedObjectState,
    ) -> PersistResult<Option<usize>> {
        match state.collection_mut() {
            Some(collection) => collection.load(tx, &self.table, id).map(Some),
            None => Ok(None),
        }
    }

    /// Delete every row of one collection inside `tx`.
    pub fn delete_collection(&self, tx: &mut dyn Transaction, id: Identifier) -> PersistResult<usize> {
        delete_rows(tx, &self.table, id, None)
    }

    /// Delete every row of every listed collection, committing every
    /// `delete_batch_size` rows. Returns the number of rows deleted.
    pub fn delete_all_collections(
        &self,
        provider: Arc<dyn TransactionProvider>,
        ids: &[Identifier],
    ) -> PersistResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut batch = BatchedTransaction::new(provider, self.delete_batch_size)?;
        batch.start()?;
        let outcome = self.delete_in_batches(&mut batch, ids);
        match outcome {
            Ok(()) => {
                let deleted = batch.complete()?;
                debug!(
                    collections = ids.len(),
                    rows = deleted,
                    commits = batch.commits(),
                    "collections deleted"
                );
                Ok(deleted)
            }
            Err(e) => {
                batch.abort();
                Err(e)
            }
        }
    }

    fn delete_in_batches(&self, batch: &mut BatchedTransaction, ids: &[Identifier]) -> PersistResult<()> {
        for id in ids {
            loop {
                let budget = batch.remaining();
                let deleted = delete_rows(batch.tx()?, &self.table, *id, Some(budget))?;
                batch.optional_commit(deleted)?;
                if deleted < budget {
                    break;
                }
            }
        }
        Ok(())
    }
}
