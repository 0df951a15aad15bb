use crate::error::StoreResult;

/// Outcome of a single key-value operation that did not fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Success,
    /// `update` or `delete` of an absent key.
    NotFound,
    /// `insert` of a key that already holds a value.
    KeyExists,
}

impl Status {
    pub fn is_success(self) -> bool {
        self == Status::Success
    }
}

/// Opens transactions against a key-value engine.
pub trait TransactionProvider: Send + Sync {
    fn new_transaction(&self) -> StoreResult<Box<dyn Transaction>>;
}

/// A unit of atomic work over named, byte-ordered tables.
///
/// Dropping a transaction without calling [`Transaction::commit`] discards
/// its writes.
pub trait Transaction: Send {
    /// Read a value, seeing this transaction's own writes first.
    fn get(&mut self, table: &str, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// Write a new key. Returns [`Status::KeyExists`] if the key is present.
    fn insert(&mut self, table: &str, key: &[u8], value: &[u8]) -> StoreResult<Status>;

    /// Overwrite an existing key. Returns [`Status::NotFound`] if absent.
    fn update(&mut self, table: &str, key: &[u8], value: &[u8]) -> StoreResult<Status>;

    /// Write a key whether or not it is present.
    fn put(&mut self, table: &str, key: &[u8], value: &[u8]) -> StoreResult<Status>;

    /// Remove a key. Returns [`Status::NotFound`] if absent.
    fn delete(&mut self, table: &str, key: &[u8]) -> StoreResult<Status>;

    /// Open a forward cursor over every key of `table` starting with
    /// `prefix` (all keys for an empty prefix), in ascending byte order.
    fn cursor<'a>(&'a mut self, table: &str, prefix: &[u8]) -> StoreResult<Box<dyn Cursor + 'a>>;

    /// Make every write of this transaction visible atomically.
    fn commit(self: Box<Self>) -> StoreResult<()>;

    /// Discard every write of this transaction.
    fn abort(self: Box<Self>);
}

/// Forward iteration over one table range; closed on drop.
pub trait Cursor {
    /// Advance and return the next entry, or `None` when exhausted.
    fn next_entry(&mut self) -> StoreResult<Option<(Vec<u8>, Vec<u8>)>>;

    /// Delete the entry most recently returned by [`Cursor::next_entry`].
    fn delete_current(&mut self) -> StoreResult<Status>;
}
