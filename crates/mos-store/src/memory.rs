use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::error::{StoreError, StoreResult};
use crate::traits::{Cursor, Status, Transaction, TransactionProvider};

pub(crate) type Table = BTreeMap<Vec<u8>, Vec<u8>>;
pub(crate) type Tables = BTreeMap<String, Table>;

const COMMIT_FAULT_TABLE: &str = "<commit>";

#[derive(Default)]
struct Shared {
    tables: RwLock<Tables>,
    commits: AtomicU64,
    write_counts: Mutex<HashMap<String, u64>>,
    faults: Mutex<Faults>,
}

#[derive(Default)]
struct Faults {
    tables: HashSet<String>,
    commit: bool,
}

/// In-memory, ordered key-value engine with buffered transactions.
///
/// Each table is a `BTreeMap` of byte keys. A transaction stages its writes
/// privately and applies them under a single write lock on commit, so other
/// transactions observe all of a commit or none of it. Concurrent writers are
/// not conflict-checked: the later commit wins per key.
///
/// Cloning the store yields another handle to the same tables.
#[derive(Clone, Default)]
pub struct MemoryKvStore {
    shared: Arc<Shared>,
}

impl MemoryKvStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_tables(tables: Tables) -> Self {
        let store = Self::new();
        *store.shared.tables.write() = tables;
        store
    }

    pub(crate) fn export_tables(&self) -> Tables {
        self.shared.tables.read().clone()
    }

    /// Number of transactions committed through this store.
    pub fn commit_count(&self) -> u64 {
        self.shared.commits.load(Ordering::Acquire)
    }

    /// Number of committed write operations (insert, update, put, delete)
    /// issued against `table`.
    pub fn write_count(&self, table: &str) -> u64 {
        self.shared
            .write_counts
            .lock()
            .get(table)
            .copied()
            .unwrap_or(0)
    }

    /// Number of committed entries in `table`.
    pub fn len(&self, table: &str) -> usize {
        self.shared
            .tables
            .read()
            .get(table)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    /// Returns `true` if `table` holds no committed entries.
    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    /// Names of every table that has ever been written.
    pub fn table_names(&self) -> Vec<String> {
        self.shared.tables.read().keys().cloned().collect()
    }

    /// Make every subsequent write or cursor on `table` fail until
    /// [`MemoryKvStore::clear_faults`] is called.
    pub fn inject_fault(&self, table: &str) {
        self.shared.faults.lock().tables.insert(table.to_string());
    }

    /// Make the next commit fail. The failing transaction's writes are
    /// discarded.
    pub fn inject_commit_fault(&self) {
        self.shared.faults.lock().commit = true;
    }

    pub fn clear_faults(&self) {
        let mut faults = self.shared.faults.lock();
        faults.tables.clear();
        faults.commit = false;
    }
}

impl TransactionProvider for MemoryKvStore {
    fn new_transaction(&self) -> StoreResult<Box<dyn Transaction>> {
        Ok(Box::new(MemoryTransaction {
            shared: Arc::clone(&self.shared),
            writes: HashMap::new(),
            write_ops: HashMap::new(),
        }))
    }
}

impl std::fmt::Debug for MemoryKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.shared.tables.read();
        let sizes: BTreeMap<&str, usize> = tables.iter().map(|(k, v)| (k.as_str(), v.len())).collect();
        f.debug_struct("MemoryKvStore")
            .field("tables", &sizes)
            .field("commits", &self.commit_count())
            .finish()
    }
}

/// A transaction over a [`MemoryKvStore`].
///
/// A staged `None` records a deletion of a committed key.
pub struct MemoryTransaction {
    shared: Arc<Shared>,
    writes: HashMap<String, BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
    write_ops: HashMap<String, u64>,
}

impl MemoryTransaction {
    fn check_fault(&self, table: &str, op: &'static str) -> StoreResult<()> {
        if self.shared.faults.lock().tables.contains(table) {
            return Err(StoreError::Injected {
                table: table.to_string(),
                op,
            });
        }
        Ok(())
    }

    fn lookup(&self, table: &str, key: &[u8]) -> Option<Vec<u8>> {
        if let Some(staged) = self.writes.get(table).and_then(|w| w.get(key)) {
            return staged.clone();
        }
        self.shared
            .tables
            .read()
            .get(table)
            .and_then(|t| t.get(key))
            .cloned()
    }

    fn stage(&mut self, table: &str, key: &[u8], value: Option<Vec<u8>>) {
        self.writes
            .entry(table.to_string())
            .or_default()
            .insert(key.to_vec(), value);
        *self.write_ops.entry(table.to_string()).or_default() += 1;
    }
}

impl Transaction for MemoryTransaction {
    fn get(&mut self, table: &str, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.lookup(table, key))
    }

    fn insert(&mut self, table: &str, key: &[u8], value: &[u8]) -> StoreResult<Status> {
        self.check_fault(table, "insert")?;
        if self.lookup(table, key).is_some() {
            return Ok(Status::KeyExists);
        }
        self.stage(table, key, Some(value.to_vec()));
        Ok(Status::Success)
    }

    fn update(&mut self, table: &str, key: &[u8], value: &[u8]) -> StoreResult<Status> {
        self.check_fault(table, "update")?;
        if self.lookup(table, key).is_none() {
            return Ok(Status::NotFound);
        }
        self.stage(table, key, Some(value.to_vec()));
        Ok(Status::Success)
    }

    fn put(&mut self, table: &str, key: &[u8], value: &[u8]) -> StoreResult<Status> {
        self.check_fault(table, "put")?;
        self.stage(table, key, Some(value.to_vec()));
        Ok(Status::Success)
    }

    fn delete(&mut self, table: &str, key: &[u8]) -> StoreResult<Status> {
        self.check_fault(table, "delete")?;
        if self.lookup(table, key).is_none() {
            return Ok(Status::NotFound);
        }
        self.stage(table, key, None);
        Ok(Status::Success)
    }

    fn cursor<'a>(&'a mut self, table: &str, prefix: &[u8]) -> StoreResult<Box<dyn Cursor + 'a>> {
        self.check_fault(table, "cursor")?;
        Ok(Box::new(MemoryCursor {
            tx: self,
            table: table.to_string(),
            prefix: prefix.to_vec(),
            position: None,
            exhausted: false,
        }))
    }

    fn commit(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        {
            let mut faults = this.shared.faults.lock();
            if faults.commit {
                faults.commit = false;
                return Err(StoreError::Injected {
                    table: COMMIT_FAULT_TABLE.to_string(),
                    op: "commit",
                });
            }
        }

        {
            let mut tables = this.shared.tables.write();
            for (name, staged) in this.writes {
                let table = tables.entry(name).or_default();
                for (key, value) in staged {
                    match value {
                        Some(value) => {
                            table.insert(key, value);
                        }
                        None => {
                            table.remove(&key);
                        }
                    }
                }
            }
        }

        let mut counts = this.shared.write_counts.lock();
        for (name, ops) in this.write_ops {
            *counts.entry(name).or_default() += ops;
        }
        let commits = this.shared.commits.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(commits, "memory transaction committed");
        Ok(())
    }

    fn abort(self: Box<Self>) {
        trace!(tables = self.writes.len(), "memory transaction aborted");
    }
}

/// Cursor merging committed entries with the transaction's staged writes.
///
/// Each step seeks the smallest key after the current position, so writes
/// made through the cursor (or the transaction) never disturb iteration.
struct MemoryCursor<'a> {
    tx: &'a mut MemoryTransaction,
    table: String,
    prefix: Vec<u8>,
    position: Option<Vec<u8>>,
    exhausted: bool,
}

fn first_in_range<V: Clone>(
    map: Option<&BTreeMap<Vec<u8>, V>>,
    lower: Bound<&[u8]>,
    prefix: &[u8],
) -> Option<(Vec<u8>, V)> {
    map?.range::<[u8], _>((lower, Bound::Unbounded))
        .next()
        .filter(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
}

impl Cursor for MemoryCursor<'_> {
    fn next_entry(&mut self) -> StoreResult<Option<(Vec<u8>, Vec<u8>)>> {
        if self.exhausted {
            return Ok(None);
        }
        loop {
            let lower = match &self.position {
                Some(p) => Bound::Excluded(p.as_slice()),
                None => Bound::Included(self.prefix.as_slice()),
            };
            let committed = {
                let tables = self.tx.shared.tables.read();
                first_in_range(tables.get(&self.table), lower, &self.prefix)
            };
            let staged = first_in_range(self.tx.writes.get(&self.table), lower, &self.prefix);

            let (key, value) = match (committed, staged) {
                (None, None) => {
                    self.exhausted = true;
                    return Ok(None);
                }
                (Some((ck, cv)), None) => (ck, Some(cv)),
                (None, Some((sk, sv))) => (sk, sv),
                (Some((ck, cv)), Some((sk, sv))) => {
                    if sk <= ck {
                        (sk, sv)
                    } else {
                        (ck, Some(cv))
                    }
                }
            };
            self.position = Some(key.clone());
            if let Some(value) = value {
                return Ok(Some((key, value)));
            }
        }
    }

    fn delete_current(&mut self) -> StoreResult<Status> {
        let Some(key) = self.position.clone() else {
            return Err(StoreError::Storage {
                table: self.table.clone(),
                op: "cursor delete",
                reason: "cursor has no current entry".into(),
            });
        };
        self.tx.delete(&self.table, &key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn committed(store: &MemoryKvStore, entries: &[(&str, &str, &str)]) {
        let mut tx = store.new_transaction().unwrap();
        for (table, k, v) in entries {
            assert_eq!(
                tx.put(table, k.as_bytes(), v.as_bytes()).unwrap(),
                Status::Success
            );
        }
        tx.commit().unwrap();
    }

    fn collect(cursor: &mut (dyn Cursor + '_)) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        while let Some(entry) = cursor.next_entry().unwrap() {
            out.push(entry);
        }
        out
    }

    // -----------------------------------------------------------------------
    // Point operations
    // -----------------------------------------------------------------------

    #[test]
    fn writes_invisible_until_commit() {
        let store = MemoryKvStore::new();
        let mut tx = store.new_transaction().unwrap();
        tx.insert("t", b"k", b"v").unwrap();
        assert_eq!(tx.get("t", b"k").unwrap(), Some(b"v".to_vec()));

        let mut other = store.new_transaction().unwrap();
        assert_eq!(other.get("t", b"k").unwrap(), None);

        tx.commit().unwrap();
        assert_eq!(other.get("t", b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.len("t"), 1);
    }

    #[test]
    fn insert_update_delete_statuses() {
        let store = MemoryKvStore::new();
        let mut tx = store.new_transaction().unwrap();
        assert_eq!(tx.update("t", b"k", b"v").unwrap(), Status::NotFound);
        assert_eq!(tx.delete("t", b"k").unwrap(), Status::NotFound);
        assert_eq!(tx.insert("t", b"k", b"v").unwrap(), Status::Success);
        assert_eq!(tx.insert("t", b"k", b"w").unwrap(), Status::KeyExists);
        assert_eq!(tx.update("t", b"k", b"w").unwrap(), Status::Success);
        assert_eq!(tx.get("t", b"k").unwrap(), Some(b"w".to_vec()));
        assert_eq!(tx.delete("t", b"k").unwrap(), Status::Success);
        assert_eq!(tx.get("t", b"k").unwrap(), None);
        tx.commit().unwrap();
        assert!(store.is_empty("t"));
    }

    #[test]
    fn abort_discards_writes() {
        let store = MemoryKvStore::new();
        let mut tx = store.new_transaction().unwrap();
        tx.put("t", b"k", b"v").unwrap();
        tx.abort();
        assert!(store.is_empty("t"));
        assert_eq!(store.commit_count(), 0);
        assert_eq!(store.write_count("t"), 0);
    }

    #[test]
    fn write_counts_track_committed_ops_only() {
        let store = MemoryKvStore::new();
        committed(&store, &[("a", "1", "x"), ("a", "2", "y"), ("b", "1", "z")]);
        assert_eq!(store.write_count("a"), 2);
        assert_eq!(store.write_count("b"), 1);
        assert_eq!(store.commit_count(), 1);

        let mut tx = store.new_transaction().unwrap();
        tx.get("a", b"1").unwrap();
        tx.commit().unwrap();
        assert_eq!(store.write_count("a"), 2);
        assert_eq!(store.commit_count(), 2);
    }

    // -----------------------------------------------------------------------
    // Cursors
    // -----------------------------------------------------------------------

    #[test]
    fn cursor_yields_prefix_range_in_order() {
        let store = MemoryKvStore::new();
        committed(
            &store,
            &[
                ("t", "b2", "4"),
                ("t", "a1", "1"),
                ("t", "b1", "3"),
                ("t", "c", "5"),
                ("t", "a2", "2"),
            ],
        );
        let mut tx = store.new_transaction().unwrap();
        let mut cursor = tx.cursor("t", b"b").unwrap();
        let keys: Vec<Vec<u8>> = collect(cursor.as_mut()).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"b1".to_vec(), b"b2".to_vec()]);
    }

    #[test]
    fn cursor_merges_staged_writes() {
        let store = MemoryKvStore::new();
        committed(&store, &[("t", "1", "a"), ("t", "3", "c"), ("t", "5", "e")]);

        let mut tx = store.new_transaction().unwrap();
        tx.put("t", b"2", b"b").unwrap();
        tx.delete("t", b"3").unwrap();
        tx.update("t", b"5", b"E").unwrap();
        let mut cursor = tx.cursor("t", b"").unwrap();
        let entries = collect(cursor.as_mut());
        assert_eq!(
            entries,
            vec![
                (b"1".to_vec(), b"a".to_vec()),
                (b"2".to_vec(), b"b".to_vec()),
                (b"5".to_vec(), b"E".to_vec()),
            ]
        );
    }

    #[test]
    fn cursor_delete_current_removes_on_commit() {
        let store = MemoryKvStore::new();
        committed(&store, &[("t", "1", "a"), ("t", "2", "b"), ("t", "3", "c")]);

        let mut tx = store.new_transaction().unwrap();
        {
            let mut cursor = tx.cursor("t", b"").unwrap();
            while let Some((key, _)) = cursor.next_entry().unwrap() {
                if key != b"2" {
                    assert_eq!(cursor.delete_current().unwrap(), Status::Success);
                }
            }
        }
        tx.commit().unwrap();
        assert_eq!(store.len("t"), 1);
    }

    #[test]
    fn cursor_delete_without_position_is_a_fault() {
        let store = MemoryKvStore::new();
        let mut tx = store.new_transaction().unwrap();
        let mut cursor = tx.cursor("t", b"").unwrap();
        assert!(matches!(cursor.delete_current(), Err(StoreError::Storage { .. })));
    }

    // -----------------------------------------------------------------------
    // Fault injection
    // -----------------------------------------------------------------------

    #[test]
    fn injected_table_fault_fails_writes() {
        let store = MemoryKvStore::new();
        store.inject_fault("t");
        let mut tx = store.new_transaction().unwrap();
        assert!(matches!(
            tx.insert("t", b"k", b"v"),
            Err(StoreError::Injected { op: "insert", .. })
        ));
        assert!(tx.insert("other", b"k", b"v").is_ok());
        store.clear_faults();
        assert!(tx.insert("t", b"k", b"v").is_ok());
    }

    #[test]
    fn injected_commit_fault_discards_once() {
        let store = MemoryKvStore::new();
        store.inject_commit_fault();
        let mut tx = store.new_transaction().unwrap();
        tx.put("t", b"k", b"v").unwrap();
        assert!(tx.commit().is_err());
        assert!(store.is_empty("t"));

        committed(&store, &[("t", "k", "v")]);
        assert_eq!(store.len("t"), 1);
    }
}
