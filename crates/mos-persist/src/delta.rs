//! Delta-overlay collections persisted row-by-row in a shared table.
//!
//! A [`DeltaMap`] keeps `backing` (what is durably committed) and `delta`
//! (pending changes). Reads consult `delta` first. Only [`PersistentCollection::commit`]
//! moves changes into `backing`, writing exactly the rows that changed.

use std::collections::{BTreeMap, BTreeSet};

use mos_store::Transaction;
use mos_types::Identifier;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

use crate::error::{expect_success, PersistError, PersistResult};

/// A pending change to one key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delta<V> {
    Removed,
    Set(V),
}

/// What the overlay holds for one key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pending<'a, V> {
    Unset,
    Removed,
    Set(&'a V),
}

/// A collection whose entries live in their own rows, keyed by the owning
/// object's identifier.
pub trait PersistentCollection: Send {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a commit would write anything.
    fn is_dirty(&self) -> bool;

    /// Write pending changes as rows of `table`, leaving the in-memory view
    /// untouched. Returns the number of rows written.
    fn write(&self, tx: &mut dyn Transaction, table: &str, id: Identifier)
        -> PersistResult<usize>;

    /// Move pending changes into the committed view. Call only once their
    /// rows are written; until then a failed write can simply be retried.
    fn fold(&mut self, id: Identifier) -> PersistResult<()>;

    /// [`write`](PersistentCollection::write) then
    /// [`fold`](PersistentCollection::fold).
    fn commit(&mut self, tx: &mut dyn Transaction, table: &str, id: Identifier)
        -> PersistResult<usize> {
        let writes = self.write(tx, table, id)?;
        self.fold(id)?;
        Ok(writes)
    }

    /// Bulk-load every committed row. Valid once, on an untouched collection.
    fn load(&mut self, tx: &mut dyn Transaction, table: &str, id: Identifier)
        -> PersistResult<usize>;
}

pub(crate) fn row_prefix(id: Identifier) -> [u8; Identifier::BYTES] {
    id.to_be_bytes()
}

fn encode<T: Serialize>(value: &T) -> PersistResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| PersistError::Codec(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> PersistResult<T> {
    bincode::deserialize(bytes).map_err(|e| PersistError::Codec(e.to_string()))
}

fn row_key<K: Serialize>(id: Identifier, key: &K) -> PersistResult<Vec<u8>> {
    let mut row = row_prefix(id).to_vec();
    row.extend(encode(key)?);
    Ok(row)
}

/// Delete up to `limit` rows of collection `id` (all of them for `None`).
pub(crate) fn delete_rows(
    tx: &mut dyn Transaction,
    table: &str,
    id: Identifier,
    limit: Option<usize>,
) -> PersistResult<usize> {
    let mut deleted = 0;
    let mut cursor = tx.cursor(table, &row_prefix(id))?;
    while limit.map_or(true, |limit| deleted < limit) {
        if cursor.next_entry()?.is_none() {
            break;
        }
        expect_success(cursor.delete_current()?, id, "delete collection row")?;
        deleted += 1;
    }
    Ok(deleted)
}

/// A map overlaying pending changes on its committed entries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeltaMap<K, V> {
    backing: BTreeMap<K, V>,
    delta: BTreeMap<K, Delta<V>>,
    size: usize,
    clear_pending: bool,
    loaded: bool,
}

impl<K, V> Default for DeltaMap<K, V> {
    fn default() -> Self {
        Self {
            backing: BTreeMap::new(),
            delta: BTreeMap::new(),
            size: 0,
            clear_pending: false,
            loaded: false,
        }
    }
}

impl<K: Ord + Clone, V: Clone> DeltaMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        match self.delta.get(key) {
            Some(Delta::Removed) => None,
            Some(Delta::Set(value)) => Some(value),
            None => self.backing.get(key),
        }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    pub fn pending(&self, key: &K) -> Pending<'_, V> {
        match self.delta.get(key) {
            None => Pending::Unset,
            Some(Delta::Removed) => Pending::Removed,
            Some(Delta::Set(value)) => Pending::Set(value),
        }
    }

    /// Insert or overwrite, returning the previous logical value.
    pub fn put(&mut self, key: K, value: V) -> Option<V> {
        let previous = self.get(&key).cloned();
        match self.delta.get(&key) {
            Some(Delta::Removed) => self.size += 1,
            Some(Delta::Set(_)) => {}
            None if !self.backing.contains_key(&key) => self.size += 1,
            None => {}
        }
        self.delta.insert(key, Delta::Set(value));
        previous
    }

    /// Remove, returning the previous logical value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        if self.backing.contains_key(key) {
            if let Some(Delta::Removed) = self.delta.get(key) {
                return None;
            }
            let previous = self.get(key).cloned();
            self.delta.insert(key.clone(), Delta::Removed);
            self.size -= 1;
            previous
        } else {
            match self.delta.get(key) {
                Some(Delta::Set(_)) => {}
                _ => return None,
            }
            self.size -= 1;
            match self.delta.remove(key) {
                Some(Delta::Set(value)) => Some(value),
                _ => None,
            }
        }
    }

    /// Drop every entry. Durable rows are deleted on the next commit.
    pub fn clear(&mut self) {
        self.clear_pending = true;
        self.delta.clear();
        self.backing.clear();
        self.size = 0;
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Logical entries: committed keys without a pending change, then every
    /// pending non-removed entry.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        let delta = &self.delta;
        self.backing
            .iter()
            .filter(move |(key, _)| !delta.contains_key(*key))
            .chain(self.delta.iter().filter_map(|(key, change)| match change {
                Delta::Set(value) => Some((key, value)),
                Delta::Removed => None,
            }))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.iter().map(|(key, _)| key)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.iter().map(|(_, value)| value)
    }

    /// Sorted copy of the logical entries.
    pub fn to_btree_map(&self) -> BTreeMap<K, V> {
        self.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl<K, V> PersistentCollection for DeltaMap<K, V>
where
    K: Ord + Clone + Serialize + DeserializeOwned + Send,
    V: Clone + Serialize + DeserializeOwned + Send,
{
    fn len(&self) -> usize {
        self.size
    }

    fn is_dirty(&self) -> bool {
        self.clear_pending || !self.delta.is_empty()
    }

    fn write(
        &self,
        tx: &mut dyn Transaction,
        table: &str,
        id: Identifier,
    ) -> PersistResult<usize> {
        let mut writes = 0;
        if self.clear_pending {
            writes += delete_rows(tx, table, id, None)?;
        }
        for (key, change) in &self.delta {
            let row = row_key(id, key)?;
            match change {
                Delta::Removed => {
                    expect_success(tx.delete(table, &row)?, id, "delete entry")?;
                }
                Delta::Set(value) => {
                    let bytes = encode(value)?;
                    if self.backing.contains_key(key) {
                        expect_success(tx.update(table, &row, &bytes)?, id, "update entry")?;
                    } else {
                        expect_success(tx.insert(table, &row, &bytes)?, id, "insert entry")?;
                    }
                }
            }
            writes += 1;
        }
        trace!(%id, writes, "collection rows written");
        Ok(writes)
    }

    fn fold(&mut self, id: Identifier) -> PersistResult<()> {
        self.clear_pending = false;
        for (key, change) in std::mem::take(&mut self.delta) {
            match change {
                Delta::Removed => {
                    self.backing.remove(&key);
                }
                Delta::Set(value) => {
                    self.backing.insert(key, value);
                }
            }
        }
        if self.size != self.backing.len() {
            return Err(PersistError::Consistency(format!(
                "collection {id} size {} disagrees with {} committed entries",
                self.size,
                self.backing.len()
            )));
        }
        trace!(%id, size = self.size, "collection committed");
        Ok(())
    }

    fn load(
        &mut self,
        tx: &mut dyn Transaction,
        table: &str,
        id: Identifier,
    ) -> PersistResult<usize> {
        if self.loaded || self.clear_pending || !self.backing.is_empty() || !self.delta.is_empty() {
            return Err(PersistError::Consistency(format!(
                "collection {id} can only be loaded once, before any change"
            )));
        }
        let mut cursor = tx.cursor(table, &row_prefix(id))?;
        while let Some((row, value)) = cursor.next_entry()? {
            let key: K = decode(&row[Identifier::BYTES..])?;
            self.backing.insert(key, decode(&value)?);
        }
        self.size = self.backing.len();
        self.loaded = true;
        Ok(self.size)
    }
}

/// A set stored as a [`DeltaMap`] to unit values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeltaSet<K> {
    inner: DeltaMap<K, ()>,
}

impl<K> Default for DeltaSet<K> {
    fn default() -> Self {
        Self {
            inner: DeltaMap::default(),
        }
    }
}

impl<K: Ord + Clone> DeltaSet<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `key` was not already present.
    pub fn insert(&mut self, key: K) -> bool {
        self.inner.put(key, ()).is_none()
    }

    /// Returns `true` if `key` was present.
    pub fn remove(&mut self, key: &K) -> bool {
        self.inner.remove(key).is_some()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &K> + '_ {
        self.inner.keys()
    }

    pub fn to_btree_set(&self) -> BTreeSet<K> {
        self.iter().cloned().collect()
    }
}

impl<K> PersistentCollection for DeltaSet<K>
where
    K: Ord + Clone + Serialize + DeserializeOwned + Send,
{
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn is_dirty(&self) -> bool {
        PersistentCollection::is_dirty(&self.inner)
    }

    fn write(
        &self,
        tx: &mut dyn Transaction,
        table: &str,
        id: Identifier,
    ) -> PersistResult<usize> {
        self.inner.write(tx, table, id)
    }

    fn fold(&mut self, id: Identifier) -> PersistResult<()> {
        self.inner.fold(id)
    }

    fn load(
        &mut self,
        tx: &mut dyn Transaction,
        table: &str,
        id: Identifier,
    ) -> PersistResult<usize> {
        self.inner.load(tx, table, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mos_store::{MemoryKvStore, TransactionProvider};
    use mos_types::Value;
    use proptest::prelude::*;

    const TABLE: &str = "collections";

    fn id(raw: u64) -> Identifier {
        Identifier::new(raw)
    }

    fn commit<C: PersistentCollection>(store: &MemoryKvStore, c: &mut C, owner: u64) -> usize {
        let mut tx = store.new_transaction().unwrap();
        let writes = c.commit(tx.as_mut(), TABLE, id(owner)).unwrap();
        tx.commit().unwrap();
        writes
    }

    fn reload<K, V>(store: &MemoryKvStore, owner: u64) -> DeltaMap<K, V>
    where
        K: Ord + Clone + Serialize + DeserializeOwned + Send,
        V: Clone + Serialize + DeserializeOwned + Send,
    {
        let mut map = DeltaMap::new();
        let mut tx = store.new_transaction().unwrap();
        map.load(tx.as_mut(), TABLE, id(owner)).unwrap();
        map
    }

    // --- overlay semantics ---

    #[test]
    fn put_and_get_before_commit() {
        let mut map: DeltaMap<String, i64> = DeltaMap::new();
        assert_eq!(map.put("a".into(), 1), None);
        assert_eq!(map.put("a".into(), 2), Some(1));
        assert_eq!(map.get(&"a".into()), Some(&2));
        assert_eq!(map.len(), 1);
        assert_eq!(map.pending(&"a".into()), Pending::Set(&2));
        assert_eq!(map.pending(&"b".into()), Pending::Unset);
    }

    #[test]
    fn remove_of_uncommitted_entry_is_pure_reversal() {
        let store = MemoryKvStore::new();
        let mut map: DeltaMap<u32, u32> = DeltaMap::new();
        map.put(1, 10);
        assert_eq!(map.remove(&1), Some(10));
        assert_eq!(map.len(), 0);
        assert_eq!(map.pending(&1), Pending::Unset);
        assert_eq!(commit(&store, &mut map, 7), 0);
        assert_eq!(store.write_count(TABLE), 0);
    }

    #[test]
    fn remove_of_committed_entry_tombstones() {
        let store = MemoryKvStore::new();
        let mut map: DeltaMap<u32, u32> = DeltaMap::new();
        map.put(1, 10);
        map.put(2, 20);
        commit(&store, &mut map, 7);

        assert_eq!(map.remove(&1), Some(10));
        assert_eq!(map.pending(&1), Pending::Removed);
        assert_eq!(map.remove(&1), None);
        assert_eq!(map.len(), 1);
        assert!(!map.contains_key(&1));

        map.put(1, 11);
        assert_eq!(map.len(), 2);
        map.remove(&1);
        commit(&store, &mut map, 7);
        assert_eq!(store.len(TABLE), 1);
        assert_eq!(reload::<u32, u32>(&store, 7).to_btree_map(), BTreeMap::from([(2, 20)]));
    }

    #[test]
    fn remove_missing_key_is_noop() {
        let mut map: DeltaMap<u32, u32> = DeltaMap::new();
        assert_eq!(map.remove(&3), None);
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn overwrite_of_committed_entry_updates_row() {
        let store = MemoryKvStore::new();
        let mut map: DeltaMap<u32, String> = DeltaMap::new();
        map.put(1, "one".into());
        commit(&store, &mut map, 1);
        assert_eq!(map.put(1, "uno".into()), Some("one".into()));
        assert_eq!(map.len(), 1);
        assert_eq!(commit(&store, &mut map, 1), 1);
        assert_eq!(reload::<u32, String>(&store, 1).get(&1), Some(&"uno".to_string()));
    }

    #[test]
    fn iteration_is_logical_union_without_duplicates() {
        let store = MemoryKvStore::new();
        let mut map: DeltaMap<u32, u32> = DeltaMap::new();
        for k in 0..4 {
            map.put(k, k);
        }
        commit(&store, &mut map, 1);
        map.put(1, 100);
        map.remove(&2);
        map.put(9, 9);

        let mut keys: Vec<u32> = map.keys().copied().collect();
        keys.sort_unstable();
        assert_eq!(keys, vec![0, 1, 3, 9]);
        assert_eq!(map.iter().count(), map.len());
        assert_eq!(map.get(&1), Some(&100));
        assert_eq!(map.values().filter(|v| **v == 100).count(), 1);
    }

    #[test]
    fn clear_deletes_rows_on_commit() {
        let store = MemoryKvStore::new();
        let mut map: DeltaMap<u32, u32> = DeltaMap::new();
        for k in 0..5 {
            map.put(k, k);
        }
        commit(&store, &mut map, 3);
        let mut other: DeltaMap<u32, u32> = DeltaMap::new();
        other.put(0, 0);
        commit(&store, &mut other, 4);

        map.clear();
        assert!(map.is_empty());
        map.put(2, 22);
        commit(&store, &mut map, 3);

        assert_eq!(reload::<u32, u32>(&store, 3).to_btree_map(), BTreeMap::from([(2, 22)]));
        assert_eq!(reload::<u32, u32>(&store, 4).len(), 1);
    }

    #[test]
    fn load_twice_is_a_consistency_error() {
        let store = MemoryKvStore::new();
        let mut map: DeltaMap<u32, u32> = DeltaMap::new();
        let mut tx = store.new_transaction().unwrap();
        map.load(tx.as_mut(), TABLE, id(1)).unwrap();
        assert!(matches!(
            map.load(tx.as_mut(), TABLE, id(1)),
            Err(PersistError::Consistency(_))
        ));
    }

    #[test]
    fn user_values_never_read_as_removed() {
        let store = MemoryKvStore::new();
        let mut map: DeltaMap<Value, Value> = DeltaMap::new();
        map.put(Value::from("k"), Value::Null);
        map.put(Value::from("empty"), Value::Bytes(Vec::new()));
        assert_eq!(map.get(&Value::from("k")), Some(&Value::Null));
        assert_eq!(map.len(), 2);
        commit(&store, &mut map, 5);

        let reloaded = reload::<Value, Value>(&store, 5);
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains_key(&Value::from("k")));
        assert_eq!(reloaded.get(&Value::from("empty")), Some(&Value::Bytes(Vec::new())));
    }

    #[test]
    fn failed_commit_keeps_pending_changes() {
        let store = MemoryKvStore::new();
        let mut map: DeltaMap<u32, u32> = DeltaMap::new();
        map.put(1, 1);
        store.inject_fault(TABLE);
        let mut tx = store.new_transaction().unwrap();
        assert!(map.commit(tx.as_mut(), TABLE, id(1)).is_err());
        tx.abort();
        assert!(PersistentCollection::is_dirty(&map));
        store.clear_faults();
        commit(&store, &mut map, 1);
        assert!(!PersistentCollection::is_dirty(&map));
    }

    #[test]
    fn aborted_write_can_be_rewritten() {
        let store = MemoryKvStore::new();
        let mut map: DeltaMap<u32, u32> = DeltaMap::new();
        map.put(1, 10);
        map.put(2, 20);

        let mut tx = store.new_transaction().unwrap();
        assert_eq!(map.write(tx.as_mut(), TABLE, id(3)).unwrap(), 2);
        tx.abort();
        assert!(PersistentCollection::is_dirty(&map));
        assert_eq!(map.pending(&1), Pending::Set(&10));

        let mut tx = store.new_transaction().unwrap();
        assert_eq!(map.write(tx.as_mut(), TABLE, id(3)).unwrap(), 2);
        map.fold(id(3)).unwrap();
        tx.commit().unwrap();
        assert!(!PersistentCollection::is_dirty(&map));
        assert_eq!(reload::<u32, u32>(&store, 3).to_btree_map(), map.to_btree_map());
    }

    #[test]
    fn set_semantics() {
        let store = MemoryKvStore::new();
        let mut set: DeltaSet<String> = DeltaSet::new();
        assert!(set.insert("a".into()));
        assert!(!set.insert("a".into()));
        assert!(set.insert("b".into()));
        commit(&store, &mut set, 2);
        assert!(set.remove(&"a".to_string()));
        assert!(!set.remove(&"a".to_string()));
        commit(&store, &mut set, 2);

        let mut reloaded: DeltaSet<String> = DeltaSet::new();
        let mut tx = store.new_transaction().unwrap();
        reloaded.load(tx.as_mut(), TABLE, id(2)).unwrap();
        assert_eq!(reloaded.to_btree_set(), BTreeSet::from(["b".to_string()]));
    }

    // --- properties ---

    #[derive(Clone, Debug)]
    enum Op {
        Put(u8, u16),
        Remove(u8),
        Commit,
        Clear,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            6 => (0u8..16, any::<u16>()).prop_map(|(k, v)| Op::Put(k, v)),
            4 => (0u8..16).prop_map(Op::Remove),
            2 => Just(Op::Commit),
            1 => Just(Op::Clear),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn size_tracks_logical_entries(ops in prop::collection::vec(op_strategy(), 1..60)) {
            let store = MemoryKvStore::new();
            let mut map: DeltaMap<u8, u16> = DeltaMap::new();
            let mut model: BTreeMap<u8, u16> = BTreeMap::new();
            for op in ops {
                match op {
                    Op::Put(k, v) => { prop_assert_eq!(map.put(k, v), model.insert(k, v)); }
                    Op::Remove(k) => { prop_assert_eq!(map.remove(&k), model.remove(&k)); }
                    Op::Commit => { commit(&store, &mut map, 1); }
                    Op::Clear => { map.clear(); model.clear(); }
                }
                prop_assert_eq!(map.len(), model.len());
                prop_assert_eq!(map.iter().count(), model.len());
            }
        }

        #[test]
        fn committed_view_matches_fresh_load(ops in prop::collection::vec(op_strategy(), 1..60)) {
            let store = MemoryKvStore::new();
            let mut map: DeltaMap<u8, u16> = DeltaMap::new();
            for op in ops {
                match op {
                    Op::Put(k, v) => { map.put(k, v); }
                    Op::Remove(k) => { map.remove(&k); }
                    Op::Clear => map.clear(),
                    Op::Commit => {
                        commit(&store, &mut map, 9);
                        let fresh = reload::<u8, u16>(&store, 9);
                        prop_assert_eq!(fresh.to_btree_map(), map.to_btree_map());
                        prop_assert_eq!(fresh.len(), map.len());
                    }
                }
            }
        }
    }
}
