use std::collections::BTreeMap;

use mos_store::Transaction;
use mos_types::Identifier;
use tracing::trace;

use crate::error::{expect_success, LedgerError, LedgerResult};
use crate::page::BitmapPage;

/// Where and how one bitmap index is stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitmapLayout {
    /// Durable table holding the pages.
    pub table: String,
    /// Words per page.
    pub longs: usize,
    /// Extra key byte distinguishing this index from others sharing `table`.
    pub aux: Option<u8>,
}

impl BitmapLayout {
    pub fn new(table: impl Into<String>, longs: usize) -> Self {
        Self {
            table: table.into(),
            longs,
            aux: None,
        }
    }

    /// Share `table` with other indexes by suffixing every key with `aux`.
    pub fn with_aux(mut self, aux: u8) -> Self {
        self.aux = Some(aux);
        self
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.longs == 0 {
            return Err(LedgerError::Config(format!(
                "bitmap table {} needs at least one word per page",
                self.table
            )));
        }
        if self.table.is_empty() {
            return Err(LedgerError::Config("bitmap table name is empty".into()));
        }
        Ok(())
    }

    pub fn page_key(&self, base: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(9);
        key.extend_from_slice(&base.to_be_bytes());
        if let Some(aux) = self.aux {
            key.push(aux);
        }
        key
    }

    /// Decode a stored key into its page base, or `None` if the key belongs
    /// to another index sharing the table.
    pub fn decode_key(&self, key: &[u8]) -> Option<u64> {
        let base = key.get(..8)?;
        let rest = &key[8..];
        match (self.aux, rest) {
            (None, []) => {}
            (Some(aux), [found]) if *found == aux => {}
            _ => return None,
        }
        let mut raw = [0u8; 8];
        raw.copy_from_slice(base);
        Some(u64::from_be_bytes(raw))
    }
}

struct ResidentPage {
    page: BitmapPage,
    on_disk: bool,
    dirty: bool,
}

/// Bitmap pages loaded lazily from a durable table and written back on
/// [`BitmapStore::flush`].
///
/// Pages are resident only between a first touch and the next flush or
/// discard.
pub struct BitmapStore {
    layout: BitmapLayout,
    pages: BTreeMap<u64, ResidentPage>,
}

impl BitmapStore {
    pub fn new(layout: BitmapLayout) -> Self {
        Self {
            layout,
            pages: BTreeMap::new(),
        }
    }

    pub fn layout(&self) -> &BitmapLayout {
        &self.layout
    }

    /// Number of pages currently held in memory.
    pub fn resident_pages(&self) -> usize {
        self.pages.len()
    }

    fn page_mut(
        &mut self,
        tx: &mut dyn Transaction,
        id: Identifier,
    ) -> LedgerResult<&mut ResidentPage> {
        let base = BitmapPage::base_for(id.as_u64(), self.layout.longs);
        if !self.pages.contains_key(&base) {
            let key = self.layout.page_key(base);
            let resident = match tx.get(&self.layout.table, &key)? {
                Some(bytes) => ResidentPage {
                    page: BitmapPage::from_bytes(base, &bytes, self.layout.longs)?,
                    on_disk: true,
                    dirty: false,
                },
                None => ResidentPage {
                    page: BitmapPage::for_identifier(id, self.layout.longs),
                    on_disk: false,
                    dirty: false,
                },
            };
            self.pages.insert(base, resident);
        }
        self.pages.get_mut(&base).ok_or_else(|| {
            LedgerError::Consistency(format!("page {base} vanished after load"))
        })
    }

    /// Set the bit for `id`, returning its previous value.
    pub fn get_and_set(&mut self, tx: &mut dyn Transaction, id: Identifier) -> LedgerResult<bool> {
        let resident = self.page_mut(tx, id)?;
        let previous = resident.page.set(id);
        resident.dirty |= !previous;
        Ok(previous)
    }

    /// Clear the bit for `id`, returning its previous value.
    pub fn get_and_clear(&mut self, tx: &mut dyn Transaction, id: Identifier) -> LedgerResult<bool> {
        let resident = self.page_mut(tx, id)?;
        let previous = resident.page.clear(id);
        resident.dirty |= previous;
        Ok(previous)
    }

    pub fn contains(&mut self, tx: &mut dyn Transaction, id: Identifier) -> LedgerResult<bool> {
        Ok(self.page_mut(tx, id)?.page.contains(id))
    }

    /// Write every changed page to the durable table and drop all resident
    /// pages. Returns the number of table writes issued.
    ///
    /// Non-empty pages are inserted on first appearance and updated after;
    /// pages that became empty are deleted.
    pub fn flush(&mut self, tx: &mut dyn Transaction) -> LedgerResult<usize> {
        let mut writes = 0;
        let table = self.layout.table.as_str();
        for (base, resident) in &self.pages {
            if !resident.dirty {
                continue;
            }
            let key = self.layout.page_key(*base);
            if resident.page.is_empty() {
                if resident.on_disk {
                    expect_success(tx.delete(table, &key)?, "delete", &key)?;
                    writes += 1;
                }
            } else if resident.on_disk {
                let status = tx.update(table, &key, &resident.page.to_bytes())?;
                expect_success(status, "update", &key)?;
                writes += 1;
            } else {
                let status = tx.insert(table, &key, &resident.page.to_bytes())?;
                expect_success(status, "insert", &key)?;
                writes += 1;
            }
        }
        trace!(table, pages = self.pages.len(), writes, "bitmap flushed");
        self.pages.clear();
        Ok(writes)
    }

    /// Drop all resident pages without writing them.
    pub fn discard(&mut self) {
        self.pages.clear();
    }
}

impl std::fmt::Debug for BitmapStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitmapStore")
            .field("layout", &self.layout)
            .field("resident_pages", &self.pages.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mos_store::{MemoryKvStore, TransactionProvider};

    fn id(raw: u64) -> Identifier {
        Identifier::new(raw)
    }

    fn set_all(store: &MemoryKvStore, bitmap: &mut BitmapStore, ids: &[u64]) {
        let mut tx = store.new_transaction().unwrap();
        for raw in ids {
            bitmap.get_and_set(tx.as_mut(), id(*raw)).unwrap();
        }
        bitmap.flush(tx.as_mut()).unwrap();
        tx.commit().unwrap();
    }

    // --- key layout ---

    #[test]
    fn keys_without_aux() {
        let layout = BitmapLayout::new("bits", 1);
        let key = layout.page_key(64);
        assert_eq!(key, 64u64.to_be_bytes().to_vec());
        assert_eq!(layout.decode_key(&key), Some(64));
        assert_eq!(layout.decode_key(&layout.clone().with_aux(1).page_key(64)), None);
    }

    #[test]
    fn keys_with_aux_do_not_collide() {
        let objects = BitmapLayout::new("bits", 1).with_aux(0);
        let maps = BitmapLayout::new("bits", 1).with_aux(1);
        let key = maps.page_key(128);
        assert_eq!(key.len(), 9);
        assert_eq!(maps.decode_key(&key), Some(128));
        assert_eq!(objects.decode_key(&key), None);
    }

    #[test]
    fn zero_longs_is_a_config_error() {
        assert!(matches!(
            BitmapLayout::new("bits", 0).validate(),
            Err(LedgerError::Config(_))
        ));
    }

    // --- set / clear / flush ---

    #[test]
    fn set_then_flush_inserts_page() {
        let store = MemoryKvStore::new();
        let mut bitmap = BitmapStore::new(BitmapLayout::new("bits", 8));
        set_all(&store, &mut bitmap, &[1, 2, 600]);
        assert_eq!(bitmap.resident_pages(), 0);
        assert_eq!(store.len("bits"), 2);

        let mut tx = store.new_transaction().unwrap();
        assert!(bitmap.contains(tx.as_mut(), id(600)).unwrap());
        assert!(!bitmap.contains(tx.as_mut(), id(601)).unwrap());
    }

    #[test]
    fn get_and_set_reports_previous_bit_across_flushes() {
        let store = MemoryKvStore::new();
        let mut bitmap = BitmapStore::new(BitmapLayout::new("bits", 1));
        set_all(&store, &mut bitmap, &[5]);

        let mut tx = store.new_transaction().unwrap();
        assert!(bitmap.get_and_set(tx.as_mut(), id(5)).unwrap());
        assert!(!bitmap.get_and_set(tx.as_mut(), id(6)).unwrap());
        assert!(bitmap.get_and_clear(tx.as_mut(), id(6)).unwrap());
        assert!(!bitmap.get_and_clear(tx.as_mut(), id(7)).unwrap());
    }

    #[test]
    fn existing_page_is_updated() {
        let store = MemoryKvStore::new();
        let mut bitmap = BitmapStore::new(BitmapLayout::new("bits", 1));
        set_all(&store, &mut bitmap, &[1]);
        set_all(&store, &mut bitmap, &[2]);
        assert_eq!(store.len("bits"), 1);

        let mut tx = store.new_transaction().unwrap();
        let bytes = tx.get("bits", &0u64.to_be_bytes()).unwrap().unwrap();
        assert_eq!(bytes, 0b110u64.to_be_bytes().to_vec());
    }

    #[test]
    fn emptied_page_is_deleted() {
        let store = MemoryKvStore::new();
        let mut bitmap = BitmapStore::new(BitmapLayout::new("bits", 1));
        set_all(&store, &mut bitmap, &[3]);

        let mut tx = store.new_transaction().unwrap();
        bitmap.get_and_clear(tx.as_mut(), id(3)).unwrap();
        assert_eq!(bitmap.flush(tx.as_mut()).unwrap(), 1);
        tx.commit().unwrap();
        assert!(store.is_empty("bits"));
    }

    #[test]
    fn page_set_and_cleared_before_first_flush_writes_nothing() {
        let store = MemoryKvStore::new();
        let mut bitmap = BitmapStore::new(BitmapLayout::new("bits", 1));
        let mut tx = store.new_transaction().unwrap();
        bitmap.get_and_set(tx.as_mut(), id(9)).unwrap();
        bitmap.get_and_clear(tx.as_mut(), id(9)).unwrap();
        assert_eq!(bitmap.flush(tx.as_mut()).unwrap(), 0);
        tx.commit().unwrap();
        assert_eq!(store.write_count("bits"), 0);
    }

    #[test]
    fn idempotent_flush_issues_no_writes() {
        let store = MemoryKvStore::new();
        let mut bitmap = BitmapStore::new(BitmapLayout::new("bits", 1));
        set_all(&store, &mut bitmap, &[1, 100, 1000]);
        let writes_before = store.write_count("bits");

        let mut tx = store.new_transaction().unwrap();
        assert_eq!(bitmap.flush(tx.as_mut()).unwrap(), 0);
        // Touching pages without changing bits is still a no-op.
        bitmap.get_and_set(tx.as_mut(), id(1)).unwrap();
        bitmap.get_and_clear(tx.as_mut(), id(2)).unwrap();
        assert_eq!(bitmap.flush(tx.as_mut()).unwrap(), 0);
        tx.commit().unwrap();
        assert_eq!(store.write_count("bits"), writes_before);
    }

    #[test]
    fn shared_table_with_aux_keys() {
        let store = MemoryKvStore::new();
        let mut objects = BitmapStore::new(BitmapLayout::new("bits", 1).with_aux(0));
        let mut maps = BitmapStore::new(BitmapLayout::new("bits", 1).with_aux(1));
        set_all(&store, &mut objects, &[1, 2]);
        set_all(&store, &mut maps, &[2]);
        assert_eq!(store.len("bits"), 2);

        let mut tx = store.new_transaction().unwrap();
        assert!(objects.contains(tx.as_mut(), id(1)).unwrap());
        assert!(!maps.contains(tx.as_mut(), id(1)).unwrap());
        assert!(maps.contains(tx.as_mut(), id(2)).unwrap());
    }

    #[test]
    fn failed_write_surfaces_as_error() {
        let store = MemoryKvStore::new();
        let mut bitmap = BitmapStore::new(BitmapLayout::new("bits", 1));
        let mut tx = store.new_transaction().unwrap();
        bitmap.get_and_set(tx.as_mut(), id(1)).unwrap();
        store.inject_fault("bits");
        assert!(matches!(
            bitmap.flush(tx.as_mut()),
            Err(LedgerError::Store(_))
        ));
    }
}
