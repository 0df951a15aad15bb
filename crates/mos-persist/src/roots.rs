use std::collections::{BTreeMap, BTreeSet};

use mos_store::Transaction;
use mos_types::Identifier;

use crate::error::{expect_success, PersistError, PersistResult};

/// Name to identifier table of the object graph's entry points.
#[derive(Clone, Debug)]
pub struct RootDirectory {
    table: String,
}

impl RootDirectory {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    /// Bind `name` to `id`, replacing any previous binding.
    pub fn add_root(&self, tx: &mut dyn Transaction, name: &str, id: Identifier) -> PersistResult<()> {
        if id.is_null() {
            return Err(PersistError::InvalidIdentifier(format!(
                "root {name} cannot be bound to the null identifier"
            )));
        }
        let status = tx.put(&self.table, name.as_bytes(), &id.to_be_bytes())?;
        expect_success(status, id, "put root")
    }

    /// The identifier bound to `name`, or [`Identifier::NULL`].
    pub fn load_root(&self, tx: &mut dyn Transaction, name: &str) -> PersistResult<Identifier> {
        match tx.get(&self.table, name.as_bytes())? {
            Some(bytes) => decode_id(name, &bytes),
            None => Ok(Identifier::NULL),
        }
    }

    pub fn load_root_names_to_ids(
        &self,
        tx: &mut dyn Transaction,
    ) -> PersistResult<BTreeMap<String, Identifier>> {
        let mut roots = BTreeMap::new();
        let mut cursor = tx.cursor(&self.table, &[])?;
        while let Some((key, value)) = cursor.next_entry()? {
            let name = String::from_utf8(key).map_err(|e| {
                PersistError::Codec(format!("root name is not UTF-8: {e}"))
            })?;
            let id = decode_id(&name, &value)?;
            roots.insert(name, id);
        }
        Ok(roots)
    }

    pub fn load_root_names(&self, tx: &mut dyn Transaction) -> PersistResult<BTreeSet<String>> {
        Ok(self.load_root_names_to_ids(tx)?.into_keys().collect())
    }

    pub fn load_roots(&self, tx: &mut dyn Transaction) -> PersistResult<BTreeSet<Identifier>> {
        Ok(self.load_root_names_to_ids(tx)?.into_values().collect())
    }
}

fn decode_id(name: &str, bytes: &[u8]) -> PersistResult<Identifier> {
    if bytes.len() != Identifier::BYTES {
        return Err(PersistError::Codec(format!(
            "root {name} holds {} bytes, expected {}",
            bytes.len(),
            Identifier::BYTES
        )));
    }
    Identifier::from_be_slice(bytes).map_err(|e| PersistError::Codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mos_store::{MemoryKvStore, TransactionProvider};

    #[test]
    fn add_and_load() {
        let store = MemoryKvStore::new();
        let roots = RootDirectory::new("roots");
        let mut tx = store.new_transaction().unwrap();
        roots.add_root(tx.as_mut(), "main", Identifier::new(5)).unwrap();
        roots.add_root(tx.as_mut(), "cache", Identifier::new(9)).unwrap();
        roots.add_root(tx.as_mut(), "main", Identifier::new(6)).unwrap();
        tx.commit().unwrap();

        let mut tx = store.new_transaction().unwrap();
        assert_eq!(roots.load_root(tx.as_mut(), "main").unwrap(), Identifier::new(6));
        assert_eq!(roots.load_root(tx.as_mut(), "missing").unwrap(), Identifier::NULL);
        assert_eq!(
            roots.load_root_names(tx.as_mut()).unwrap(),
            BTreeSet::from(["cache".to_string(), "main".to_string()])
        );
        assert_eq!(
            roots.load_roots(tx.as_mut()).unwrap(),
            BTreeSet::from([Identifier::new(6), Identifier::new(9)])
        );
        assert_eq!(roots.load_root_names_to_ids(tx.as_mut()).unwrap().len(), 2);
    }

    #[test]
    fn null_identifier_is_rejected() {
        let store = MemoryKvStore::new();
        let roots = RootDirectory::new("roots");
        let mut tx = store.new_transaction().unwrap();
        assert!(matches!(
            roots.add_root(tx.as_mut(), "main", Identifier::NULL),
            Err(PersistError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn malformed_value_is_a_codec_error() {
        let store = MemoryKvStore::new();
        let mut tx = store.new_transaction().unwrap();
        tx.put("roots", b"bad", &[1, 2, 3]).unwrap();
        let roots = RootDirectory::new("roots");
        assert!(matches!(
            roots.load_root(tx.as_mut(), "bad"),
            Err(PersistError::Codec(_))
        ));
    }
}
