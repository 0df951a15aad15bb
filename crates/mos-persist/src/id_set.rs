use std::collections::BTreeSet;

use mos_types::Identifier;
use parking_lot::RwLock;

/// A thread-safe ordered set of identifiers.
#[derive(Debug, Default)]
pub struct LiveIdSet {
    inner: RwLock<BTreeSet<Identifier>>,
}

impl LiveIdSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `id` was not already present.
    pub fn insert(&self, id: Identifier) -> bool {
        self.inner.write().insert(id)
    }

    /// Returns `true` if `id` was present.
    pub fn remove(&self, id: Identifier) -> bool {
        self.inner.write().remove(&id)
    }

    pub fn contains(&self, id: Identifier) -> bool {
        self.inner.read().contains(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Insert every identifier; returns how many were new.
    pub fn extend(&self, ids: impl IntoIterator<Item = Identifier>) -> usize {
        let mut inner = self.inner.write();
        ids.into_iter().filter(|id| inner.insert(*id)).count()
    }

    /// Remove every identifier; returns how many were present.
    pub fn remove_all<'a>(&self, ids: impl IntoIterator<Item = &'a Identifier>) -> usize {
        let mut inner = self.inner.write();
        ids.into_iter().filter(|id| inner.remove(*id)).count()
    }

    /// Point-in-time copy.
    pub fn snapshot(&self) -> BTreeSet<Identifier> {
        self.inner.read().clone()
    }

    /// Point-in-time copy of the identifiers also present in `other`.
    pub fn snapshot_within(&self, other: &LiveIdSet) -> BTreeSet<Identifier> {
        let mine = self.snapshot();
        let theirs = other.inner.read();
        mine.into_iter().filter(|id| theirs.contains(id)).collect()
    }
}

impl FromIterator<Identifier> for LiveIdSet {
    fn from_iter<I: IntoIterator<Item = Identifier>>(iter: I) -> Self {
        Self {
            inner: RwLock::new(iter.into_iter().collect()),
        }
    }
}
