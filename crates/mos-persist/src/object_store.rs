use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mos_ledger::{BitmapLayout, BitmapReader, Compactor, IdentityLedger, LedgerLayout};
use mos_store::{KvSequence, MutableSequence, Status, Transaction, TransactionProvider};
use mos_types::{ClassFlags, Identifier};
use tracing::{debug, info, warn};

use crate::collections::CollectionsPersistor;
use crate::config::PersistorConfig;
use crate::context::PersistenceContext;
use crate::error::{expect_success, PersistError, PersistResult};
use crate::id_set::LiveIdSet;
use crate::roots::RootDirectory;
use crate::state::ManagedObjectRecord;
use crate::stats::StoreStats;
use crate::tables;

/// Largest number of live objects the identifier sets are sized for.
pub const LIVE_OBJECT_CAPACITY: u64 = i32::MAX as u64;
const CAPACITY_WARN_PERCENT: u64 = 80;
const CAPACITY_WARN_INTERVAL: u64 = 10_000;
const SAVE_LOG_INTERVAL: u64 = 100_000;
const SLOW_DELETE_BATCH: Duration = Duration::from_millis(300);

/// Durable store of managed object records.
///
/// Every create and delete is also appended to the [`IdentityLedger`], and
/// three in-memory identifier sets track live objects, persistable
/// collections ("map-type") and evictable maps. The sets are rebuilt from
/// the ledger's bitmaps when the store is opened.
pub struct ObjectStore {
    provider: Arc<dyn TransactionProvider>,
    context: PersistenceContext,
    config: PersistorConfig,
    ledger: Arc<IdentityLedger>,
    compactor: Compactor,
    collections: CollectionsPersistor,
    roots: RootDirectory,
    object_ids: KvSequence,
    live: LiveIdSet,
    maps: LiveIdSet,
    evictable: LiveIdSet,
    saves: AtomicU64,
    last_capacity_warning: AtomicU64,
}

impl ObjectStore {
    /// Open a store over `provider`: drain any ledger records left by a
    /// previous run, then rebuild the identifier sets.
    ///
    /// The background compactor is not running until [`ObjectStore::start`].
    pub fn open(
        provider: Arc<dyn TransactionProvider>,
        context: PersistenceContext,
        config: PersistorConfig,
    ) -> PersistResult<Self> {
        config.validate()?;
        let started = Instant::now();
        let layout = config.ledger_layout();
        let ledger_sequence = Arc::new(KvSequence::new(
            Arc::clone(&provider),
            tables::SEQUENCES,
            tables::OID_LOG_SEQUENCE,
            0,
        ));
        let ledger = Arc::new(IdentityLedger::new(
            Arc::clone(&provider),
            ledger_sequence,
            layout.clone(),
        )?);

        let leftover = ledger.pending_records()?;
        ledger.compact_all()?;
        let (live, maps, evictable) = load_identifier_sets(&provider, &layout, config.measure_perf)?;
        info!(
            live = live.len(),
            maps = maps.len(),
            evictable = evictable.len(),
            leftover_records = leftover,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "object store opened"
        );

        let compactor = Compactor::new(Arc::clone(&ledger), config.compactor_schedule())?;
        let object_ids = KvSequence::new(
            Arc::clone(&provider),
            tables::SEQUENCES,
            tables::OBJECT_ID_SEQUENCE,
            0,
        );
        Ok(Self {
            collections: CollectionsPersistor::new(
                tables::COLLECTIONS,
                config.collection_delete_batch_size,
            ),
            roots: RootDirectory::new(tables::ROOTS),
            provider,
            context,
            config,
            ledger,
            compactor,
            object_ids,
            live,
            maps,
            evictable,
            saves: AtomicU64::new(0),
            last_capacity_warning: AtomicU64::new(0),
        })
    }

    /// Start the background compactor.
    pub fn start(&self) -> PersistResult<()> {
        self.compactor.start()?;
        Ok(())
    }

    /// Stop and join the background compactor.
    pub fn shutdown(&self) {
        self.compactor.stop();
    }

    pub fn new_transaction(&self) -> PersistResult<Box<dyn Transaction>> {
        Ok(self.provider.new_transaction()?)
    }

    pub fn ledger(&self) -> &Arc<IdentityLedger> {
        &self.ledger
    }

    pub fn context(&self) -> &PersistenceContext {
        &self.context
    }

    pub fn config(&self) -> &PersistorConfig {
        &self.config
    }

    /// Drain the ledger into the bitmaps now.
    pub fn compact_all(&self) -> PersistResult<()> {
        self.ledger.compact_all()?;
        Ok(())
    }

    // ---- Identifier sets ----

    /// Register a newly created object. Returns `false`, changing nothing,
    /// if its identifier is already live.
    pub fn add_new(&self, record: &ManagedObjectRecord) -> bool {
        let id = record.id();
        if !self.live.insert(id) {
            return false;
        }
        let flags = self.context.classify(record.state());
        if flags.is_persistable_collection() {
            self.maps.insert(id);
        }
        if flags.is_evictable() {
            self.evictable.insert(id);
        }

        let count = self.live.len() as u64;
        let due = self
            .last_capacity_warning
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |last| {
                capacity_warning_due(count, last).then_some(count)
            })
            .is_ok();
        if due {
            warn!(
                count,
                capacity = LIVE_OBJECT_CAPACITY,
                "live object count above {CAPACITY_WARN_PERCENT}% of capacity"
            );
        }
        true
    }

    pub fn object_count(&self) -> usize {
        self.live.len()
    }

    pub fn contains_object(&self, id: Identifier) -> bool {
        self.live.contains(id)
    }

    /// Drop identifiers from the live set only. Returns how many were live.
    pub fn remove_all_object_ids(&self, ids: &[Identifier]) -> usize {
        self.live.remove_all(ids)
    }

    pub fn snapshot_all(&self) -> BTreeSet<Identifier> {
        self.live.snapshot()
    }

    pub fn snapshot_map_type(&self) -> BTreeSet<Identifier> {
        self.maps.snapshot()
    }

    /// Evictable identifiers that are also still live.
    pub fn snapshot_evictable(&self) -> BTreeSet<Identifier> {
        self.evictable.snapshot_within(&self.live)
    }

    // ---- Records ----

    /// Write `record` if it is dirty. A record that is also new gets an Add
    /// event in the ledger. Both flags are cleared on success.
    ///
    /// On error nothing about `record` changes, so once the caller aborts
    /// the save can be retried as is. Pending collection changes are only
    /// consumed after every write of the call has succeeded.
    pub fn save(&self, tx: &mut dyn Transaction, record: &mut ManagedObjectRecord) -> PersistResult<()> {
        if !record.is_dirty() {
            return Ok(());
        }
        let flags = self.write_record(tx, record)?;
        if record.is_new() {
            self.ledger.record_add(tx, record.id(), flags)?;
        }
        self.finish_record(record)
    }

    /// Save every dirty record in identifier order, then append one Add
    /// record covering those that were new to the store. Returns the number
    /// of records written.
    ///
    /// Records are only marked saved once the whole batch, ledger append
    /// included, has been written.
    pub fn save_all(
        &self,
        tx: &mut dyn Transaction,
        records: &mut [ManagedObjectRecord],
    ) -> PersistResult<usize> {
        records.sort_by_key(ManagedObjectRecord::id);
        let mut written = Vec::new();
        let mut added = Vec::new();
        for (index, record) in records.iter().enumerate() {
            if !record.is_dirty() {
                continue;
            }
            let flags = self.write_record(tx, record)?;
            if record.is_new_in_store() {
                added.push((record.id(), flags));
            }
            written.push(index);
        }
        self.ledger.record_add_batch(tx, &added)?;
        for index in &written {
            self.finish_record(&mut records[*index])?;
        }
        debug!(written = written.len(), added = added.len(), "records saved");
        Ok(written.len())
    }

    /// Write the object row and the collection rows of `record`, leaving the
    /// record itself untouched.
    fn write_record(
        &self,
        tx: &mut dyn Transaction,
        record: &ManagedObjectRecord,
    ) -> PersistResult<ClassFlags> {
        let id = record.id();
        let flags = self.context.classify(record.state());
        let bytes = self.context.encode(record.state())?;
        let key = id.to_be_bytes();
        let (op, status) = if record.is_new_in_store() {
            ("insert", tx.insert(tables::OBJECTS, &key, &bytes)?)
        } else {
            ("update", tx.update(tables::OBJECTS, &key, &bytes)?)
        };
        expect_success(status, id, op)?;
        self.collections.write_collection(tx, id, record.state())?;
        Ok(flags)
    }

    fn finish_record(&self, record: &mut ManagedObjectRecord) -> PersistResult<()> {
        let (id, state) = record.state_and_id_mut();
        self.collections.fold_collection(id, state)?;
        record.mark_saved();

        let saves = self.saves.fetch_add(1, Ordering::Relaxed) + 1;
        if saves == 1 || saves % SAVE_LOG_INTERVAL == 0 {
            debug!(saves, "managed objects saved");
        }
        Ok(())
    }

    /// Read a record, with its collection entries if it has any.
    pub fn load(&self, id: Identifier) -> PersistResult<Option<ManagedObjectRecord>> {
        let mut tx = self.provider.new_transaction()?;
        let Some(bytes) = tx.get(tables::OBJECTS, &id.to_be_bytes())? else {
            tx.abort();
            return Ok(None);
        };
        let mut state = self.context.decode(&bytes)?;
        self.collections.load_collection(tx.as_mut(), id, &mut state)?;
        tx.abort();
        Ok(Some(ManagedObjectRecord::loaded(id, state)))
    }

    /// Delete objects and their collection entries.
    ///
    /// Collection rows of map-type objects go first, in batches. Records are
    /// then deleted `delete_batch_size` at a time, one transaction and one
    /// Delete ledger record per batch. A batch's identifiers leave the
    /// identifier sets only after that batch commits, sub-indexes before
    /// the live set.
    pub fn delete_all(&self, ids: &BTreeSet<Identifier>) -> PersistResult<usize> {
        let ids: Vec<Identifier> = ids.iter().copied().collect();
        let map_ids: Vec<Identifier> = ids
            .iter()
            .copied()
            .filter(|id| self.maps.contains(*id))
            .collect();
        self.collections
            .delete_all_collections(Arc::clone(&self.provider), &map_ids)?;

        let mut deleted = 0;
        for chunk in ids.chunks(self.config.delete_batch_size) {
            let started = Instant::now();
            let mut tx = self.provider.new_transaction()?;
            if let Err(e) = self.delete_batch(tx.as_mut(), chunk) {
                tx.abort();
                return Err(e);
            }
            tx.commit()?;

            self.maps.remove_all(chunk);
            self.evictable.remove_all(chunk);
            self.live.remove_all(chunk);
            deleted += chunk.len();

            let elapsed = started.elapsed();
            if elapsed > SLOW_DELETE_BATCH {
                info!(
                    batch = chunk.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "slow object delete batch"
                );
            }
        }
        debug!(deleted, collections = map_ids.len(), "objects deleted");
        Ok(deleted)
    }

    fn delete_batch(&self, tx: &mut dyn Transaction, chunk: &[Identifier]) -> PersistResult<()> {
        let mut entries = Vec::with_capacity(chunk.len());
        for id in chunk {
            let status = tx.delete(tables::OBJECTS, &id.to_be_bytes())?;
            if status == Status::NotFound {
                debug!(%id, "deleted object had no record");
            } else {
                expect_success(status, *id, "delete")?;
            }
            let flags = ClassFlags::from_membership(self.maps.contains(*id), self.evictable.contains(*id));
            entries.push((*id, flags));
        }
        self.ledger.record_delete_batch(tx, &entries)?;
        Ok(())
    }

    // ---- Roots ----

    pub fn add_root(&self, tx: &mut dyn Transaction, name: &str, id: Identifier) -> PersistResult<()> {
        self.roots.add_root(tx, name, id)
    }

    /// The identifier bound to `name`, or [`Identifier::NULL`].
    pub fn load_root(&self, name: &str) -> PersistResult<Identifier> {
        self.read(|tx| self.roots.load_root(tx, name))
    }

    pub fn load_roots(&self) -> PersistResult<BTreeSet<Identifier>> {
        self.read(|tx| self.roots.load_roots(tx))
    }

    pub fn load_root_names(&self) -> PersistResult<BTreeSet<String>> {
        self.read(|tx| self.roots.load_root_names(tx))
    }

    pub fn load_root_names_to_ids(&self) -> PersistResult<BTreeMap<String, Identifier>> {
        self.read(|tx| self.roots.load_root_names_to_ids(tx))
    }

    fn read<T>(&self, f: impl FnOnce(&mut dyn Transaction) -> PersistResult<T>) -> PersistResult<T> {
        let mut tx = self.provider.new_transaction()?;
        let result = f(tx.as_mut());
        tx.abort();
        result
    }

    // ---- Object identifier allocation ----

    /// Reserve `size` identifiers and return the first.
    pub fn next_object_id_batch(&self, size: u64) -> PersistResult<Identifier> {
        Ok(Identifier::new(self.object_ids.next_batch(size)?))
    }

    pub fn current_object_id(&self) -> PersistResult<u64> {
        Ok(self.object_ids.current()?)
    }

    pub fn set_next_available_object_id(&self, next: u64) -> PersistResult<()> {
        Ok(self.object_ids.set_next(next)?)
    }

    pub fn stats(&self) -> PersistResult<StoreStats> {
        Ok(StoreStats {
            live_objects: self.live.len(),
            map_objects: self.maps.len(),
            evictable_objects: self.evictable.len(),
            saves: self.saves.load(Ordering::Relaxed),
            pending_ledger_records: self.ledger.pending_records()?,
        })
    }
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("live", &self.live.len())
            .field("maps", &self.maps.len())
            .field("evictable", &self.evictable.len())
            .field("compactor_running", &self.compactor.is_running())
            .finish_non_exhaustive()
    }
}

fn load_set(
    provider: &Arc<dyn TransactionProvider>,
    layout: &BitmapLayout,
    measure_perf: bool,
) -> PersistResult<LiveIdSet> {
    let set = LiveIdSet::new();
    BitmapReader::new(Arc::clone(provider), layout.clone())
        .with_progress(measure_perf)
        .scan(|id| {
            set.insert(id);
        })?;
    Ok(set)
}

fn join_loader(
    handle: thread::ScopedJoinHandle<'_, PersistResult<LiveIdSet>>,
) -> PersistResult<LiveIdSet> {
    handle
        .join()
        .map_err(|_| PersistError::Consistency("bitmap reader thread panicked".into()))?
}

/// Rebuild the live, map-type and evictable sets on three threads.
fn load_identifier_sets(
    provider: &Arc<dyn TransactionProvider>,
    layout: &LedgerLayout,
    measure_perf: bool,
) -> PersistResult<(LiveIdSet, LiveIdSet, LiveIdSet)> {
    thread::scope(|scope| -> PersistResult<(LiveIdSet, LiveIdSet, LiveIdSet)> {
        let live = scope.spawn(|| load_set(provider, &layout.objects, measure_perf));
        let maps = scope.spawn(|| load_set(provider, &layout.maps, measure_perf));
        let evictable = scope.spawn(|| load_set(provider, &layout.evictable, measure_perf));
        Ok((join_loader(live)?, join_loader(maps)?, join_loader(evictable)?))
    })
}

/// Whether a live count should be reported, given the count at the last
/// report. Counts are warned about at most once per interval.
fn capacity_warning_due(count: u64, last_warned: u64) -> bool {
    count > LIVE_OBJECT_CAPACITY / 100 * CAPACITY_WARN_PERCENT
        && count.saturating_sub(last_warned) >= CAPACITY_WARN_INTERVAL
}
