use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mos_store::{MutableSequence, Transaction, TransactionProvider};
use mos_types::{ClassFlags, Identifier, IdentityEvent, IdentityOp};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::bitmap::{BitmapLayout, BitmapStore};
use crate::error::{expect_success, LedgerError, LedgerResult};

/// Bytes per packed `(identifier, flags)` entry in a log record value.
const ENTRY_BYTES: usize = Identifier::BYTES + 1;
/// Log key: big-endian sequence followed by the op tag.
const LOG_KEY_BYTES: usize = 9;
/// Log records decoded per cursor during a compaction pass.
const COMPACTION_CHUNK: usize = 256;

/// Cooperative cancellation shared between a compaction pass and whoever
/// wants it to stop.
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Tables and widths used by an [`IdentityLedger`].
#[derive(Clone, Debug)]
pub struct LedgerLayout {
    pub log_table: String,
    pub objects: BitmapLayout,
    pub maps: BitmapLayout,
    pub evictable: BitmapLayout,
    /// Sequence numbers reserved per durable counter round-trip.
    pub sequence_batch_size: u64,
}

impl LedgerLayout {
    pub fn validate(&self) -> LedgerResult<()> {
        if self.sequence_batch_size == 0 {
            return Err(LedgerError::Config(
                "sequence batch size must be positive".into(),
            ));
        }
        if self.log_table.is_empty() {
            return Err(LedgerError::Config("log table name is empty".into()));
        }
        self.objects.validate()?;
        self.maps.validate()?;
        self.evictable.validate()?;
        Ok(())
    }
}

struct SequenceBatch {
    next: u64,
    end: u64,
}

struct Bitmaps {
    objects: BitmapStore,
    maps: BitmapStore,
    evictable: BitmapStore,
}

impl Bitmaps {
    fn apply(
        &mut self,
        tx: &mut dyn Transaction,
        op: IdentityOp,
        id: Identifier,
        flags: ClassFlags,
    ) -> LedgerResult<()> {
        match op {
            IdentityOp::Add => {
                self.objects.get_and_set(tx, id)?;
                if flags.is_persistable_collection() {
                    self.maps.get_and_set(tx, id)?;
                }
                if flags.is_evictable() {
                    self.evictable.get_and_set(tx, id)?;
                }
            }
            IdentityOp::Delete => {
                self.objects.get_and_clear(tx, id)?;
                if flags.is_persistable_collection() {
                    self.maps.get_and_clear(tx, id)?;
                }
                if flags.is_evictable() {
                    self.evictable.get_and_clear(tx, id)?;
                }
            }
        }
        Ok(())
    }

    fn flush(&mut self, tx: &mut dyn Transaction) -> LedgerResult<usize> {
        Ok(self.objects.flush(tx)? + self.maps.flush(tx)? + self.evictable.flush(tx)?)
    }

    fn discard(&mut self) {
        self.objects.discard();
        self.maps.discard();
        self.evictable.discard();
    }
}

/// A decoded log record: one op applied to many identifiers.
struct LogRecord {
    key: Vec<u8>,
    sequence: u64,
    op: IdentityOp,
    entries: Vec<(Identifier, ClassFlags)>,
}

impl LogRecord {
    fn decode(key: Vec<u8>, value: &[u8]) -> LedgerResult<Self> {
        let corrupt = |key: &[u8]| LedgerError::CorruptLogRecord {
            key: hex::encode(key),
            len: value.len(),
        };
        if key.len() != LOG_KEY_BYTES || value.len() % ENTRY_BYTES != 0 {
            return Err(corrupt(&key));
        }
        let op = IdentityOp::from_tag(key[8]).map_err(|_| corrupt(&key))?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&key[..8]);
        let sequence = u64::from_be_bytes(raw);
        let entries = value
            .chunks_exact(ENTRY_BYTES)
            .map(|chunk| {
                Identifier::from_be_slice(&chunk[..Identifier::BYTES])
                    .map(|id| (id, ClassFlags::from_bits(chunk[Identifier::BYTES])))
                    .map_err(|_| corrupt(&key))
            })
            .collect::<LedgerResult<Vec<_>>>()?;
        Ok(Self {
            key,
            sequence,
            op,
            entries,
        })
    }
}

fn log_key(sequence: u64, op: IdentityOp) -> [u8; LOG_KEY_BYTES] {
    let mut key = [0u8; LOG_KEY_BYTES];
    key[..8].copy_from_slice(&sequence.to_be_bytes());
    key[8] = op.tag();
    key
}

fn pack(entries: &[(Identifier, ClassFlags)]) -> Vec<u8> {
    let mut value = Vec::with_capacity(entries.len() * ENTRY_BYTES);
    for (id, flags) in entries {
        value.extend_from_slice(&id.to_be_bytes());
        value.push(flags.bits());
    }
    value
}

/// Append-only log of identifier create/delete events, drained by
/// compaction into three bitmap indexes: all objects, persistable
/// collections, and evictable maps.
///
/// Appends run inside the caller's transaction. Compaction runs in its own
/// transaction and is serialized internally, so it may be driven from a
/// background [`Compactor`](crate::Compactor) and from callers at once.
pub struct IdentityLedger {
    provider: Arc<dyn TransactionProvider>,
    sequence: Arc<dyn MutableSequence>,
    layout: LedgerLayout,
    batch: Mutex<SequenceBatch>,
    bitmaps: Mutex<Bitmaps>,
}

impl IdentityLedger {
    pub fn new(
        provider: Arc<dyn TransactionProvider>,
        sequence: Arc<dyn MutableSequence>,
        layout: LedgerLayout,
    ) -> LedgerResult<Self> {
        layout.validate()?;
        let bitmaps = Bitmaps {
            objects: BitmapStore::new(layout.objects.clone()),
            maps: BitmapStore::new(layout.maps.clone()),
            evictable: BitmapStore::new(layout.evictable.clone()),
        };
        Ok(Self {
            provider,
            sequence,
            layout,
            batch: Mutex::new(SequenceBatch { next: 0, end: 0 }),
            bitmaps: Mutex::new(bitmaps),
        })
    }

    pub fn layout(&self) -> &LedgerLayout {
        &self.layout
    }

    fn next_sequence(&self) -> LedgerResult<u64> {
        let mut batch = self.batch.lock();
        if batch.next == batch.end {
            let size = self.layout.sequence_batch_size;
            let start = self.sequence.next_batch(size)?;
            batch.next = start;
            batch.end = start + size;
            trace!(start, size, "ledger sequence batch reserved");
        }
        let sequence = batch.next;
        batch.next += 1;
        Ok(sequence)
    }

    fn append(
        &self,
        tx: &mut dyn Transaction,
        op: IdentityOp,
        entries: &[(Identifier, ClassFlags)],
    ) -> LedgerResult<u64> {
        let sequence = self.next_sequence()?;
        let key = log_key(sequence, op);
        let status = tx.insert(&self.layout.log_table, &key, &pack(entries))?;
        expect_success(status, "insert", &key)?;
        Ok(sequence)
    }

    /// Append one Add record for a single identifier.
    pub fn record_add(
        &self,
        tx: &mut dyn Transaction,
        id: Identifier,
        flags: ClassFlags,
    ) -> LedgerResult<u64> {
        self.append(tx, IdentityOp::Add, &[(id, flags)])
    }

    /// Append one Add record carrying every entry. Empty input appends
    /// nothing.
    pub fn record_add_batch(
        &self,
        tx: &mut dyn Transaction,
        entries: &[(Identifier, ClassFlags)],
    ) -> LedgerResult<Option<u64>> {
        if entries.is_empty() {
            return Ok(None);
        }
        self.append(tx, IdentityOp::Add, entries).map(Some)
    }

    /// Append one Delete record carrying every entry. Empty input appends
    /// nothing.
    pub fn record_delete_batch(
        &self,
        tx: &mut dyn Transaction,
        entries: &[(Identifier, ClassFlags)],
    ) -> LedgerResult<Option<u64>> {
        if entries.is_empty() {
            return Ok(None);
        }
        self.append(tx, IdentityOp::Delete, entries).map(Some)
    }

    /// Drain log records into the bitmaps, in sequence order.
    ///
    /// Applies whole records until at least `max_changes` identifiers have
    /// been applied (no limit for `None`), then flushes the bitmaps, deletes
    /// the applied records and commits. Returns `true` if the log is empty
    /// afterwards.
    ///
    /// `stop` is checked before every record; once it is raised the pass is
    /// abandoned without committing and `false` is returned.
    pub fn run_compaction(&self, stop: &StopFlag, max_changes: Option<usize>) -> LedgerResult<bool> {
        let mut bitmaps = self.bitmaps.lock();
        if stop.is_stopped() {
            return Ok(false);
        }
        let mut tx = self.provider.new_transaction()?;
        match self.compact_in(tx.as_mut(), &mut bitmaps, stop, max_changes) {
            Ok(Some((changes, drained))) => {
                if let Err(e) = tx.commit() {
                    bitmaps.discard();
                    return Err(e.into());
                }
                debug!(changes, drained, "checkpoint updated {changes} identifiers");
                Ok(drained)
            }
            Ok(None) => {
                bitmaps.discard();
                tx.abort();
                debug!("compaction pass stopped");
                Ok(false)
            }
            Err(e) => {
                bitmaps.discard();
                tx.abort();
                Err(e)
            }
        }
    }

    /// Returns `None` if `stop` was raised mid-pass.
    ///
    /// Records are read [`COMPACTION_CHUNK`] at a time. Each chunk's log keys
    /// are deleted inside `tx`, so the next cursor starts at the first record
    /// not yet applied.
    fn compact_in(
        &self,
        tx: &mut dyn Transaction,
        bitmaps: &mut Bitmaps,
        stop: &StopFlag,
        max_changes: Option<usize>,
    ) -> LedgerResult<Option<(usize, bool)>> {
        let mut changes = 0usize;
        loop {
            let chunk = self.read_chunk(tx)?;
            if chunk.is_empty() {
                break;
            }
            for record in &chunk {
                if stop.is_stopped() {
                    return Ok(None);
                }
                for (id, flags) in &record.entries {
                    bitmaps.apply(tx, record.op, *id, *flags)?;
                }
                changes += record.entries.len();
                expect_success(
                    tx.delete(&self.layout.log_table, &record.key)?,
                    "delete",
                    &record.key,
                )?;
                trace!(sequence = record.sequence, op = ?record.op, "log record applied");

                if max_changes.is_some_and(|max| changes >= max) {
                    let drained = tx
                        .cursor(&self.layout.log_table, &[])?
                        .next_entry()?
                        .is_none();
                    bitmaps.flush(tx)?;
                    return Ok(Some((changes, drained)));
                }
            }
        }
        bitmaps.flush(tx)?;
        Ok(Some((changes, true)))
    }

    fn read_chunk(&self, tx: &mut dyn Transaction) -> LedgerResult<Vec<LogRecord>> {
        let mut chunk = Vec::with_capacity(COMPACTION_CHUNK);
        let mut cursor = tx.cursor(&self.layout.log_table, &[])?;
        while chunk.len() < COMPACTION_CHUNK {
            match cursor.next_entry()? {
                Some((key, value)) => chunk.push(LogRecord::decode(key, &value)?),
                None => break,
            }
        }
        Ok(chunk)
    }

    /// Run unbounded passes until the log is empty. Used at restart before
    /// serving requests.
    pub fn compact_all(&self) -> LedgerResult<()> {
        let never = StopFlag::new();
        while !self.run_compaction(&never, None)? {}
        Ok(())
    }

    /// Number of records waiting for compaction.
    pub fn pending_records(&self) -> LedgerResult<usize> {
        let mut tx = self.provider.new_transaction()?;
        let mut count = 0;
        {
            let mut cursor = tx.cursor(&self.layout.log_table, &[])?;
            while cursor.next_entry()?.is_some() {
                count += 1;
            }
        }
        tx.abort();
        Ok(count)
    }

    /// Decode every pending record into events, in log order.
    pub fn pending_events(&self) -> LedgerResult<Vec<IdentityEvent>> {
        let mut tx = self.provider.new_transaction()?;
        let mut events = Vec::new();
        {
            let mut cursor = tx.cursor(&self.layout.log_table, &[])?;
            while let Some((key, value)) = cursor.next_entry()? {
                let record = LogRecord::decode(key, &value)?;
                events.extend(record.entries.iter().map(|(id, flags)| IdentityEvent {
                    sequence: record.sequence,
                    op: record.op,
                    identifier: *id,
                    flags: *flags,
                }));
            }
        }
        tx.abort();
        Ok(events)
    }
}

impl std::fmt::Debug for IdentityLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityLedger")
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}
