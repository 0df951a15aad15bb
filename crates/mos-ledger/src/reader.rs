use std::sync::Arc;
use std::time::Instant;

use mos_store::TransactionProvider;
use mos_types::Identifier;
use tracing::{debug, info};

use crate::bitmap::BitmapLayout;
use crate::error::LedgerResult;
use crate::page::BitmapPage;

const PROGRESS_INTERVAL: u64 = 1_000;

/// One-shot scan of a bitmap table, used at restart to rebuild the
/// in-memory identifier sets without going through the ledger.
pub struct BitmapReader {
    provider: Arc<dyn TransactionProvider>,
    layout: BitmapLayout,
    measure_perf: bool,
}

impl BitmapReader {
    pub fn new(provider: Arc<dyn TransactionProvider>, layout: BitmapLayout) -> Self {
        Self {
            provider,
            layout,
            measure_perf: false,
        }
    }

    /// Log progress every thousand identifiers.
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.measure_perf = enabled;
        self
    }

    /// Call `sink` with every identifier whose bit is set, in ascending
    /// order. Returns how many were found.
    pub fn scan(&self, mut sink: impl FnMut(Identifier)) -> LedgerResult<u64> {
        let started = Instant::now();
        let mut tx = self.provider.new_transaction()?;
        let mut found = 0u64;
        {
            let mut cursor = tx.cursor(&self.layout.table, &[])?;
            while let Some((key, value)) = cursor.next_entry()? {
                let Some(base) = self.layout.decode_key(&key) else {
                    continue;
                };
                let page = BitmapPage::from_bytes(base, &value, self.layout.longs)?;
                for id in page.identifiers() {
                    sink(id);
                    found += 1;
                    if self.measure_perf && found % PROGRESS_INTERVAL == 0 {
                        info!(
                            table = %self.layout.table,
                            found,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "bitmap reader progress"
                        );
                    }
                }
            }
        }
        tx.abort();
        debug!(
            table = %self.layout.table,
            found,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "bitmap table scanned"
        );
        Ok(found)
    }

    /// Collect every set identifier.
    pub fn read_all(&self) -> LedgerResult<Vec<Identifier>> {
        let mut ids = Vec::new();
        self.scan(|id| ids.push(id))?;
        Ok(ids)
    }
}
