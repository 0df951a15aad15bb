use std::path::Path;
use std::time::Duration;

use mos_ledger::{BitmapLayout, CompactorSchedule, LedgerLayout};
use serde::{Deserialize, Serialize};

use crate::error::{PersistError, PersistResult};
use crate::tables;

/// Tunables of the object persistor.
///
/// Every field has a default, so a TOML file only needs the keys it
/// overrides.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PersistorConfig {
    /// Ledger sequence numbers reserved per durable counter round-trip.
    pub sequence_batch_size: u64,
    /// Default per-cycle processing limit of the compactor.
    pub checkpoint_max_limit: usize,
    /// Maximum (and initial) compactor wait, in milliseconds.
    pub checkpoint_max_sleep_ms: u64,
    /// Wait floor in milliseconds; reaching it lifts the processing limit.
    pub checkpoint_min_sleep_ms: u64,
    /// Words per page of the all-objects bitmap.
    pub longs_per_disk_entry: usize,
    /// Words per page of the map-type and evictable bitmaps.
    pub longs_per_state_entry: usize,
    /// Identifiers deleted per object-table transaction.
    pub delete_batch_size: usize,
    /// Collection rows deleted per commit during bulk delete.
    pub collection_delete_batch_size: usize,
    /// Log bitmap reader progress at startup.
    pub measure_perf: bool,
}

impl Default for PersistorConfig {
    fn default() -> Self {
        Self {
            sequence_batch_size: 50_000,
            checkpoint_max_limit: 1_000,
            checkpoint_max_sleep_ms: 10_000,
            checkpoint_min_sleep_ms: 1_000,
            longs_per_disk_entry: 8,
            longs_per_state_entry: 1,
            delete_batch_size: 5_000,
            collection_delete_batch_size: 5_000,
            measure_perf: false,
        }
    }
}

impl PersistorConfig {
    pub fn from_toml_str(text: &str) -> PersistResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| PersistError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> PersistResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PersistError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> PersistResult<String> {
        toml::to_string_pretty(self).map_err(|e| PersistError::Config(e.to_string()))
    }

    pub fn validate(&self) -> PersistResult<()> {
        let positive = [
            ("sequence_batch_size", self.sequence_batch_size),
            ("checkpoint_max_limit", self.checkpoint_max_limit as u64),
            ("checkpoint_max_sleep_ms", self.checkpoint_max_sleep_ms),
            ("checkpoint_min_sleep_ms", self.checkpoint_min_sleep_ms),
            ("longs_per_disk_entry", self.longs_per_disk_entry as u64),
            ("longs_per_state_entry", self.longs_per_state_entry as u64),
            ("delete_batch_size", self.delete_batch_size as u64),
            ("collection_delete_batch_size", self.collection_delete_batch_size as u64),
        ];
        if let Some((key, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(PersistError::Config(format!("{key} must be positive")));
        }
        if self.checkpoint_min_sleep_ms > self.checkpoint_max_sleep_ms {
            return Err(PersistError::Config(format!(
                "checkpoint_min_sleep_ms ({}) exceeds checkpoint_max_sleep_ms ({})",
                self.checkpoint_min_sleep_ms, self.checkpoint_max_sleep_ms
            )));
        }
        Ok(())
    }

    pub fn ledger_layout(&self) -> LedgerLayout {
        LedgerLayout {
            log_table: tables::OID_LOG.into(),
            objects: BitmapLayout::new(tables::OID_BITMAP_OBJECTS, self.longs_per_disk_entry),
            maps: BitmapLayout::new(tables::OID_BITMAP_MAPS, self.longs_per_state_entry),
            evictable: BitmapLayout::new(tables::OID_BITMAP_EVICTABLE, self.longs_per_state_entry),
            sequence_batch_size: self.sequence_batch_size,
        }
    }

    pub fn compactor_schedule(&self) -> CompactorSchedule {
        CompactorSchedule {
            max_limit: self.checkpoint_max_limit,
            max_sleep: Duration::from_millis(self.checkpoint_max_sleep_ms),
            min_sleep: Duration::from_millis(self.checkpoint_min_sleep_ms),
        }
    }
}
