use std::fmt;

use serde::Serialize;

/// Point-in-time counters of an [`ObjectStore`](crate::ObjectStore).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub live_objects: usize,
    pub map_objects: usize,
    pub evictable_objects: usize,
    /// Records written since the store was opened.
    pub saves: u64,
    pub pending_ledger_records: usize,
}

impl fmt::Display for StoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "live objects:       {}", self.live_objects)?;
        writeln!(f, "map-type objects:   {}", self.map_objects)?;
        writeln!(f, "evictable objects:  {}", self.evictable_objects)?;
        writeln!(f, "saves this session: {}", self.saves)?;
        write!(f, "pending ledger:     {}", self.pending_ledger_records)
    }
}
