//! Identity ledger for the Managed Object Store (MOS).
//!
//! Tracks which identifiers in a 64-bit space currently exist:
//! - [`IdentityLedger`] -- append-only log of create/delete events, written
//!   in the caller's transaction
//! - [`BitmapPage`] / [`BitmapStore`] -- fixed-width presence bitmaps loaded
//!   lazily from a durable table and written back on flush
//! - [`Compactor`] -- background thread draining the log into three bitmap
//!   indexes on an adaptive schedule
//! - [`BitmapReader`] -- restart-time scan of one bitmap table
//!
//! Log keys are `sequence (u64 BE) ++ op tag`, so cursor order is event
//! order, and compaction applies records strictly in that order.

pub mod bitmap;
pub mod compactor;
pub mod error;
pub mod ledger;
pub mod page;
pub mod reader;

pub use bitmap::{BitmapLayout, BitmapStore};
pub use compactor::{Cadence, Compactor, CompactorSchedule};
pub use error::{LedgerError, LedgerResult};
pub use ledger::{IdentityLedger, LedgerLayout, StopFlag};
pub use page::BitmapPage;
pub use reader::BitmapReader;
