//! Managed object persistence for the Managed Object Store (MOS).
//!
//! [`ObjectStore`] is the entry point. It owns:
//! - the object table, one encoded [`ManagedObjectState`] per identifier
//! - row-stored collection entries ([`DeltaMap`] / [`DeltaSet`]) written
//!   incrementally by [`CollectionsPersistor`]
//! - the [`RootDirectory`] of named entry points
//! - three in-memory [`LiveIdSet`]s (all, map-type, evictable), rebuilt at
//!   open from the identity ledger's bitmaps
//!
//! Every create and delete is appended to the identity ledger in the same
//! transaction as the object write, so the sets survive a restart.

pub mod batch;
pub mod codec;
pub mod collections;
pub mod config;
pub mod context;
pub mod delta;
pub mod error;
pub mod id_set;
pub mod object_store;
pub mod roots;
pub mod state;
pub mod stats;
pub mod tables;

pub use batch::BatchedTransaction;
pub use codec::{BincodeCodec, StateCodec};
pub use collections::CollectionsPersistor;
pub use config::PersistorConfig;
pub use context::PersistenceContext;
pub use delta::{Delta, DeltaMap, DeltaSet, Pending, PersistentCollection};
pub use error::{PersistError, PersistResult};
pub use id_set::LiveIdSet;
pub use object_store::{ObjectStore, LIVE_OBJECT_CAPACITY};
pub use roots::RootDirectory;
pub use state::{ManagedObjectRecord, ManagedObjectState};
pub use stats::StoreStats;
