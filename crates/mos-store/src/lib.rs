//! Transactional key-value substrate for the Managed Object Store.
//!
//! Everything above this crate talks to storage only through three traits:
//!
//! - [`TransactionProvider`] -- opens transactions
//! - [`Transaction`] -- `get`/`insert`/`update`/`put`/`delete` on named
//!   tables, ordered prefix cursors, `commit`/`abort`
//! - [`Cursor`] -- forward iteration in key order with delete-at-cursor
//!
//! Plus [`MutableSequence`], a durable monotonic counter handed out in
//! batches.
//!
//! # Backends
//!
//! - [`MemoryKvStore`] -- ordered in-memory tables with buffered
//!   transactional writes, snapshot files, and fault injection for tests
//!
//! # Rules
//!
//! 1. Writes become visible to other transactions only on `commit`.
//! 2. A transaction reads its own uncommitted writes.
//! 3. Status codes report expected outcomes (`NotFound`, `KeyExists`);
//!    `Err` reports faults and is always fatal to the enclosing transaction.

pub mod error;
pub mod memory;
pub mod sequence;
pub mod snapshot;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryKvStore;
pub use sequence::{KvSequence, MutableSequence};
pub use traits::{Cursor, Status, Transaction, TransactionProvider};
