//! Foundation types for the Managed Object Store (MOS).
//!
//! This crate provides the identity and classification types shared by every
//! other MOS crate. It has no storage dependencies.
//!
//! # Key Types
//!
//! - [`Identifier`] -- 64-bit handle naming one managed object
//! - [`StateKind`] -- type tag of a managed object's state, with the pure
//!   classifier deciding collection and eviction membership
//! - [`ClassFlags`] -- the one-byte classification carried by identity events
//! - [`IdentityOp`] / [`IdentityEvent`] -- create/delete events of the ledger
//! - [`Value`] -- literal or reference value held by object state

pub mod error;
pub mod event;
pub mod flags;
pub mod identifier;
pub mod value;

pub use error::TypeError;
pub use event::{IdentityEvent, IdentityOp};
pub use flags::{ClassFlags, StateKind};
pub use identifier::Identifier;
pub use value::Value;
