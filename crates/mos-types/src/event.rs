use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::flags::ClassFlags;
use crate::identifier::Identifier;

/// Direction of an identity event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentityOp {
    Add,
    Delete,
}

impl IdentityOp {
    /// Tag byte stored as the last byte of a ledger log key.
    pub const fn tag(self) -> u8 {
        match self {
            IdentityOp::Add => 0x00,
            IdentityOp::Delete => 0x01,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, TypeError> {
        match tag {
            0x00 => Ok(IdentityOp::Add),
            0x01 => Ok(IdentityOp::Delete),
            other => Err(TypeError::UnknownOp(other)),
        }
    }
}

/// One create/delete event for a single identifier.
///
/// `sequence` is the total order of the identity log; every identifier
/// packed into one log record shares its record's sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityEvent {
    pub sequence: u64,
    pub op: IdentityOp,
    pub identifier: Identifier,
    pub flags: ClassFlags,
}
