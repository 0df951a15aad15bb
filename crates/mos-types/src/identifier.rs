use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Handle naming one managed object.
///
/// Identifiers are drawn from a 64-bit space and are never reused while the
/// object they name is live. The all-ones value is reserved as
/// [`Identifier::NULL`] ("no object").
///
/// The durable encoding is 8 bytes big-endian, so byte order of encoded keys
/// matches numeric order of identifiers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identifier(u64);

impl Identifier {
    /// Encoded width in bytes.
    pub const BYTES: usize = 8;

    /// The reserved "no object" identifier.
    pub const NULL: Identifier = Identifier(u64::MAX);

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns `true` if this is the reserved null identifier.
    pub const fn is_null(&self) -> bool {
        self.0 == u64::MAX
    }

    /// Big-endian encoding used for every durable key.
    pub fn to_be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Decode the first 8 bytes of `bytes` as a big-endian identifier.
    pub fn from_be_slice(bytes: &[u8]) -> Result<Self, TypeError> {
        let arr: [u8; 8] = bytes
            .get(..Self::BYTES)
            .and_then(|b| b.try_into().ok())
            .ok_or(TypeError::InvalidLength {
                expected: Self::BYTES,
                actual: bytes.len(),
            })?;
        Ok(Self(u64::from_be_bytes(arr)))
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Identifier(NULL)")
        } else {
            write!(f, "Identifier({})", self.0)
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "NULL")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<u64> for Identifier {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<Identifier> for u64 {
    fn from(id: Identifier) -> Self {
        id.0
    }
}
