use std::ops::BitOr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Type tag of a managed object's state.
///
/// The classifier methods are exhaustive matches: adding a variant does not
/// compile until it is classified.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StateKind {
    Physical,
    Array,
    Literal,
    List,
    Queue,
    Date,
    Url,
    Map,
    PartialMap,
    Set,
    /// Server-side distributed map whose entries are subject to eviction.
    ServerMap,
}

impl StateKind {
    /// Every kind, in tag order.
    pub const ALL: [StateKind; 11] = [
        StateKind::Physical,
        StateKind::Array,
        StateKind::Literal,
        StateKind::List,
        StateKind::Queue,
        StateKind::Date,
        StateKind::Url,
        StateKind::Map,
        StateKind::PartialMap,
        StateKind::Set,
        StateKind::ServerMap,
    ];

    /// Stable one-byte tag.
    pub const fn tag(self) -> u8 {
        match self {
            StateKind::Physical => 1,
            StateKind::Array => 2,
            StateKind::Literal => 3,
            StateKind::List => 4,
            StateKind::Queue => 5,
            StateKind::Date => 6,
            StateKind::Url => 7,
            StateKind::Map => 8,
            StateKind::PartialMap => 9,
            StateKind::Set => 10,
            StateKind::ServerMap => 11,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, TypeError> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.tag() == tag)
            .ok_or(TypeError::UnknownStateKind(tag))
    }

    /// Whether the state's entries live in the collections table rather than
    /// inside the object record.
    pub const fn is_persistable_collection(self) -> bool {
        match self {
            StateKind::Map | StateKind::PartialMap | StateKind::Set | StateKind::ServerMap => true,
            StateKind::Physical
            | StateKind::Array
            | StateKind::Literal
            | StateKind::List
            | StateKind::Queue
            | StateKind::Date
            | StateKind::Url => false,
        }
    }

    /// Whether the state is a map type subject to capacity/TTL eviction.
    pub const fn is_evictable_map(self) -> bool {
        match self {
            StateKind::ServerMap => true,
            StateKind::Physical
            | StateKind::Array
            | StateKind::Literal
            | StateKind::List
            | StateKind::Queue
            | StateKind::Date
            | StateKind::Url
            | StateKind::Map
            | StateKind::PartialMap
            | StateKind::Set => false,
        }
    }

    pub const fn class_flags(self) -> ClassFlags {
        ClassFlags::from_membership(self.is_persistable_collection(), self.is_evictable_map())
    }
}

/// One-byte classification of an identifier for the derived indices.
///
/// Bit `0x01` marks a persistable collection (the map-type index), bit `0x02`
/// marks an evictable map (the evictable index).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassFlags(u8);

impl ClassFlags {
    pub const NONE: ClassFlags = ClassFlags(0x00);
    pub const PERSISTABLE_COLLECTION: ClassFlags = ClassFlags(0x01);
    pub const EVICTABLE: ClassFlags = ClassFlags(0x02);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_membership(persistable_collection: bool, evictable: bool) -> Self {
        let mut bits = 0;
        if persistable_collection {
            bits |= Self::PERSISTABLE_COLLECTION.0;
        }
        if evictable {
            bits |= Self::EVICTABLE.0;
        }
        Self(bits)
    }

    pub const fn is_persistable_collection(self) -> bool {
        self.0 & Self::PERSISTABLE_COLLECTION.0 != 0
    }

    pub const fn is_evictable(self) -> bool {
        self.0 & Self::EVICTABLE.0 != 0
    }
}

impl BitOr for ClassFlags {
    type Output = ClassFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        ClassFlags(self.0 | rhs.0)
    }
}

impl From<StateKind> for ClassFlags {
    fn from(kind: StateKind) -> Self {
        kind.class_flags()
    }
}
