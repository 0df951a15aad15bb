use std::collections::BTreeMap;

use mos_types::{ClassFlags, Identifier, StateKind, Value};
use serde::{Deserialize, Serialize};

use crate::delta::{DeltaMap, DeltaSet, PersistentCollection};

/// The state of one managed object, one variant per [`StateKind`].
///
/// Persistable collection variants keep their entries in a delta
/// collection stored row-by-row; those entries are not part of the encoded
/// state and are loaded separately.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ManagedObjectState {
    Physical {
        class_name: String,
        fields: BTreeMap<String, Value>,
    },
    Array {
        element_type: String,
        elements: Vec<Value>,
    },
    Literal(Value),
    List(Vec<Value>),
    Queue {
        capacity: Option<u32>,
        elements: Vec<Value>,
    },
    /// Milliseconds since the Unix epoch.
    Date(i64),
    Url(String),
    Map {
        class_name: String,
        #[serde(skip)]
        entries: DeltaMap<Value, Value>,
    },
    PartialMap {
        class_name: String,
        #[serde(skip)]
        entries: DeltaMap<Value, Value>,
    },
    Set {
        class_name: String,
        #[serde(skip)]
        elements: DeltaSet<Value>,
    },
    ServerMap {
        cache_name: String,
        max_tti_secs: u32,
        max_ttl_secs: u32,
        target_max_in_memory: u32,
        #[serde(skip)]
        entries: DeltaMap<Value, Value>,
    },
}

impl ManagedObjectState {
    /// An empty state of the given kind.
    pub fn empty(kind: StateKind) -> Self {
        match kind {
            StateKind::Physical => Self::Physical {
                class_name: String::new(),
                fields: BTreeMap::new(),
            },
            StateKind::Array => Self::Array {
                element_type: String::new(),
                elements: Vec::new(),
            },
            StateKind::Literal => Self::Literal(Value::Null),
            StateKind::List => Self::List(Vec::new()),
            StateKind::Queue => Self::Queue {
                capacity: None,
                elements: Vec::new(),
            },
            StateKind::Date => Self::Date(0),
            StateKind::Url => Self::Url(String::new()),
            StateKind::Map => Self::Map {
                class_name: String::new(),
                entries: DeltaMap::new(),
            },
            StateKind::PartialMap => Self::PartialMap {
                class_name: String::new(),
                entries: DeltaMap::new(),
            },
            StateKind::Set => Self::Set {
                class_name: String::new(),
                elements: DeltaSet::new(),
            },
            StateKind::ServerMap => Self::ServerMap {
                cache_name: String::new(),
                max_tti_secs: 0,
                max_ttl_secs: 0,
                target_max_in_memory: 0,
                entries: DeltaMap::new(),
            },
        }
    }

    pub fn kind(&self) -> StateKind {
        match self {
            Self::Physical { .. } => StateKind::Physical,
            Self::Array { .. } => StateKind::Array,
            Self::Literal(_) => StateKind::Literal,
            Self::List(_) => StateKind::List,
            Self::Queue { .. } => StateKind::Queue,
            Self::Date(_) => StateKind::Date,
            Self::Url(_) => StateKind::Url,
            Self::Map { .. } => StateKind::Map,
            Self::PartialMap { .. } => StateKind::PartialMap,
            Self::Set { .. } => StateKind::Set,
            Self::ServerMap { .. } => StateKind::ServerMap,
        }
    }

    pub fn class_flags(&self) -> ClassFlags {
        self.kind().class_flags()
    }

    /// The row-stored collection of a persistable collection variant.
    pub fn collection(&self) -> Option<&dyn PersistentCollection> {
        match self {
            Self::Map { entries, .. }
            | Self::PartialMap { entries, .. }
            | Self::ServerMap { entries, .. } => Some(entries as &dyn PersistentCollection),
            Self::Set { elements, .. } => Some(elements as &dyn PersistentCollection),
            _ => None,
        }
    }

    pub fn collection_mut(&mut self) -> Option<&mut dyn PersistentCollection> {
        match self {
            Self::Map { entries, .. }
            | Self::PartialMap { entries, .. }
            | Self::ServerMap { entries, .. } => Some(entries as &mut dyn PersistentCollection),
            Self::Set { elements, .. } => Some(elements as &mut dyn PersistentCollection),
            _ => None,
        }
    }

    /// Entries of a map-like variant.
    pub fn map_entries_mut(&mut self) -> Option<&mut DeltaMap<Value, Value>> {
        match self {
            Self::Map { entries, .. }
            | Self::PartialMap { entries, .. }
            | Self::ServerMap { entries, .. } => Some(entries),
            _ => None,
        }
    }

    pub fn map_entries(&self) -> Option<&DeltaMap<Value, Value>> {
        match self {
            Self::Map { entries, .. }
            | Self::PartialMap { entries, .. }
            | Self::ServerMap { entries, .. } => Some(entries),
            _ => None,
        }
    }

    pub fn set_elements_mut(&mut self) -> Option<&mut DeltaSet<Value>> {
        match self {
            Self::Set { elements, .. } => Some(elements),
            _ => None,
        }
    }

    pub fn set_elements(&self) -> Option<&DeltaSet<Value>> {
        match self {
            Self::Set { elements, .. } => Some(elements),
            _ => None,
        }
    }
}

/// A managed object as seen by the persistor.
///
/// `is_dirty` gates whether a save writes anything; `is_new` whether it
/// also records an identity event. `is_new_in_store` selects insert over
/// update.
#[derive(Clone, Debug, PartialEq)]
pub struct ManagedObjectRecord {
    id: Identifier,
    state: ManagedObjectState,
    is_new: bool,
    is_dirty: bool,
    is_new_in_store: bool,
}

impl ManagedObjectRecord {
    /// A record for an object created in memory and not yet saved.
    pub fn new(id: Identifier, state: ManagedObjectState) -> Self {
        Self {
            id,
            state,
            is_new: true,
            is_dirty: true,
            is_new_in_store: true,
        }
    }

    /// A record read back from the object table.
    pub(crate) fn loaded(id: Identifier, state: ManagedObjectState) -> Self {
        Self {
            id,
            state,
            is_new: false,
            is_dirty: false,
            is_new_in_store: false,
        }
    }

    pub fn id(&self) -> Identifier {
        self.id
    }

    pub fn state(&self) -> &ManagedObjectState {
        &self.state
    }

    /// Mutable access to the state; marks the record dirty.
    pub fn state_mut(&mut self) -> &mut ManagedObjectState {
        self.is_dirty = true;
        &mut self.state
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn is_new_in_store(&self) -> bool {
        self.is_new_in_store
    }

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    pub(crate) fn mark_saved(&mut self) {
        self.is_dirty = false;
        self.is_new = false;
        self.is_new_in_store = false;
    }

    pub(crate) fn state_and_id_mut(&mut self) -> (Identifier, &mut ManagedObjectState) {
        (self.id, &mut self.state)
    }
}
