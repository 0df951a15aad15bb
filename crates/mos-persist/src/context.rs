use std::sync::Arc;

use mos_types::{ClassFlags, StateKind};

use crate::codec::{BincodeCodec, StateCodec};
use crate::error::PersistResult;
use crate::state::ManagedObjectState;

/// Per-instance services for creating, classifying and encoding managed
/// object state. Built once and shared by every component of one store;
/// tests build their own.
#[derive(Clone)]
pub struct PersistenceContext {
    codec: Arc<dyn StateCodec>,
}

impl PersistenceContext {
    pub fn new(codec: Arc<dyn StateCodec>) -> Self {
        Self { codec }
    }

    pub fn new_state(&self, kind: StateKind) -> ManagedObjectState {
        ManagedObjectState::empty(kind)
    }

    pub fn classify(&self, state: &ManagedObjectState) -> ClassFlags {
        state.class_flags()
    }

    pub fn encode(&self, state: &ManagedObjectState) -> PersistResult<Vec<u8>> {
        self.codec.encode(state)
    }

    pub fn decode(&self, bytes: &[u8]) -> PersistResult<ManagedObjectState> {
        self.codec.decode(bytes)
    }
}

impl Default for PersistenceContext {
    fn default() -> Self {
        Self::new(Arc::new(BincodeCodec))
    }
}

impl std::fmt::Debug for PersistenceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceContext").finish_non_exhaustive()
    }
}
