use crate::error::{PersistError, PersistResult};
use crate::state::ManagedObjectState;

/// Turns object state into the bytes stored in the object table and back.
///
/// Collection entries of persistable collection states are not part of the
/// encoded form.
pub trait StateCodec: Send + Sync {
    fn encode(&self, state: &ManagedObjectState) -> PersistResult<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> PersistResult<ManagedObjectState>;
}

/// [`StateCodec`] using bincode.
#[derive(Clone, Copy, Debug, Default)]
pub struct BincodeCodec;

impl StateCodec for BincodeCodec {
    fn encode(&self, state: &ManagedObjectState) -> PersistResult<Vec<u8>> {
        bincode::serialize(state).map_err(|e| PersistError::Codec(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> PersistResult<ManagedObjectState> {
        bincode::deserialize(bytes).map_err(|e| PersistError::Codec(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mos_types::{StateKind, Value};
    use std::collections::BTreeMap;

    #[test]
    fn physical_state_round_trips() {
        let state = ManagedObjectState::Physical {
            class_name: "com.example.Order".into(),
            fields: BTreeMap::from([
                ("id".to_string(), Value::Int(42)),
                ("customer".to_string(), Value::Ref(mos_types::Identifier::new(7))),
            ]),
        };
        let bytes = BincodeCodec.encode(&state).unwrap();
        assert_eq!(BincodeCodec.decode(&bytes).unwrap(), state);
    }

    #[test]
    fn every_kind_decodes_to_its_kind() {
        for kind in StateKind::ALL {
            let bytes = BincodeCodec.encode(&ManagedObjectState::empty(kind)).unwrap();
            assert_eq!(BincodeCodec.decode(&bytes).unwrap().kind(), kind);
        }
    }

    #[test]
    fn garbage_is_a_codec_error() {
        assert!(matches!(
            BincodeCodec.decode(&[0xff, 0xff, 0xff, 0xff, 0xff]),
            Err(PersistError::Codec(_))
        ));
    }
}
