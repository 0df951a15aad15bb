//! Names of the durable tables and sequences used by the persistor.

/// Identifier (8 bytes BE) to encoded object state.
pub const OBJECTS: &str = "objects";
/// Root name (UTF-8) to identifier (8 bytes BE).
pub const ROOTS: &str = "roots";
/// Collection identifier (8 bytes BE) followed by the encoded entry key, to
/// the encoded entry value.
pub const COLLECTIONS: &str = "collections";
/// Identity log: sequence (8 bytes BE) plus op tag, to packed entries.
pub const OID_LOG: &str = "oid_log";
pub const OID_BITMAP_OBJECTS: &str = "oid_bitmap_objects";
pub const OID_BITMAP_MAPS: &str = "oid_bitmap_maps";
pub const OID_BITMAP_EVICTABLE: &str = "oid_bitmap_evictable";
/// Durable counters, keyed by sequence name.
pub const SEQUENCES: &str = "sequences";

pub const OID_LOG_SEQUENCE: &str = "oid_log_sequence";
pub const OBJECT_ID_SEQUENCE: &str = "object_id_sequence";
