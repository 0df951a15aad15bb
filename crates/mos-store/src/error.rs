/// Errors from key-value substrate operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The engine failed an operation on a table.
    #[error("storage fault on {op} in table {table}: {reason}")]
    Storage {
        table: String,
        op: &'static str,
        reason: String,
    },

    /// A fault armed through the engine's fault-injection hooks.
    #[error("injected fault on {op} in table {table}")]
    Injected { table: String, op: &'static str },

    /// A durable sequence was asked to move backwards.
    #[error("sequence {name} cannot move back from {current} to {requested}")]
    SequenceRegression {
        name: String,
        current: u64,
        requested: u64,
    },

    /// A snapshot file failed framing, checksum, or decoding checks.
    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying file system.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
