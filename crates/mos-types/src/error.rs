use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("unknown state kind tag: {0:#04x}")]
    UnknownStateKind(u8),

    #[error("unknown identity op tag: {0:#04x}")]
    UnknownOp(u8),
}
