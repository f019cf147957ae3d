use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid guid string {input:?}: {reason}")]
    InvalidGuid { input: String, reason: String },

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("handle must be non-zero")]
    ZeroHandle,
}
