use tsr_identity::IdentityError;
use tsr_types::Guid;

use crate::unit::UowState;

/// Errors produced by unit-of-work operations.
#[derive(Debug, thiserror::Error)]
pub enum UowError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("unit of work {seq} is {state:?}; cannot {operation}")]
    InvalidState {
        seq: u64,
        state: UowState,
        operation: &'static str,
    },

    /// Undo or redo would leave `referrer` pointing at the missing `target`.
    #[error("object {referrer} would be left referencing missing object {target}")]
    ReferentialIntegrity { target: Guid, referrer: Guid },

    #[error("unit of work {0} contains an action that cannot be redone")]
    NotRedoable(u64),

    #[error("no unit of work is open")]
    NoOpenUnit,

    #[error("unit of work {0} is still open")]
    AlreadyOpen(u64),

    #[error("nothing to {0}")]
    EmptyStack(&'static str),

    #[error("external action failed: {0}")]
    External(String),
}

/// Result alias for unit-of-work operations.
pub type UowResult<T> = Result<T, UowError>;
