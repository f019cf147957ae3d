use tsr_uow::UndoOutcome;

use crate::error::{StoreError, StoreResult};

/// What happened to a publish. Contention is a status, not an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitStatus {
    Committed {
        generation: i64,
        foreign_applied: bool,
    },
    /// Published to the shared log, but durable storage refused the
    /// write. It is retried on the next publish.
    Unflushed {
        generation: i64,
        foreign_applied: bool,
        error: String,
    },
    NothingToCommit {
        foreign_applied: bool,
    },
    /// Foreign commits conflict with local edits, which stay pending.
    Conflict { reason: String },
    /// The shared log is full; local edits stay pending.
    CapacityExceeded { needed: u64, available: u64 },
}

impl CommitStatus {
    /// Whether local changes left the pending set. True for
    /// [`CommitStatus::Unflushed`] as well.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::Committed { .. } | Self::Unflushed { .. } | Self::NothingToCommit { .. }
        )
    }

    pub fn generation(&self) -> Option<i64> {
        match self {
            Self::Committed { generation, .. } | Self::Unflushed { generation, .. } => {
                Some(*generation)
            }
            _ => None,
        }
    }

    /// Convert contention into an error for callers that cannot handle it.
    pub fn into_result(self) -> StoreResult<Option<i64>> {
        match self {
            Self::Committed { generation, .. } => Ok(Some(generation)),
            Self::Unflushed { error, .. } => Err(StoreError::Durable(error)),
            Self::NothingToCommit { .. } => Ok(None),
            Self::Conflict { reason } => Err(StoreError::ConflictDetected(reason)),
            Self::CapacityExceeded { needed, available } => {
                Err(StoreError::CapacityExceeded { needed, available })
            }
        }
    }
}

/// Result of an undo or redo, which is published like a commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UndoReport {
    pub outcome: UndoOutcome,
    pub status: CommitStatus,
}
