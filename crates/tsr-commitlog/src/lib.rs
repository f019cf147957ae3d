//! Shared commit log for the Tessera object store.
//!
//! Several processes, each holding its own in-memory copy of a project,
//! publish their commits to two fixed-size shared segments and merge each
//! other's changes without a coordinator. The only coordination primitive
//! is one OS-level mutex per project.
//!
//! # Design Rules
//!
//! 1. Every read or write of a shared segment happens with the project
//!    mutex held, and the mutex is released on every exit path.
//! 2. A writer never sees its own records as foreign.
//! 3. A failed commit (conflict or capacity) appends nothing.
//! 4. Records are reclaimed only once every occupied slot has seen them.
//! 5. Only the flush owner writes to durable storage.

pub mod config;
pub mod error;
pub mod fold;
pub mod frame;
pub mod log;
pub mod metadata;
pub mod record;
pub mod ring;
pub mod segment;

// Re-export primary types at crate root for ergonomic imports.
pub use config::{LogConfig, DEFAULT_METADATA_SIZE, DEFAULT_RING_CAPACITY, SLOT_COUNT};
pub use error::{LogError, LogResult};
pub use fold::ForeignChanges;
pub use log::{CommitLog, CommitOutcome, CommitParticipant, LogSnapshot, Reconciliation};
pub use metadata::{LogMetadata, FREE_SLOT, NO_MASTER};
pub use record::{ChangeBatch, CommitRecord};
pub use ring::{NoRoom, RingEntry};
pub use segment::{DurableLock, ProjectMutex, ProjectMutexGuard, SharedSegment};
