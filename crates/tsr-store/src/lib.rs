//! Tessera object store.
//!
//! Ties the identity map, units of work and the shared commit log into one
//! API for the application layer. This is the main entry point for
//! embedding Tessera.
//!
//! # Design Rules
//!
//! 1. Objects are edited only inside a unit of work.
//! 2. A commit first merges foreign commits, then publishes local ones.
//! 3. Conflicts and a full log are statuses; local edits stay pending.
//! 4. Foreign changes never enter the local undo history.

pub mod config;
pub mod durable;
pub mod error;
mod participant;
pub mod reconcile;
pub mod status;
pub mod store;

pub use config::StoreConfig;
pub use durable::{DurableStore, InMemoryDurableStore};
pub use error::{StoreError, StoreResult};
pub use reconcile::{AcceptAllReconciler, DisjointReconciler, Reconciler};
pub use status::{CommitStatus, UndoReport};
pub use store::{Store, StoreBuilder};

// Re-export key types
pub use tsr_identity::{ClassCatalog, ClassDef, ClassMetadata, FieldValue, ModelObject, ObjectKey};
pub use tsr_types::{ClassId, FieldId, Guid, ObjectId};
pub use tsr_uow::{ChangeNotifier, PropChange, UndoOutcome};
