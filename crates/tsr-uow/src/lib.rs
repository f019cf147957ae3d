//! Units of work for the Tessera object store.
//!
//! A [`UnitOfWork`] groups related edits so they can be committed, rolled
//! back, undone, redone, or folded into another unit. Undo and redo run as
//! four ordered passes:
//!
//! 1. re-create objects the unit deleted (undo) or created (redo)
//! 2. reverse or replay every other data change
//! 3. notify observers through a [`ChangeNotifier`]; a failure here only
//!    downgrades the result to [`UndoOutcome::RefreshRequired`]
//! 4. reverse or replay non-data actions such as selection changes
//!
//! Data passes run in reverse action order for undo and in forward order
//! for redo. Both are refused with
//! [`UowError::ReferentialIntegrity`] when they would leave a dangling
//! reference, and nothing changes in that case.
//!
//! [`UnitOfWorkService`] owns the open unit, the [`UndoStack`], and the
//! [`ChangeSet`] pending publication to the commit log.

pub mod action;
pub mod changes;
pub mod error;
pub mod fields;
pub mod notify;
pub mod sequence;
pub mod service;
pub mod stack;
pub mod unit;

pub use action::{
    Action, ActionCapabilities, ExternalAction, PropertyChange, PropertyKey, UndoContext,
};
pub use changes::ChangeSet;
pub use error::{UowError, UowResult};
pub use fields::{FieldKind, FieldRegistry, FieldSpec};
pub use notify::{ChangeNotifier, NotifyError, NullNotifier, PropChange};
pub use sequence::SequenceService;
pub use service::UnitOfWorkService;
pub use stack::{UndoStack, DEFAULT_UNDO_DEPTH};
pub use unit::{UndoOutcome, UnitOfWork, UowKind, UowState};
