use std::fmt;
use std::sync::Arc;

use tsr_identity::{FieldValue, IdentityMap, ModelObject};
use tsr_types::{ClassId, FieldId, Guid};

use crate::error::UowResult;
use crate::fields::{FieldRegistry, FieldSpec};
use crate::notify::{ChangeNotifier, PropChange};

/// Collaborators an action needs to reverse or replay itself.
pub struct UndoContext<'a> {
    pub map: &'a IdentityMap,
    pub notifier: &'a dyn ChangeNotifier,
    pub fields: &'a FieldRegistry,
}

impl<'a> UndoContext<'a> {
    pub fn new(
        map: &'a IdentityMap,
        notifier: &'a dyn ChangeNotifier,
        fields: &'a FieldRegistry,
    ) -> Self {
        Self {
            map,
            notifier,
            fields,
        }
    }
}

/// Routing tags that decide which undo/redo pass handles an action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActionCapabilities {
    /// Mutates persistent data (passes 1 and 2) rather than UI state (pass 4).
    pub is_data_change: bool,
    /// Undone in pass 1, ahead of every other data change.
    pub first_pass_undo: bool,
    /// Redone in pass 1, ahead of every other data change.
    pub first_pass_redo: bool,
}

impl ActionCapabilities {
    const DATA: Self = Self {
        is_data_change: true,
        first_pass_undo: false,
        first_pass_redo: false,
    };
}

/// Compound key that collapses repeated edits of one property.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyKey {
    pub object: Guid,
    pub field: FieldId,
    pub alternative: Option<u32>,
}

/// Net change of one property within a unit of work.
#[derive(Clone, Debug)]
pub struct PropertyChange {
    pub object: Arc<ModelObject>,
    pub key: PropertyKey,
    pub before: FieldValue,
    pub after: FieldValue,
}

impl PropertyChange {
    fn apply(&self, value: &FieldValue) {
        match self.key.alternative {
            Some(alt) => {
                let text = match value {
                    FieldValue::Text(s) => Some(s.clone()),
                    _ => None,
                };
                self.object.set_alternative(self.key.field, alt, text);
            }
            None => {
                self.object.set_field(self.key.field, value.clone());
            }
        }
    }

    /// Notification for this change; `reversed` swaps the counts.
    pub fn notification(&self, reversed: bool) -> PropChange {
        let (inserted, deleted) = if reversed {
            (self.before.count(), self.after.count())
        } else {
            (self.after.count(), self.before.count())
        };
        PropChange {
            object: self.key.object,
            field: self.key.field,
            alternative: self.key.alternative,
            inserted,
            deleted,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.before == self.after
    }
}

/// An action outside the object model, such as a selection change.
///
/// The action has already been performed when it is recorded.
pub trait ExternalAction: fmt::Debug + Send + Sync {
    /// Whether this action touches persistent data. Non-data actions run in
    /// the last pass, after the data is consistent again.
    fn is_data_change(&self) -> bool {
        false
    }

    fn undo(&mut self) -> UowResult<()>;

    fn redo(&mut self) -> UowResult<()>;

    fn is_redoable(&self) -> bool {
        true
    }
}

/// One reversible step of a unit of work.
#[derive(Debug)]
pub enum Action {
    Create(Arc<ModelObject>),
    Delete(Arc<ModelObject>),
    Property(PropertyChange),
    FieldDefinition {
        class: ClassId,
        field: FieldId,
        before: Option<FieldSpec>,
        after: Option<FieldSpec>,
    },
    External(Box<dyn ExternalAction>),
}

impl Action {
    pub fn capabilities(&self) -> ActionCapabilities {
        match self {
            // Deleted objects come back before anything else is reversed.
            Self::Delete(_) => ActionCapabilities {
                first_pass_undo: true,
                ..ActionCapabilities::DATA
            },
            Self::Create(_) => ActionCapabilities {
                first_pass_redo: true,
                ..ActionCapabilities::DATA
            },
            Self::Property(_) | Self::FieldDefinition { .. } => ActionCapabilities::DATA,
            Self::External(action) => ActionCapabilities {
                is_data_change: action.is_data_change(),
                ..ActionCapabilities::DATA
            },
        }
    }

    /// Guid of the object this action targets, if any.
    pub fn object(&self) -> Option<Guid> {
        match self {
            Self::Create(obj) | Self::Delete(obj) => Some(obj.guid()),
            Self::Property(change) => Some(change.key.object),
            Self::FieldDefinition { .. } | Self::External(_) => None,
        }
    }

    pub fn is_redoable(&self) -> bool {
        match self {
            Self::External(action) => action.is_redoable(),
            _ => true,
        }
    }

    pub(crate) fn undo(&mut self, ctx: &UndoContext<'_>) -> UowResult<()> {
        match self {
            Self::Create(obj) => {
                ctx.map.unregister(obj.id())?;
            }
            Self::Delete(obj) => ctx.map.reregister(obj)?,
            Self::Property(change) => change.apply(&change.before),
            Self::FieldDefinition {
                class,
                field,
                before,
                ..
            } => {
                ctx.fields.set(*class, *field, before.clone());
            }
            Self::External(action) => action.undo()?,
        }
        Ok(())
    }

    pub(crate) fn redo(&mut self, ctx: &UndoContext<'_>) -> UowResult<()> {
        match self {
            Self::Create(obj) => ctx.map.reregister(obj)?,
            Self::Delete(obj) => {
                ctx.map.unregister(obj.id())?;
            }
            Self::Property(change) => change.apply(&change.after),
            Self::FieldDefinition {
                class,
                field,
                after,
                ..
            } => {
                ctx.fields.set(*class, *field, after.clone());
            }
            Self::External(action) => action.redo()?,
        }
        Ok(())
    }
}
