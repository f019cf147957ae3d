//! Registry of custom field definitions.
//!
//! Changing a field's definition is a different kind of edit from changing
//! an object's value in that field; this registry is what definition-change
//! actions mutate and restore.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tsr_types::{ClassId, FieldId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Boolean,
    Integer,
    String,
    MultiString,
    Binary,
    Reference,
    ReferenceSequence,
}

/// Definition of one custom field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

#[derive(Debug, Default)]
pub struct FieldRegistry {
    defs: RwLock<BTreeMap<(ClassId, FieldId), FieldSpec>>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, class: ClassId, field: FieldId) -> Option<FieldSpec> {
        self.defs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(class, field))
            .cloned()
    }

    /// Define, redefine, or (with `None`) remove a field. Returns the
    /// previous definition.
    pub fn set(&self, class: ClassId, field: FieldId, spec: Option<FieldSpec>) -> Option<FieldSpec> {
        let mut defs = self.defs.write().unwrap_or_else(PoisonError::into_inner);
        match spec {
            Some(spec) => defs.insert((class, field), spec),
            None => defs.remove(&(class, field)),
        }
    }

    /// Custom fields defined on `class`, in field order.
    pub fn fields_of(&self, class: ClassId) -> Vec<(FieldId, FieldSpec)> {
        self.defs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|((c, _), _)| *c == class)
            .map(|((_, f), spec)| (*f, spec.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.defs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
