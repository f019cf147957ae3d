use std::collections::BTreeMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use tsr_types::{ClassId, FieldId, Guid, ObjectId};

/// Field values of a live object, keyed by field.
pub type Fields = BTreeMap<FieldId, FieldValue>;

/// The closed set of values a persistent field can hold.
///
/// References are stored as canonical [`ObjectId`]s, never as owning
/// pointers, so cycles in the object graph cost nothing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum FieldValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    /// Text with one alternative per writing system (or other sub-key).
    MultiText(BTreeMap<u32, String>),
    Bytes(Vec<u8>),
    Ref(ObjectId),
    RefSeq(Vec<ObjectId>),
}

impl FieldValue {
    /// Object references held by this value.
    pub fn references(&self) -> &[ObjectId] {
        match self {
            Self::Ref(id) => std::slice::from_ref(id),
            Self::RefSeq(ids) => ids,
            _ => &[],
        }
    }

    /// Returns `true` if this value references `guid`.
    pub fn refers_to(&self, guid: Guid) -> bool {
        self.references().iter().any(|id| id.guid() == guid)
    }

    /// Cardinality used in change notifications: 0 for null, the element
    /// count for sequences, 1 otherwise.
    pub fn count(&self) -> usize {
        match self {
            Self::Null => 0,
            Self::RefSeq(ids) => ids.len(),
            Self::MultiText(alts) => alts.len(),
            _ => 1,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// A materialized ("live") persistent object.
///
/// Objects are shared as `Arc<ModelObject>`; field storage uses interior
/// mutability so that units of work can mutate and reverse values without
/// exclusive ownership of the object.
pub struct ModelObject {
    id: ObjectId,
    class: ClassId,
    fields: RwLock<Fields>,
}

impl ModelObject {
    pub fn new(id: ObjectId, class: ClassId, fields: Fields) -> Self {
        Self {
            id,
            class,
            fields: RwLock::new(fields),
        }
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn guid(&self) -> Guid {
        self.id.guid()
    }

    pub fn class_id(&self) -> ClassId {
        self.class
    }

    /// Current value of `field` ([`FieldValue::Null`] when unset).
    pub fn field(&self, field: FieldId) -> FieldValue {
        self.read().get(&field).cloned().unwrap_or_default()
    }

    /// Set `field` and return the previous value.
    pub fn set_field(&self, field: FieldId, value: FieldValue) -> FieldValue {
        let mut fields = self.write();
        if value.is_null() {
            fields.remove(&field).unwrap_or_default()
        } else {
            fields.insert(field, value).unwrap_or_default()
        }
    }

    /// One alternative of a multi-text field.
    pub fn alternative(&self, field: FieldId, alt: u32) -> Option<String> {
        match self.read().get(&field) {
            Some(FieldValue::MultiText(alts)) => alts.get(&alt).cloned(),
            _ => None,
        }
    }

    /// Set (or clear, with `None`) one alternative of a multi-text field and
    /// return the previous alternative. A field holding any other kind of
    /// value is replaced by a multi-text value.
    pub fn set_alternative(&self, field: FieldId, alt: u32, value: Option<String>) -> Option<String> {
        let mut fields = self.write();
        let slot = fields
            .entry(field)
            .or_insert_with(|| FieldValue::MultiText(BTreeMap::new()));
        if !matches!(slot, FieldValue::MultiText(_)) {
            *slot = FieldValue::MultiText(BTreeMap::new());
        }
        let FieldValue::MultiText(alts) = slot else {
            return None;
        };
        let previous = match value {
            Some(text) => alts.insert(alt, text),
            None => alts.remove(&alt),
        };
        if alts.is_empty() {
            fields.remove(&field);
        }
        previous
    }

    /// Snapshot of all field values.
    pub fn fields(&self) -> Fields {
        self.read().clone()
    }

    /// Replace every field value at once and return the old values.
    pub fn replace_fields(&self, fields: Fields) -> Fields {
        std::mem::replace(&mut *self.write(), fields)
    }

    /// Every object this object references, in field order.
    pub fn references(&self) -> Vec<ObjectId> {
        self.read()
            .values()
            .flat_map(|v| v.references().iter().cloned())
            .collect()
    }

    /// Returns `true` if any field references `guid`.
    pub fn refers_to(&self, guid: Guid) -> bool {
        self.read().values().any(|v| v.refers_to(guid))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Fields> {
        self.fields.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Fields> {
        self.fields.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ModelObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelObject")
            .field("id", &self.id)
            .field("class", &self.class)
            .field("field_count", &self.read().len())
            .finish()
    }
}
