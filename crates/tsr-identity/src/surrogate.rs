use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tsr_types::{ClassId, ObjectId, ObjectPayload};

use crate::object::ModelObject;

/// Serialized, not-yet-materialized form of a persistent object.
///
/// A surrogate is registered in the identity map first and fluffed on
/// demand. Once fluffed it keeps a reference to its live object so that
/// concurrent fluffers agree on one instance.
pub struct Surrogate {
    id: ObjectId,
    class: ClassId,
    payload: Vec<u8>,
    object: Mutex<Option<Arc<ModelObject>>>,
}

impl Surrogate {
    /// An inactive surrogate holding only the encoded payload.
    pub fn new(id: ObjectId, class: ClassId, payload: Vec<u8>) -> Self {
        Self {
            id,
            class,
            payload,
            object: Mutex::new(None),
        }
    }

    /// A surrogate that already carries its live object.
    pub fn activated(object: Arc<ModelObject>, payload: Vec<u8>) -> Self {
        Self {
            id: object.id().clone(),
            class: object.class_id(),
            payload,
            object: Mutex::new(Some(object)),
        }
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn class_id(&self) -> ClassId {
        self.class
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The live object, if this surrogate has been materialized.
    pub fn object(&self) -> Option<Arc<ModelObject>> {
        self.object
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn has_object(&self) -> bool {
        self.object
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Install a freshly materialized object unless another fluffer won the
    /// race; returns whichever object is installed afterwards.
    pub(crate) fn install(&self, object: Arc<ModelObject>) -> Arc<ModelObject> {
        let mut slot = self.object.lock().unwrap_or_else(PoisonError::into_inner);
        slot.get_or_insert(object).clone()
    }

    /// The payload form exchanged with the durable store and commit log.
    pub fn to_payload(&self) -> ObjectPayload {
        ObjectPayload::new(self.id.guid(), self.class, self.payload.clone())
    }
}

impl fmt::Debug for Surrogate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surrogate")
            .field("id", &self.id)
            .field("class", &self.class)
            .field("payload_len", &self.payload.len())
            .field("materialized", &self.has_object())
            .finish()
    }
}
