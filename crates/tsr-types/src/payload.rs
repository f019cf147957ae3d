use serde::{Deserialize, Serialize};

use crate::guid::Guid;
use crate::meta::ClassId;

/// One serialized persistent object: its identity, class, and the encoded
/// field values produced by the payload codec.
///
/// This is the surrogate form exchanged with the durable store and carried
/// inside commit-log records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectPayload {
    pub guid: Guid,
    pub class: ClassId,
    pub data: Vec<u8>,
}

impl ObjectPayload {
    pub fn new(guid: Guid, class: ClassId, data: Vec<u8>) -> Self {
        Self { guid, class, data }
    }

    /// Encoded size of the field data in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
