use serde::{Deserialize, Serialize};
use tsr_types::{Guid, ObjectPayload};

use crate::error::LogResult;
use crate::frame;

/// One commit published to the ring.
///
/// Field order is part of the shared-memory format.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub generation: i64,
    /// Per-join identity of the writer that appended the record.
    pub source: Guid,
    pub added: Vec<ObjectPayload>,
    pub updated: Vec<ObjectPayload>,
    pub deleted: Vec<Guid>,
}

impl CommitRecord {
    pub fn encode(&self) -> LogResult<Vec<u8>> {
        frame::encode(self)
    }

    pub fn object_count(&self) -> usize {
        self.added.len() + self.updated.len() + self.deleted.len()
    }
}

/// A writer's local changes since its last publish.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeBatch {
    pub added: Vec<ObjectPayload>,
    pub updated: Vec<ObjectPayload>,
    pub deleted: Vec<Guid>,
}

impl ChangeBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.updated.len() + self.deleted.len()
    }

    pub fn to_record(&self, generation: i64, source: Guid) -> CommitRecord {
        CommitRecord {
            generation,
            source,
            added: self.added.clone(),
            updated: self.updated.clone(),
            deleted: self.deleted.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsr_types::ClassId;

    #[test]
    fn record_frames_and_decodes() {
        let guid = Guid::new();
        let mut batch = ChangeBatch::new();
        assert!(batch.is_empty());
        batch.added.push(ObjectPayload::new(guid, ClassId(3), vec![1, 2, 3]));
        batch.deleted.push(Guid::new());

        let record = batch.to_record(4, Guid::new());
        assert_eq!(record.object_count(), 2);

        let frame = record.encode().unwrap();
        let (decoded, used) = frame::decode::<CommitRecord>(&frame, 0).unwrap().unwrap();
        assert_eq!(decoded, record);
        assert_eq!(used, frame.len());
    }

    #[test]
    fn generation_leads_the_payload() {
        let record = ChangeBatch::new().to_record(0x0102, Guid::nil());
        let frame = record.encode().unwrap();
        assert_eq!(
            &frame[frame::HEADER_SIZE..frame::HEADER_SIZE + 8],
            &0x0102i64.to_le_bytes()
        );
    }
}
