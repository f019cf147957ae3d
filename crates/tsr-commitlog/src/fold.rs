use std::collections::{BTreeMap, BTreeSet};

use tsr_types::{Guid, ObjectPayload};

use crate::record::CommitRecord;

/// The net effect of a run of foreign commits, as seen by one reader.
///
/// An id appears in at most one of the three collections.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ForeignChanges {
    pub added: BTreeMap<Guid, ObjectPayload>,
    pub updated: BTreeMap<Guid, ObjectPayload>,
    pub deleted: BTreeSet<Guid>,
    /// Generation of the newest folded record, 0 if none.
    pub latest_generation: i64,
    /// Number of records folded.
    pub records: usize,
}

impl ForeignChanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `records` in log order.
    pub fn fold<'a>(records: impl IntoIterator<Item = &'a CommitRecord>) -> Self {
        let mut changes = Self::new();
        for record in records {
            changes.apply(record);
        }
        changes
    }

    /// Fold one more record on top of the current state.
    pub fn apply(&mut self, record: &CommitRecord) {
        for payload in &record.added {
            self.add(payload.clone());
        }
        for payload in &record.updated {
            self.update(payload.clone());
        }
        for guid in &record.deleted {
            self.delete(*guid);
        }
        self.latest_generation = self.latest_generation.max(record.generation);
        self.records += 1;
    }

    fn add(&mut self, payload: ObjectPayload) {
        // An id that was deleted and comes back is an update.
        if self.deleted.remove(&payload.guid) {
            self.updated.insert(payload.guid, payload);
        } else {
            self.updated.remove(&payload.guid);
            self.added.insert(payload.guid, payload);
        }
    }

    fn update(&mut self, payload: ObjectPayload) {
        if let Some(pending) = self.added.get_mut(&payload.guid) {
            *pending = payload;
            return;
        }
        self.deleted.remove(&payload.guid);
        self.updated.insert(payload.guid, payload);
    }

    fn delete(&mut self, guid: Guid) {
        self.updated.remove(&guid);
        if self.added.remove(&guid).is_none() {
            self.deleted.insert(guid);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.updated.len() + self.deleted.len()
    }

    /// Every id touched by the folded records.
    pub fn ids(&self) -> BTreeSet<Guid> {
        self.added
            .keys()
            .chain(self.updated.keys())
            .chain(self.deleted.iter())
            .copied()
            .collect()
    }
}
