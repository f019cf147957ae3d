use std::collections::BTreeSet;

use tsr_types::Guid;

use crate::unit::UnitOfWork;

/// Net created/modified/deleted objects since the last publish.
///
/// Netting follows the commit-log fold: deleting a pending creation leaves
/// no trace, and re-creating a pending deletion counts as a modification.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    created: BTreeSet<Guid>,
    modified: BTreeSet<Guid>,
    deleted: BTreeSet<Guid>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> &BTreeSet<Guid> {
        &self.created
    }

    pub fn modified(&self) -> &BTreeSet<Guid> {
        &self.modified
    }

    pub fn deleted(&self) -> &BTreeSet<Guid> {
        &self.deleted
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.created.len() + self.modified.len() + self.deleted.len()
    }

    pub fn note_created(&mut self, guid: Guid) {
        if self.deleted.remove(&guid) {
            self.modified.insert(guid);
        } else {
            self.created.insert(guid);
        }
    }

    pub fn note_modified(&mut self, guid: Guid) {
        if !self.created.contains(&guid) && !self.deleted.contains(&guid) {
            self.modified.insert(guid);
        }
    }

    pub fn note_deleted(&mut self, guid: Guid) {
        self.modified.remove(&guid);
        if !self.created.remove(&guid) {
            self.deleted.insert(guid);
        }
    }

    /// Account for a committed (or redone) unit.
    pub fn absorb_commit(&mut self, uow: &UnitOfWork) {
        uow.net_created().into_iter().for_each(|g| self.note_created(g));
        uow.modified().iter().for_each(|g| self.note_modified(*g));
        uow.net_deleted().into_iter().for_each(|g| self.note_deleted(g));
    }

    /// Account for an undone unit: its creations become deletions and the
    /// other way round.
    pub fn absorb_undo(&mut self, uow: &UnitOfWork) {
        uow.net_deleted().into_iter().for_each(|g| self.note_created(g));
        uow.modified().iter().for_each(|g| self.note_modified(*g));
        uow.net_created().into_iter().for_each(|g| self.note_deleted(g));
    }

    /// Fold `other` in as if its changes happened after this set's.
    pub fn merge(&mut self, other: ChangeSet) {
        other.created.into_iter().for_each(|g| self.note_created(g));
        other.modified.into_iter().for_each(|g| self.note_modified(g));
        other.deleted.into_iter().for_each(|g| self.note_deleted(g));
    }

    pub fn clear(&mut self) {
        self.created.clear();
        self.modified.clear();
        self.deleted.clear();
    }
}
