use std::sync::Arc;

use tracing::{debug, warn};
use tsr_commitlog::{ChangeBatch, CommitParticipant, ForeignChanges, Reconciliation};
use tsr_identity::{EntryState, FieldValue, IdentityError, IdentityMap, ModelObject};
use tsr_types::{Guid, ObjectPayload};
use tsr_uow::{
    ChangeNotifier, ChangeSet, FieldRegistry, UndoContext, UndoOutcome, UnitOfWorkService,
};

use crate::durable::DurableStore;
use crate::error::{StoreError, StoreResult};
use crate::reconcile::Reconciler;
use crate::status::CommitStatus;

/// In-process state of a store, as seen by the commit log.
pub(crate) struct SyncParticipant {
    pub(crate) map: IdentityMap,
    pub(crate) fields: FieldRegistry,
    pub(crate) notifier: Arc<dyn ChangeNotifier>,
    pub(crate) service: UnitOfWorkService,
    pub(crate) durable: Arc<dyn DurableStore>,
    pub(crate) reconciler: Arc<dyn Reconciler>,
    pub(crate) model_version: u32,
    /// Change set handed to the log by the running commit.
    pub(crate) in_flight: Option<ChangeSet>,
}

impl SyncParticipant {
    /// Put an unpublished change set back in front of newer edits.
    pub(crate) fn restore_in_flight(&mut self) {
        if let Some(changes) = self.in_flight.take() {
            self.service.restore_pending(changes);
        }
    }

    fn payload_for(&self, guid: Guid) -> StoreResult<Option<ObjectPayload>> {
        let payload = self.map.id_of(guid).and_then(|id| self.map.payload_of(&id));
        match payload {
            Ok(payload) => Ok(Some(payload)),
            Err(IdentityError::NotFound { .. }) => {
                warn!(guid = %guid.short_id(), "changed object vanished before publish");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn batch_from(&self, changes: &ChangeSet) -> StoreResult<ChangeBatch> {
        let mut batch = ChangeBatch::new();
        for guid in changes.created() {
            batch.added.extend(self.payload_for(*guid)?);
        }
        for guid in changes.modified() {
            batch.updated.extend(self.payload_for(*guid)?);
        }
        batch.deleted = changes.deleted().iter().copied().collect();
        Ok(batch)
    }

    /// Durable writes are skipped once the stored model version no longer
    /// matches the one this process was opened with.
    fn may_persist(&self) -> StoreResult<bool> {
        let on_disk = self.durable.model_version()?;
        if on_disk != self.model_version {
            warn!(on_disk, expected = self.model_version, "model version changed, skipping durable write");
            return Ok(false);
        }
        Ok(true)
    }

    fn persist_folded(&self, folded: &ForeignChanges) -> StoreResult<()> {
        let upserts: Vec<ObjectPayload> = folded
            .added
            .values()
            .chain(folded.updated.values())
            .cloned()
            .collect();
        let deleted: Vec<Guid> = folded.deleted.iter().copied().collect();
        self.durable
            .persist(folded.latest_generation, &upserts, &deleted)
    }

    fn persist_batch(&self, generation: i64, batch: &ChangeBatch) -> StoreResult<()> {
        let upserts: Vec<ObjectPayload> = batch
            .added
            .iter()
            .chain(batch.updated.iter())
            .cloned()
            .collect();
        self.durable.persist(generation, &upserts, &batch.deleted)
    }

    /// Commit pending changes straight to durable storage (no shared log).
    pub(crate) fn publish_exclusive(&mut self) -> StoreResult<CommitStatus> {
        let changes = self.service.take_pending();
        if changes.is_empty() {
            return Ok(CommitStatus::NothingToCommit {
                foreign_applied: false,
            });
        }
        let persisted = self.batch_from(&changes).and_then(|batch| {
            let generation = self.durable.generation()? + 1;
            self.persist_batch(generation, &batch)?;
            Ok(generation)
        });
        match persisted {
            Ok(generation) => Ok(CommitStatus::Committed {
                generation,
                foreign_applied: false,
            }),
            Err(e) => {
                self.service.restore_pending(changes);
                Err(e)
            }
        }
    }

    fn live(&self, guid: Guid) -> StoreResult<Option<Arc<ModelObject>>> {
        if self.map.entry_state(guid) == Some(EntryState::Live) {
            return Ok(Some(self.map.get(guid)?));
        }
        Ok(None)
    }

    /// Bring one added or updated object in line with its foreign payload.
    fn merge_payload(&mut self, payload: &ObjectPayload) -> StoreResult<()> {
        let Some(object) = self.live(payload.guid)? else {
            self.map.replace_surrogate(payload.clone())?;
            return Ok(());
        };

        let uow = self.service.current_mut()?;
        if object.class_id() != payload.class {
            uow.delete_object(&self.map, &object)?;
            self.map.replace_surrogate(payload.clone())?;
            return Ok(());
        }

        let mut incoming = self
            .map
            .classes()
            .construct(payload.class)
            .unwrap_or_default();
        incoming.extend(self.map.decode_fields(&payload.data)?);
        let current = object.fields();

        for (field, value) in &incoming {
            if current.get(field) != Some(value) {
                uow.set_field(&object, *field, value.clone())?;
            }
        }
        for field in current.keys().filter(|f| !incoming.contains_key(*f)) {
            uow.set_field(&object, *field, FieldValue::Null)?;
        }
        Ok(())
    }

    fn merge_delete(&mut self, guid: Guid) -> StoreResult<()> {
        if let Some(object) = self.live(guid)? {
            self.service.current_mut()?.delete_object(&self.map, &object)?;
        } else if let Ok(id) = self.map.id_of(guid) {
            self.map.unregister(&id)?;
        }
        Ok(())
    }

    fn merge_foreign(&mut self, foreign: &ForeignChanges) -> StoreResult<()> {
        for payload in foreign.added.values().chain(foreign.updated.values()) {
            self.merge_payload(payload)?;
        }
        for guid in &foreign.deleted {
            self.merge_delete(*guid)?;
        }
        Ok(())
    }
}

impl CommitParticipant for SyncParticipant {
    type Error = StoreError;

    fn reconcile(&mut self, foreign: &ForeignChanges) -> StoreResult<Reconciliation> {
        Ok(self.reconciler.reconcile(foreign, self.service.pending()))
    }

    fn apply_foreign(&mut self, foreign: &ForeignChanges, persist: bool) -> StoreResult<()> {
        self.service.begin_non_undoable()?;
        if let Err(e) = self.merge_foreign(foreign) {
            let ctx = UndoContext::new(&self.map, self.notifier.as_ref(), &self.fields);
            if let Err(rollback) = self.service.rollback(&ctx) {
                warn!(error = %rollback, "rollback of partial foreign merge failed");
            }
            return Err(e);
        }

        let ctx = UndoContext::new(&self.map, self.notifier.as_ref(), &self.fields);
        if self.service.commit_foreign(&ctx)? == UndoOutcome::RefreshRequired {
            warn!(generation = foreign.latest_generation, "observers need a full refresh after foreign changes");
        }

        if persist && self.may_persist()? {
            self.persist_folded(foreign)?;
        }
        debug!(
            generation = foreign.latest_generation,
            added = foreign.added.len(),
            updated = foreign.updated.len(),
            deleted = foreign.deleted.len(),
            persist,
            "merged foreign changes"
        );
        Ok(())
    }

    fn local_changes(&mut self) -> StoreResult<ChangeBatch> {
        let changes = self.service.take_pending();
        match self.batch_from(&changes) {
            Ok(batch) => {
                self.in_flight = Some(changes);
                Ok(batch)
            }
            Err(e) => {
                self.service.restore_pending(changes);
                Err(e)
            }
        }
    }

    fn persist_local(&mut self, generation: i64, batch: &ChangeBatch) -> StoreResult<()> {
        if self.may_persist()? {
            self.persist_batch(generation, batch)?;
        }
        Ok(())
    }

    fn durable_generation(&mut self) -> StoreResult<i64> {
        self.durable.generation()
    }

    fn persist_backlog(&mut self, backlog: &ForeignChanges) -> StoreResult<()> {
        if self.may_persist()? {
            self.persist_folded(backlog)?;
        }
        Ok(())
    }
}
