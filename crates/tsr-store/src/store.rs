use std::sync::Arc;

use tracing::info;
use tsr_commitlog::{CommitLog, CommitOutcome};
use tsr_identity::{
    BincodeCodec, ClassCatalog, ClassMetadata, FieldValue, IdentityMap, ModelObject, ObjectKey,
    PayloadCodec,
};
use tsr_types::{ClassId, FieldId};
use tsr_uow::{
    ChangeNotifier, ChangeSet, ExternalAction, FieldRegistry, FieldSpec, NullNotifier,
    SequenceService, UndoContext, UnitOfWorkService, UowError,
};

use crate::config::StoreConfig;
use crate::durable::{DurableStore, InMemoryDurableStore};
use crate::error::{StoreError, StoreResult};
use crate::participant::SyncParticipant;
use crate::reconcile::{DisjointReconciler, Reconciler};
use crate::status::{CommitStatus, UndoReport};

/// Assembles a [`Store`] from its collaborators.
pub struct StoreBuilder {
    config: StoreConfig,
    classes: Option<Arc<dyn ClassMetadata>>,
    codec: Option<Arc<dyn PayloadCodec>>,
    durable: Option<Arc<dyn DurableStore>>,
    reconciler: Option<Arc<dyn Reconciler>>,
    notifier: Option<Arc<dyn ChangeNotifier>>,
}

impl StoreBuilder {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            classes: None,
            codec: None,
            durable: None,
            reconciler: None,
            notifier: None,
        }
    }

    pub fn classes(mut self, classes: Arc<dyn ClassMetadata>) -> Self {
        self.classes = Some(classes);
        self
    }

    pub fn codec(mut self, codec: Arc<dyn PayloadCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn durable(mut self, durable: Arc<dyn DurableStore>) -> Self {
        self.durable = Some(durable);
        self
    }

    pub fn reconciler(mut self, reconciler: Arc<dyn Reconciler>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn ChangeNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Check the durable model version, load every stored object as an
    /// inactive surrogate and, in shared mode, join the commit log.
    pub fn open(self) -> StoreResult<Store> {
        let config = self.config;
        let durable: Arc<dyn DurableStore> = match self.durable {
            Some(durable) => durable,
            None => Arc::new(InMemoryDurableStore::new(config.model_version)),
        };

        let on_disk = durable.model_version()?;
        let supported = config.model_version;
        // Migrating needs exclusive access to durable storage.
        if on_disk > supported || (on_disk < supported && !config.is_exclusive()) {
            return Err(StoreError::MigrationForbidden { on_disk, supported });
        }
        if on_disk < supported {
            durable.set_model_version(supported)?;
            info!(from = on_disk, to = supported, "upgraded durable model version");
        }

        let classes: Arc<dyn ClassMetadata> = match self.classes {
            Some(classes) => classes,
            None => Arc::new(ClassCatalog::new()),
        };
        let codec: Arc<dyn PayloadCodec> = match self.codec {
            Some(codec) => codec,
            None => Arc::new(BincodeCodec),
        };
        let map = IdentityMap::with_codec(classes, codec);

        let payloads = durable.load()?;
        let loaded = payloads.len();
        map.expect_additional_objects(loaded);
        for payload in payloads {
            map.register_payload(payload)?;
        }

        let generation = durable.generation()?;
        let log = config
            .log_config()
            .map(|log_config| CommitLog::join(log_config, generation))
            .transpose()?;

        info!(
            project = %config.project,
            objects = loaded,
            generation,
            shared = log.is_some(),
            "opened store"
        );

        let inner = SyncParticipant {
            map,
            fields: FieldRegistry::new(),
            notifier: self.notifier.unwrap_or_else(|| Arc::new(NullNotifier)),
            service: UnitOfWorkService::new(SequenceService::new(), config.undo_depth),
            durable,
            reconciler: self
                .reconciler
                .unwrap_or_else(|| Arc::new(DisjointReconciler)),
            model_version: supported,
            in_flight: None,
        };
        Ok(Store { config, inner, log })
    }
}

/// One process's view of a project.
///
/// Edits are made inside a unit of work and become visible to other
/// processes on [`Store::commit`]. Without a shared directory the store
/// runs in exclusive mode and commits go straight to durable storage.
pub struct Store {
    config: StoreConfig,
    inner: SyncParticipant,
    log: Option<CommitLog>,
}

impl Store {
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn map(&self) -> &IdentityMap {
        &self.inner.map
    }

    pub fn field_registry(&self) -> &FieldRegistry {
        &self.inner.fields
    }

    pub fn is_shared(&self) -> bool {
        self.log.is_some()
    }

    /// Whether this process writes to durable storage. Always true in
    /// exclusive mode.
    pub fn is_master(&self) -> bool {
        self.log.as_ref().map_or(true, CommitLog::is_master)
    }

    pub fn log_slot(&self) -> Option<usize> {
        self.log.as_ref().map(CommitLog::slot)
    }

    /// Changes committed locally but not yet published.
    pub fn pending(&self) -> &ChangeSet {
        self.inner.service.pending()
    }

    // ---- Units of work ----

    pub fn begin_unit_of_work(&mut self, undo_text: &str, redo_text: &str) -> StoreResult<u64> {
        Ok(self.inner.service.begin(undo_text, redo_text)?)
    }

    pub fn create_object(&mut self, class: ClassId) -> StoreResult<Arc<ModelObject>> {
        let uow = self.inner.service.current_mut()?;
        Ok(uow.create_object(&self.inner.map, class)?)
    }

    pub fn set_field(
        &mut self,
        object: &Arc<ModelObject>,
        field: FieldId,
        value: FieldValue,
    ) -> StoreResult<FieldValue> {
        Ok(self.inner.service.current_mut()?.set_field(object, field, value)?)
    }

    pub fn set_alternative(
        &mut self,
        object: &Arc<ModelObject>,
        field: FieldId,
        alternative: u32,
        value: Option<String>,
    ) -> StoreResult<Option<String>> {
        Ok(self
            .inner
            .service
            .current_mut()?
            .set_alternative(object, field, alternative, value)?)
    }

    pub fn delete_object(&mut self, object: &Arc<ModelObject>) -> StoreResult<()> {
        let uow = self.inner.service.current_mut()?;
        Ok(uow.delete_object(&self.inner.map, object)?)
    }

    /// Define, redefine or (with `None`) remove a custom field.
    pub fn define_field(
        &mut self,
        class: ClassId,
        field: FieldId,
        spec: Option<FieldSpec>,
    ) -> StoreResult<()> {
        let uow = self.inner.service.current_mut()?;
        Ok(uow.change_field_definition(&self.inner.fields, class, field, spec)?)
    }

    pub fn add_external_action(&mut self, action: Box<dyn ExternalAction>) -> StoreResult<()> {
        Ok(self.inner.service.current_mut()?.add_external(action)?)
    }

    /// Commit the open unit of work, if any, and publish everything pending.
    pub fn commit(&mut self) -> StoreResult<CommitStatus> {
        if self.inner.service.is_open() {
            self.inner.service.commit()?;
        }
        self.publish()
    }

    pub fn rollback(&mut self) -> StoreResult<()> {
        let ctx = UndoContext::new(&self.inner.map, self.inner.notifier.as_ref(), &self.inner.fields);
        Ok(self.inner.service.rollback(&ctx)?)
    }

    /// Pull in foreign commits and publish anything pending.
    pub fn refresh(&mut self) -> StoreResult<CommitStatus> {
        self.publish()
    }

    fn publish(&mut self) -> StoreResult<CommitStatus> {
        if let Some(open) = self.inner.service.current() {
            return Err(UowError::AlreadyOpen(open.seq()).into());
        }
        let Some(log) = self.log.as_mut() else {
            return self.inner.publish_exclusive();
        };

        let status = match log.commit(&mut self.inner) {
            Ok(CommitOutcome::Committed {
                generation,
                foreign_applied,
            }) => {
                self.inner.in_flight = None;
                CommitStatus::Committed {
                    generation,
                    foreign_applied,
                }
            }
            Ok(CommitOutcome::Unflushed {
                generation,
                foreign_applied,
                error,
            }) => {
                // The record is in the log; re-queueing would publish it twice.
                self.inner.in_flight = None;
                CommitStatus::Unflushed {
                    generation,
                    foreign_applied,
                    error,
                }
            }
            Ok(CommitOutcome::NothingToCommit { foreign_applied }) => {
                self.inner.in_flight = None;
                CommitStatus::NothingToCommit { foreign_applied }
            }
            Ok(CommitOutcome::Conflict { reason, .. }) => {
                self.inner.restore_in_flight();
                CommitStatus::Conflict { reason }
            }
            Ok(CommitOutcome::CapacityExceeded {
                needed, available, ..
            }) => {
                self.inner.restore_in_flight();
                CommitStatus::CapacityExceeded { needed, available }
            }
            Err(e) => {
                self.inner.restore_in_flight();
                return Err(e);
            }
        };
        Ok(status)
    }

    // ---- Undo / redo ----

    pub fn can_undo(&self) -> bool {
        let ctx = UndoContext::new(&self.inner.map, self.inner.notifier.as_ref(), &self.inner.fields);
        self.inner.service.can_undo(&ctx)
    }

    pub fn can_redo(&self) -> bool {
        let ctx = UndoContext::new(&self.inner.map, self.inner.notifier.as_ref(), &self.inner.fields);
        self.inner.service.can_redo(&ctx)
    }

    pub fn undo_text(&self) -> Option<&str> {
        self.inner.service.undo_text()
    }

    pub fn redo_text(&self) -> Option<&str> {
        self.inner.service.redo_text()
    }

    /// Undo the most recent unit and publish the result. `None` when there
    /// is nothing to undo.
    pub fn undo(&mut self) -> StoreResult<Option<UndoReport>> {
        if !self.inner.service.stack().can_undo() {
            return Ok(None);
        }
        let ctx = UndoContext::new(&self.inner.map, self.inner.notifier.as_ref(), &self.inner.fields);
        let outcome = self.inner.service.undo(&ctx)?;
        let status = self.publish()?;
        Ok(Some(UndoReport { outcome, status }))
    }

    /// Redo the most recently undone unit and publish the result.
    pub fn redo(&mut self) -> StoreResult<Option<UndoReport>> {
        if !self.inner.service.stack().can_redo() {
            return Ok(None);
        }
        let ctx = UndoContext::new(&self.inner.map, self.inner.notifier.as_ref(), &self.inner.fields);
        let outcome = self.inner.service.redo(&ctx)?;
        let status = self.publish()?;
        Ok(Some(UndoReport { outcome, status }))
    }

    // ---- Queries ----

    pub fn get_object(&self, key: impl Into<ObjectKey>) -> StoreResult<Arc<ModelObject>> {
        Ok(self.inner.map.get(key)?)
    }

    pub fn try_get_object(&self, key: impl Into<ObjectKey>) -> StoreResult<Option<Arc<ModelObject>>> {
        Ok(self.inner.map.try_get(key)?)
    }

    /// Every instance of `class` and its subclasses, materialized.
    pub fn all_instances(&self, class: ClassId) -> StoreResult<Vec<Arc<ModelObject>>> {
        Ok(self
            .inner
            .map
            .all_instances_of(class)
            .collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count(&self, class: ClassId) -> usize {
        self.inner.map.count(class)
    }

    /// Leave the commit log. As flush owner, first persist every record
    /// durable storage lacks. Unpublished changes are discarded.
    pub fn close(mut self) -> StoreResult<()> {
        if let Some(log) = self.log.take() {
            log.leave(&mut self.inner)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tsr_identity::{ClassDef, EntryState};
    use tsr_types::{Guid, ObjectPayload};
    use tsr_uow::{NotifyError, PropChange, UndoOutcome};

    const NOTE: ClassId = ClassId(1);
    const TITLE: FieldId = FieldId(1);
    const LINK: FieldId = FieldId(2);

    #[derive(Default)]
    struct Recording(Mutex<Vec<PropChange>>);

    impl ChangeNotifier for Recording {
        fn prop_changed(&self, change: &PropChange) -> Result<(), NotifyError> {
            self.0.lock().unwrap().push(change.clone());
            Ok(())
        }
    }

    /// Durable store whose next `persist` can be made to fail.
    struct FlakyDurable {
        inner: InMemoryDurableStore,
        fail_next: AtomicBool,
    }

    impl DurableStore for FlakyDurable {
        fn model_version(&self) -> StoreResult<u32> {
            self.inner.model_version()
        }

        fn set_model_version(&self, version: u32) -> StoreResult<()> {
            self.inner.set_model_version(version)
        }

        fn generation(&self) -> StoreResult<i64> {
            self.inner.generation()
        }

        fn load(&self) -> StoreResult<Vec<ObjectPayload>> {
            self.inner.load()
        }

        fn persist(
            &self,
            generation: i64,
            upserts: &[ObjectPayload],
            deleted: &[Guid],
        ) -> StoreResult<()> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Durable("disk full".into()));
            }
            self.inner.persist(generation, upserts, deleted)
        }
    }

    fn catalog() -> Arc<dyn ClassMetadata> {
        let catalog = ClassCatalog::new();
        catalog.register(ClassDef::new(NOTE, "Note")).unwrap();
        Arc::new(catalog)
    }

    fn text(s: &str) -> FieldValue {
        FieldValue::Text(s.into())
    }

    fn exclusive(durable: &InMemoryDurableStore) -> Store {
        StoreBuilder::new(StoreConfig::new("test"))
            .classes(catalog())
            .durable(Arc::new(durable.clone()))
            .open()
            .unwrap()
    }

    fn shared_builder(dir: &TempDir, durable: &InMemoryDurableStore) -> StoreBuilder {
        StoreBuilder::new(
            StoreConfig::new("test")
                .with_shared_dir(dir.path())
                .with_ring_capacity(64 * 1024),
        )
        .classes(catalog())
        .durable(Arc::new(durable.clone()))
    }

    fn shared(dir: &TempDir, durable: &InMemoryDurableStore) -> Store {
        shared_builder(dir, durable).open().unwrap()
    }

    fn add_note(store: &mut Store, title: &str) -> Arc<ModelObject> {
        store.begin_unit_of_work("Undo add", "Redo add").unwrap();
        let note = store.create_object(NOTE).unwrap();
        store.set_field(&note, TITLE, text(title)).unwrap();
        assert!(store.commit().unwrap().is_success());
        note
    }

    // ---- Exclusive mode ----

    #[test]
    fn exclusive_commit_persists() {
        let durable = InMemoryDurableStore::new(1);
        let mut store = exclusive(&durable);
        assert!(!store.is_shared());
        assert!(store.is_master());

        store.begin_unit_of_work("Undo add", "Redo add").unwrap();
        let note = store.create_object(NOTE).unwrap();
        store.set_field(&note, TITLE, text("hello")).unwrap();
        let status = store.commit().unwrap();
        assert_eq!(
            status,
            CommitStatus::Committed {
                generation: 1,
                foreign_applied: false
            }
        );
        assert!(durable.contains(note.guid()));
        assert!(store.pending().is_empty());
        assert_eq!(
            store.commit().unwrap(),
            CommitStatus::NothingToCommit {
                foreign_applied: false
            }
        );
    }

    #[test]
    fn reopen_loads_objects_lazily() {
        let durable = InMemoryDurableStore::new(1);
        let mut first = exclusive(&durable);
        let note = add_note(&mut first, "hello");

        let reopened = exclusive(&durable);
        assert_eq!(
            reopened.map().entry_state(note.guid()),
            Some(EntryState::Surrogate)
        );
        assert_eq!(reopened.count(NOTE), 1);
        let loaded = reopened.get_object(note.guid()).unwrap();
        assert_eq!(loaded.field(TITLE), text("hello"));
        assert_eq!(reopened.all_instances(NOTE).unwrap().len(), 1);
    }

    #[test]
    fn undo_and_redo_publish_their_effect() {
        let durable = InMemoryDurableStore::new(1);
        let mut store = exclusive(&durable);
        let note = add_note(&mut store, "hello");
        assert_eq!(store.undo_text(), Some("Undo add"));

        let report = store.undo().unwrap().unwrap();
        assert_eq!(report.outcome, UndoOutcome::Completed);
        assert_eq!(report.status.generation(), Some(2));
        assert!(!durable.contains(note.guid()));
        assert!(store.try_get_object(note.guid()).unwrap().is_none());

        let report = store.redo().unwrap().unwrap();
        assert_eq!(report.status.generation(), Some(3));
        assert!(durable.contains(note.guid()));
        assert!(store.redo().unwrap().is_none());
    }

    #[test]
    fn undo_delete_after_referrer_loaded() {
        let durable = InMemoryDurableStore::new(1);
        let (target, referrer) = {
            let mut first = exclusive(&durable);
            first.begin_unit_of_work("", "").unwrap();
            let target = first.create_object(NOTE).unwrap();
            let referrer = first.create_object(NOTE).unwrap();
            first
                .set_field(&referrer, LINK, FieldValue::Ref(target.id().clone()))
                .unwrap();
            first.commit().unwrap();
            (target.guid(), referrer.guid())
        };

        let mut store = exclusive(&durable);
        let doomed = store.get_object(target).unwrap();
        store.begin_unit_of_work("Undo delete", "Redo delete").unwrap();
        store.delete_object(&doomed).unwrap();
        store.commit().unwrap();
        assert!(!durable.contains(target));

        // Loading the referrer decodes a reference to the deleted object.
        let loaded = store.get_object(referrer).unwrap();
        assert!(store.can_undo());
        store.undo().unwrap().unwrap();

        assert!(Arc::ptr_eq(&store.get_object(target).unwrap(), &doomed));
        assert!(matches!(
            loaded.field(LINK),
            FieldValue::Ref(id) if id.same_instance(doomed.id())
        ));
        assert!(durable.contains(target));
        assert_eq!(store.redo_text(), Some("Redo delete"));
    }

    #[test]
    fn rollback_discards_open_unit() {
        let durable = InMemoryDurableStore::new(1);
        let mut store = exclusive(&durable);
        store.begin_unit_of_work("", "").unwrap();
        let note = store.create_object(NOTE).unwrap();
        store.rollback().unwrap();
        assert!(!store.map().contains(note.guid()));
        assert!(store.pending().is_empty());
        assert!(store.undo().unwrap().is_none());
    }

    #[test]
    fn refresh_with_open_unit_is_rejected() {
        let durable = InMemoryDurableStore::new(1);
        let mut store = exclusive(&durable);
        store.begin_unit_of_work("", "").unwrap();
        assert!(matches!(
            store.refresh(),
            Err(StoreError::Uow(UowError::AlreadyOpen(_)))
        ));
    }

    // ---- Model version ----

    #[test]
    fn newer_model_version_is_forbidden() {
        let durable = InMemoryDurableStore::new(3);
        let result = StoreBuilder::new(StoreConfig::new("test"))
            .durable(Arc::new(durable))
            .open();
        assert!(matches!(
            result,
            Err(StoreError::MigrationForbidden {
                on_disk: 3,
                supported: 1
            })
        ));
    }

    #[test]
    fn older_model_version_migrates_only_when_exclusive() {
        let dir = TempDir::new().unwrap();
        let durable = InMemoryDurableStore::new(1);
        let config = StoreConfig::new("test").with_model_version(2);

        let shared = StoreBuilder::new(config.clone().with_shared_dir(dir.path()))
            .durable(Arc::new(durable.clone()))
            .open();
        assert!(matches!(
            shared,
            Err(StoreError::MigrationForbidden { on_disk: 1, supported: 2 })
        ));

        StoreBuilder::new(config)
            .durable(Arc::new(durable.clone()))
            .open()
            .unwrap();
        assert_eq!(durable.model_version().unwrap(), 2);
    }

    // ---- Shared commit log ----

    #[test]
    fn two_stores_exchange_commits() {
        let dir = TempDir::new().unwrap();
        let durable = InMemoryDurableStore::new(1);
        let mut a = shared(&dir, &durable);
        let mut b = shared(&dir, &durable);
        assert_eq!((a.log_slot(), b.log_slot()), (Some(0), Some(1)));
        assert!(a.is_master());
        assert!(!b.is_master());

        let x = add_note(&mut a, "x");
        assert!(durable.contains(x.guid()));

        b.begin_unit_of_work("", "").unwrap();
        let y = b.create_object(NOTE).unwrap();
        assert_eq!(
            b.commit().unwrap(),
            CommitStatus::Committed {
                generation: 2,
                foreign_applied: true
            }
        );
        assert_eq!(b.get_object(x.guid()).unwrap().field(TITLE), text("x"));
        assert!(!durable.contains(y.guid()));

        assert_eq!(
            a.refresh().unwrap(),
            CommitStatus::NothingToCommit {
                foreign_applied: true
            }
        );
        assert!(a.try_get_object(y.guid()).unwrap().is_some());
        assert!(durable.contains(y.guid()));
        assert_eq!(durable.generation().unwrap(), 2);
    }

    #[test]
    fn foreign_update_reaches_live_object() {
        let dir = TempDir::new().unwrap();
        let durable = InMemoryDurableStore::new(1);
        let notifier = Arc::new(Recording::default());
        let mut a = shared_builder(&dir, &durable)
            .notifier(notifier.clone())
            .open()
            .unwrap();
        let mut b = shared(&dir, &durable);

        let note = add_note(&mut a, "draft");
        b.refresh().unwrap();
        let remote = b.get_object(note.guid()).unwrap();
        b.begin_unit_of_work("", "").unwrap();
        b.set_field(&remote, TITLE, text("final")).unwrap();
        b.commit().unwrap();

        notifier.0.lock().unwrap().clear();
        a.refresh().unwrap();
        assert_eq!(note.field(TITLE), text("final"));
        // The local creation can no longer be undone in order.
        assert!(!a.can_undo());

        let changes = notifier.0.lock().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].object, note.guid());
        assert_eq!(changes[0].field, TITLE);
    }

    #[test]
    fn conflicting_edits_are_reported_and_kept() {
        let dir = TempDir::new().unwrap();
        let durable = InMemoryDurableStore::new(1);
        let mut a = shared(&dir, &durable);
        let mut b = shared(&dir, &durable);

        let note = add_note(&mut a, "draft");
        b.refresh().unwrap();
        let remote = b.get_object(note.guid()).unwrap();
        b.begin_unit_of_work("", "").unwrap();
        b.set_field(&remote, TITLE, text("theirs")).unwrap();
        b.commit().unwrap();

        a.begin_unit_of_work("", "").unwrap();
        a.set_field(&note, TITLE, text("mine")).unwrap();
        let status = a.commit().unwrap();
        assert!(matches!(status, CommitStatus::Conflict { .. }));
        assert!(a.pending().modified().contains(&note.guid()));
        assert_eq!(note.field(TITLE), text("mine"));
        assert!(matches!(
            status.into_result(),
            Err(StoreError::ConflictDetected(_))
        ));
    }

    #[test]
    fn foreign_delete_removes_object() {
        let dir = TempDir::new().unwrap();
        let durable = InMemoryDurableStore::new(1);
        let mut a = shared(&dir, &durable);
        let mut b = shared(&dir, &durable);

        let note = add_note(&mut a, "doomed");
        b.refresh().unwrap();
        let remote = b.get_object(note.guid()).unwrap();
        b.begin_unit_of_work("", "").unwrap();
        b.delete_object(&remote).unwrap();
        b.commit().unwrap();

        a.refresh().unwrap();
        assert!(a.try_get_object(note.guid()).unwrap().is_none());
        assert_eq!(a.count(NOTE), 0);
        assert!(!durable.contains(note.guid()));
    }

    #[test]
    fn undo_refused_while_foreign_object_refers_to_creation() {
        let dir = TempDir::new().unwrap();
        let durable = InMemoryDurableStore::new(1);
        let mut a = shared(&dir, &durable);
        let mut b = shared(&dir, &durable);

        let target = add_note(&mut a, "target");
        b.refresh().unwrap();
        let target_id = b.get_object(target.guid()).unwrap().id().clone();
        b.begin_unit_of_work("", "").unwrap();
        let referrer = b.create_object(NOTE).unwrap();
        b.set_field(&referrer, LINK, FieldValue::Ref(target_id)).unwrap();
        b.commit().unwrap();

        a.refresh().unwrap();
        assert!(!a.can_undo());
        assert!(matches!(
            a.undo(),
            Err(StoreError::Uow(UowError::ReferentialIntegrity { .. }))
        ));
        assert_eq!(a.undo_text(), Some("Undo add"));
        assert!(a.map().contains(target.guid()));
    }

    #[test]
    fn closing_flush_owner_persists_commits_of_others() {
        let dir = TempDir::new().unwrap();
        let durable = InMemoryDurableStore::new(1);
        let a = shared(&dir, &durable);
        let mut b = shared(&dir, &durable);

        let y = add_note(&mut b, "y");
        assert!(!durable.contains(y.guid()));
        a.close().unwrap();
        assert!(durable.contains(y.guid()));
        assert_eq!(durable.generation().unwrap(), 1);

        let z = add_note(&mut b, "z");
        assert!(b.is_master());
        assert!(durable.contains(z.guid()));
        assert_eq!(durable.generation().unwrap(), 2);
        b.close().unwrap();
    }

    #[test]
    fn new_flush_owner_persists_what_a_dropped_owner_left() {
        let dir = TempDir::new().unwrap();
        let durable = InMemoryDurableStore::new(1);
        let a = shared(&dir, &durable);
        let mut b = shared(&dir, &durable);

        let y = add_note(&mut b, "y");
        drop(a);
        assert!(!durable.contains(y.guid()));

        let z = add_note(&mut b, "z");
        assert!(b.is_master());
        assert!(durable.contains(y.guid()));
        assert!(durable.contains(z.guid()));
        assert_eq!(durable.generation().unwrap(), 2);
    }

    #[test]
    fn failed_durable_write_is_not_published_twice() {
        let dir = TempDir::new().unwrap();
        let memory = InMemoryDurableStore::new(1);
        let flaky = Arc::new(FlakyDurable {
            inner: memory.clone(),
            fail_next: AtomicBool::new(false),
        });
        let mut store = StoreBuilder::new(
            StoreConfig::new("test")
                .with_shared_dir(dir.path())
                .with_ring_capacity(64 * 1024),
        )
        .classes(catalog())
        .durable(flaky.clone())
        .open()
        .unwrap();

        flaky.fail_next.store(true, Ordering::SeqCst);
        store.begin_unit_of_work("", "").unwrap();
        let note = store.create_object(NOTE).unwrap();
        let status = store.commit().unwrap();
        assert!(matches!(
            status,
            CommitStatus::Unflushed { generation: 1, .. }
        ));
        assert!(status.is_success());
        assert!(store.pending().is_empty());
        assert!(!memory.contains(note.guid()));
        assert!(matches!(
            status.into_result(),
            Err(StoreError::Durable(_))
        ));

        assert_eq!(
            store.refresh().unwrap(),
            CommitStatus::NothingToCommit {
                foreign_applied: false
            }
        );
        assert!(memory.contains(note.guid()));
        assert_eq!(memory.generation().unwrap(), 1);
    }

    #[test]
    fn closing_frees_the_slot() {
        let dir = TempDir::new().unwrap();
        let durable = InMemoryDurableStore::new(1);
        let a = shared(&dir, &durable);
        a.close().unwrap();
        let b = shared(&dir, &durable);
        assert_eq!(b.log_slot(), Some(0));
        assert!(b.is_master());
    }
}
