use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use tsr_identity::{FieldValue, IdentityMap, ModelObject};
use tsr_types::{ClassId, FieldId, Guid, ObjectId};

use crate::action::{Action, ExternalAction, PropertyChange, PropertyKey, UndoContext};
use crate::error::{UowError, UowResult};
use crate::fields::{FieldRegistry, FieldSpec};
use crate::notify::ChangeNotifier;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UowKind {
    /// A user edit that supports true undo and redo.
    Undoable,
    /// Externally sourced changes (merged foreign commits). Undo is a no-op
    /// and redo only replays notifications, once.
    NonUndoable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UowState {
    Open,
    Committed,
    Undone,
    Redone,
    RolledBack,
}

/// Result of a completed undo or redo.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UndoOutcome {
    Completed,
    /// The data was reversed but notifying observers failed; they must
    /// refresh from scratch.
    RefreshRequired,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Undo,
    Redo,
}

/// One logical batch of edits.
///
/// Every recording method applies its mutation immediately and keeps what
/// is needed to reverse it. Repeated edits of one property collapse into a
/// single action holding the net before and after values.
#[derive(Debug)]
pub struct UnitOfWork {
    seq: u64,
    kind: UowKind,
    state: UowState,
    undo_text: String,
    redo_text: String,
    actions: Vec<Action>,
    created: BTreeSet<Guid>,
    modified: BTreeSet<Guid>,
    deleted: BTreeSet<Guid>,
    properties: HashMap<PropertyKey, usize>,
    definitions: HashMap<(ClassId, FieldId), usize>,
    simulated: bool,
}

impl UnitOfWork {
    pub fn new(seq: u64, undo_text: impl Into<String>, redo_text: impl Into<String>) -> Self {
        Self::with_kind(seq, UowKind::Undoable, undo_text.into(), redo_text.into())
    }

    pub fn non_undoable(seq: u64) -> Self {
        Self::with_kind(seq, UowKind::NonUndoable, String::new(), String::new())
    }

    fn with_kind(seq: u64, kind: UowKind, undo_text: String, redo_text: String) -> Self {
        Self {
            seq,
            kind,
            state: UowState::Open,
            undo_text,
            redo_text,
            actions: Vec::new(),
            created: BTreeSet::new(),
            modified: BTreeSet::new(),
            deleted: BTreeSet::new(),
            properties: HashMap::new(),
            definitions: HashMap::new(),
            simulated: false,
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn kind(&self) -> UowKind {
        self.kind
    }

    pub fn state(&self) -> UowState {
        self.state
    }

    pub fn undo_text(&self) -> &str {
        &self.undo_text
    }

    pub fn redo_text(&self) -> &str {
        &self.redo_text
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Objects created by this unit, including ones it later deleted.
    pub fn created(&self) -> &BTreeSet<Guid> {
        &self.created
    }

    pub fn modified(&self) -> &BTreeSet<Guid> {
        &self.modified
    }

    /// Objects deleted by this unit, including ones it created first.
    pub fn deleted(&self) -> &BTreeSet<Guid> {
        &self.deleted
    }

    /// Objects both created and deleted here; they never existed outside it.
    pub fn created_and_deleted(&self) -> BTreeSet<Guid> {
        self.created.intersection(&self.deleted).copied().collect()
    }

    /// Created objects that still exist once the unit is applied.
    pub fn net_created(&self) -> BTreeSet<Guid> {
        self.created.difference(&self.deleted).copied().collect()
    }

    /// Deleted objects that existed before the unit began.
    pub fn net_deleted(&self) -> BTreeSet<Guid> {
        self.deleted.difference(&self.created).copied().collect()
    }

    /// Union of the created, modified and deleted sets.
    pub fn all_ids(&self) -> BTreeSet<Guid> {
        let mut ids = self.created.clone();
        ids.extend(self.modified.iter().copied());
        ids.extend(self.deleted.iter().copied());
        ids
    }

    pub fn has_data_changes(&self) -> bool {
        self.actions.iter().any(|a| a.capabilities().is_data_change)
    }

    /// True iff the two units touch at least one common object.
    pub fn affects_same_objects(&self, other: &UnitOfWork) -> bool {
        self.touches(&other.all_ids())
    }

    /// True iff this unit touches any of `ids`.
    pub fn touches(&self, ids: &BTreeSet<Guid>) -> bool {
        ids.iter().any(|id| {
            self.created.contains(id) || self.modified.contains(id) || self.deleted.contains(id)
        })
    }

    fn expect_state(&self, allowed: &[UowState], operation: &'static str) -> UowResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(UowError::InvalidState {
                seq: self.seq,
                state: self.state,
                operation,
            })
        }
    }

    // ------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------

    /// Record an action whose effect has already been applied.
    pub fn record(&mut self, action: Action) -> UowResult<()> {
        self.expect_state(&[UowState::Open], "record an action")?;
        self.note_ids(&action);
        self.push_action(action);
        Ok(())
    }

    fn note_ids(&mut self, action: &Action) {
        match action {
            Action::Create(obj) => {
                self.created.insert(obj.guid());
            }
            Action::Delete(obj) => {
                self.modified.remove(&obj.guid());
                self.deleted.insert(obj.guid());
            }
            Action::Property(change) => {
                let guid = change.key.object;
                if !self.created.contains(&guid) && !self.deleted.contains(&guid) {
                    self.modified.insert(guid);
                }
            }
            Action::FieldDefinition { .. } | Action::External(_) => {}
        }
    }

    /// Append `action`, folding it into an earlier action on the same key.
    fn push_action(&mut self, action: Action) {
        match action {
            Action::Property(change) => {
                if let Some(&index) = self.properties.get(&change.key) {
                    if let Action::Property(existing) = &mut self.actions[index] {
                        existing.after = change.after;
                        return;
                    }
                }
                self.properties.insert(change.key, self.actions.len());
                self.actions.push(Action::Property(change));
            }
            Action::FieldDefinition {
                class,
                field,
                before,
                after,
            } => {
                if let Some(&index) = self.definitions.get(&(class, field)) {
                    if let Action::FieldDefinition { after: existing, .. } = &mut self.actions[index] {
                        *existing = after;
                        return;
                    }
                }
                self.definitions.insert((class, field), self.actions.len());
                self.actions.push(Action::FieldDefinition {
                    class,
                    field,
                    before,
                    after,
                });
            }
            other => self.actions.push(other),
        }
    }

    /// Create and register a new instance of `class`.
    pub fn create_object(&mut self, map: &IdentityMap, class: ClassId) -> UowResult<Arc<ModelObject>> {
        self.expect_state(&[UowState::Open], "create an object")?;
        let object = map.create_object(class)?;
        self.record(Action::Create(object.clone()))?;
        Ok(object)
    }

    /// Remove `object` from the map. Its field values are kept so that
    /// undo can restore it as it was.
    pub fn delete_object(&mut self, map: &IdentityMap, object: &Arc<ModelObject>) -> UowResult<()> {
        self.expect_state(&[UowState::Open], "delete an object")?;
        map.unregister(object.id())?;
        self.record(Action::Delete(object.clone()))
    }

    /// Set a field and return its previous value.
    pub fn set_field(
        &mut self,
        object: &Arc<ModelObject>,
        field: FieldId,
        value: FieldValue,
    ) -> UowResult<FieldValue> {
        self.expect_state(&[UowState::Open], "set a field")?;
        let before = object.set_field(field, value.clone());
        self.record(Action::Property(PropertyChange {
            object: object.clone(),
            key: PropertyKey {
                object: object.guid(),
                field,
                alternative: None,
            },
            before: before.clone(),
            after: value,
        }))?;
        Ok(before)
    }

    /// Set or clear one alternative of a multi-text field.
    pub fn set_alternative(
        &mut self,
        object: &Arc<ModelObject>,
        field: FieldId,
        alternative: u32,
        value: Option<String>,
    ) -> UowResult<Option<String>> {
        self.expect_state(&[UowState::Open], "set an alternative")?;
        let before = object.set_alternative(field, alternative, value.clone());
        let as_value = |text: Option<String>| text.map(FieldValue::Text).unwrap_or_default();
        self.record(Action::Property(PropertyChange {
            object: object.clone(),
            key: PropertyKey {
                object: object.guid(),
                field,
                alternative: Some(alternative),
            },
            before: as_value(before.clone()),
            after: as_value(value),
        }))?;
        Ok(before)
    }

    /// Define, redefine or remove a custom field.
    pub fn change_field_definition(
        &mut self,
        registry: &FieldRegistry,
        class: ClassId,
        field: FieldId,
        spec: Option<FieldSpec>,
    ) -> UowResult<()> {
        self.expect_state(&[UowState::Open], "change a field definition")?;
        let before = registry.set(class, field, spec.clone());
        self.record(Action::FieldDefinition {
            class,
            field,
            before,
            after: spec,
        })
    }

    pub fn add_external(&mut self, action: Box<dyn ExternalAction>) -> UowResult<()> {
        self.record(Action::External(action))
    }

    /// Fold `earlier`'s actions in front of this unit's and union the id sets.
    ///
    /// Property edits present in both collapse into one action holding
    /// `earlier`'s before value and this unit's after value.
    pub fn insert_actions_from(&mut self, mut earlier: UnitOfWork) {
        let mut actions = std::mem::take(&mut earlier.actions);
        actions.append(&mut self.actions);
        self.properties.clear();
        self.definitions.clear();
        for action in actions {
            self.push_action(action);
        }

        self.created.extend(earlier.created);
        self.deleted.extend(earlier.deleted);
        self.modified.extend(earlier.modified);
        let created = &self.created;
        let deleted = &self.deleted;
        self.modified
            .retain(|id| !created.contains(id) && !deleted.contains(id));
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn commit(&mut self) -> UowResult<()> {
        self.expect_state(&[UowState::Open], "commit")?;
        self.state = UowState::Committed;
        debug!(
            seq = self.seq,
            actions = self.actions.len(),
            created = self.created.len(),
            modified = self.modified.len(),
            deleted = self.deleted.len(),
            "committed unit of work"
        );
        Ok(())
    }

    /// Reverse an open unit without guards or notifications.
    pub fn rollback(&mut self, ctx: &UndoContext<'_>) -> UowResult<()> {
        self.expect_state(&[UowState::Open], "roll back")?;
        self.reverse_data(ctx)?;
        for action in self.actions.iter_mut().rev() {
            if !action.capabilities().is_data_change {
                action.undo(ctx)?;
            }
        }
        self.state = UowState::RolledBack;
        debug!(seq = self.seq, actions = self.actions.len(), "rolled back unit of work");
        Ok(())
    }

    /// Passes 1 and 2 of undo.
    fn reverse_data(&mut self, ctx: &UndoContext<'_>) -> UowResult<()> {
        for action in self.actions.iter_mut().rev() {
            if action.capabilities().first_pass_undo {
                action.undo(ctx)?;
            }
        }
        for action in self.actions.iter_mut().rev() {
            let caps = action.capabilities();
            if caps.is_data_change && !caps.first_pass_undo {
                action.undo(ctx)?;
            }
        }
        Ok(())
    }

    /// Reverse the unit in four passes: re-create deleted objects, reverse
    /// the remaining data changes, notify, then reverse non-data actions.
    /// Data passes run in reverse action order.
    ///
    /// Refused with [`UowError::ReferentialIntegrity`] when undo would leave
    /// a dangling reference; nothing changes in that case.
    pub fn undo(&mut self, ctx: &UndoContext<'_>) -> UowResult<UndoOutcome> {
        if self.kind == UowKind::NonUndoable {
            return Ok(UndoOutcome::Completed);
        }
        self.expect_state(&[UowState::Committed, UowState::Redone], "undo")?;
        self.check_undo(ctx.map)?;

        self.reverse_data(ctx)?;
        let outcome = self.notify(ctx.notifier, Direction::Undo);
        for action in self.actions.iter_mut().rev() {
            if !action.capabilities().is_data_change {
                action.undo(ctx)?;
            }
        }

        self.state = UowState::Undone;
        debug!(seq = self.seq, ?outcome, "undid unit of work");
        Ok(outcome)
    }

    /// Replay the unit in forward order with the same four-pass structure.
    ///
    /// For a non-undoable unit this only replays the notifications, and
    /// only the first time it is called.
    pub fn redo(&mut self, ctx: &UndoContext<'_>) -> UowResult<UndoOutcome> {
        if self.kind == UowKind::NonUndoable {
            return self.simulate_redo(ctx.notifier);
        }
        self.expect_state(&[UowState::Undone], "redo")?;
        self.check_redo(ctx.map)?;

        for action in self.actions.iter_mut() {
            if action.capabilities().first_pass_redo {
                action.redo(ctx)?;
            }
        }
        for action in self.actions.iter_mut() {
            let caps = action.capabilities();
            if caps.is_data_change && !caps.first_pass_redo {
                action.redo(ctx)?;
            }
        }
        let outcome = self.notify(ctx.notifier, Direction::Redo);
        for action in self.actions.iter_mut() {
            if !action.capabilities().is_data_change {
                action.redo(ctx)?;
            }
        }

        self.state = UowState::Redone;
        debug!(seq = self.seq, ?outcome, "redid unit of work");
        Ok(outcome)
    }

    fn simulate_redo(&mut self, notifier: &dyn ChangeNotifier) -> UowResult<UndoOutcome> {
        self.expect_state(&[UowState::Committed], "simulate redo")?;
        if self.simulated {
            return Ok(UndoOutcome::Completed);
        }
        self.simulated = true;
        Ok(self.notify(notifier, Direction::Redo))
    }

    /// Pass 3. A failing observer downgrades the outcome instead of
    /// aborting the already-applied data changes.
    fn notify(&self, notifier: &dyn ChangeNotifier, direction: Direction) -> UndoOutcome {
        let reversed = direction == Direction::Undo;
        let mut changes: Vec<&PropertyChange> = self
            .actions
            .iter()
            .filter_map(|a| match a {
                Action::Property(change) => Some(change),
                _ => None,
            })
            .collect();
        if reversed {
            changes.reverse();
        }
        for change in changes {
            if let Err(e) = notifier.prop_changed(&change.notification(reversed)) {
                warn!(seq = self.seq, error = %e, "change notification failed; refresh required");
                return UndoOutcome::RefreshRequired;
            }
        }
        UndoOutcome::Completed
    }

    // ------------------------------------------------------------------
    // Guards
    // ------------------------------------------------------------------

    pub fn can_undo(&self, map: &IdentityMap) -> bool {
        self.kind == UowKind::Undoable
            && matches!(self.state, UowState::Committed | UowState::Redone)
            && self.check_undo(map).is_ok()
    }

    pub fn can_redo(&self, map: &IdentityMap) -> bool {
        self.kind == UowKind::Undoable
            && self.state == UowState::Undone
            && self.check_redo(map).is_ok()
    }

    /// Undo removes every object this unit created. Refuse if any of them
    /// would stay referenced from outside the unit's own created set.
    pub fn check_undo(&self, map: &IdentityMap) -> UowResult<()> {
        let vanishing = self.net_created();
        if vanishing.is_empty() {
            return Ok(());
        }
        // Objects this unit deleted come back and may point at vanishing ones.
        let returning: Vec<&Arc<ModelObject>> = self
            .deleted_objects()
            .filter(|obj| !self.created.contains(&obj.guid()))
            .collect();

        for target in self.created_objects().filter(|o| vanishing.contains(&o.guid())) {
            let guid = target.guid();
            for referrer in map.referrers_of(target.id())? {
                if self.created.contains(&referrer.guid()) {
                    continue;
                }
                self.check_referrer(map, &referrer, guid, Direction::Undo)?;
            }
            for obj in &returning {
                if self.refers_after(obj, guid, Direction::Undo) {
                    return Err(UowError::ReferentialIntegrity {
                        target: guid,
                        referrer: obj.guid(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Redo deletes every object this unit deleted. Refuse if any of them
    /// would stay referenced, or if an action cannot be redone at all.
    pub fn check_redo(&self, map: &IdentityMap) -> UowResult<()> {
        if self.actions.iter().any(|a| !a.is_redoable()) {
            return Err(UowError::NotRedoable(self.seq));
        }
        let vanishing = self.net_deleted();
        if vanishing.is_empty() {
            return Ok(());
        }
        // Objects this unit created come back and may point at vanishing ones.
        let returning: Vec<&Arc<ModelObject>> = self
            .created_objects()
            .filter(|obj| !self.deleted.contains(&obj.guid()))
            .collect();

        for target in self.deleted_objects().filter(|o| vanishing.contains(&o.guid())) {
            let guid = target.guid();
            for referrer in map.referrers_of(target.id())? {
                if self.deleted.contains(&referrer.guid()) {
                    continue;
                }
                self.check_referrer(map, &referrer, guid, Direction::Redo)?;
            }
            for obj in &returning {
                if self.refers_after(obj, guid, Direction::Redo) {
                    return Err(UowError::ReferentialIntegrity {
                        target: guid,
                        referrer: obj.guid(),
                    });
                }
            }
        }
        Ok(())
    }

    fn check_referrer(
        &self,
        map: &IdentityMap,
        referrer: &ObjectId,
        target: Guid,
        direction: Direction,
    ) -> UowResult<()> {
        let guid = referrer.guid();
        // Only this unit's own property edits can remove the reference.
        let still_refers = if self.properties.keys().any(|k| k.object == guid) {
            let obj = map.get(referrer)?;
            self.refers_after(&obj, target, direction)
        } else {
            true
        };
        if still_refers {
            return Err(UowError::ReferentialIntegrity {
                target,
                referrer: guid,
            });
        }
        Ok(())
    }

    /// Whether `obj` references `target` once this unit's property edits
    /// have been reversed (`Undo`) or replayed (`Redo`).
    fn refers_after(&self, obj: &ModelObject, target: Guid, direction: Direction) -> bool {
        let mut fields = obj.fields();
        for action in &self.actions {
            let Action::Property(change) = action else {
                continue;
            };
            if change.key.object != obj.guid() || change.key.alternative.is_some() {
                continue;
            }
            let value = match direction {
                Direction::Undo => &change.before,
                Direction::Redo => &change.after,
            };
            if value.is_null() {
                fields.remove(&change.key.field);
            } else {
                fields.insert(change.key.field, value.clone());
            }
        }
        fields.values().any(|v| v.refers_to(target))
    }

    fn created_objects(&self) -> impl Iterator<Item = &Arc<ModelObject>> {
        self.actions.iter().filter_map(|a| match a {
            Action::Create(obj) => Some(obj),
            _ => None,
        })
    }

    fn deleted_objects(&self) -> impl Iterator<Item = &Arc<ModelObject>> {
        self.actions.iter().filter_map(|a| match a {
            Action::Delete(obj) => Some(obj),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::fields::FieldKind;
    use crate::notify::{NotifyError, NullNotifier, PropChange};
    use tsr_identity::{ClassCatalog, ClassDef, EntryState};

    const NOTE: ClassId = ClassId(1);
    const TARGET: FieldId = FieldId(1);
    const TITLE: FieldId = FieldId(2);

    fn map() -> IdentityMap {
        let catalog = ClassCatalog::new();
        catalog.register(ClassDef::new(NOTE, "Note")).unwrap();
        IdentityMap::new(Arc::new(catalog))
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<PropChange>>,
    }

    impl ChangeNotifier for Recorder {
        fn prop_changed(&self, change: &PropChange) -> Result<(), NotifyError> {
            self.seen.lock().unwrap().push(change.clone());
            Ok(())
        }
    }

    struct Failing;

    impl ChangeNotifier for Failing {
        fn prop_changed(&self, _change: &PropChange) -> Result<(), NotifyError> {
            Err(NotifyError("view disposed".into()))
        }
    }

    #[derive(Debug)]
    struct Selection {
        log: Arc<Mutex<Vec<&'static str>>>,
        redoable: bool,
    }

    impl ExternalAction for Selection {
        fn undo(&mut self) -> UowResult<()> {
            self.log.lock().unwrap().push("undo selection");
            Ok(())
        }

        fn redo(&mut self) -> UowResult<()> {
            self.log.lock().unwrap().push("redo selection");
            Ok(())
        }

        fn is_redoable(&self) -> bool {
            self.redoable
        }
    }

    fn committed(uow: &mut UnitOfWork) {
        uow.commit().unwrap();
    }

    // ----------------------------------------------------------------
    // Recording
    // ----------------------------------------------------------------

    #[test]
    fn repeated_edits_collapse_to_net_change() {
        let map = map();
        let obj = map.create_object(NOTE).unwrap();
        obj.set_field(TITLE, FieldValue::Text("a".into()));

        let mut uow = UnitOfWork::new(1, "Undo edit", "Redo edit");
        uow.set_field(&obj, TITLE, FieldValue::Text("b".into())).unwrap();
        uow.set_field(&obj, TITLE, FieldValue::Text("c".into())).unwrap();
        uow.set_alternative(&obj, FieldId(3), 1, Some("x".into())).unwrap();
        uow.set_alternative(&obj, FieldId(3), 2, Some("y".into())).unwrap();

        assert_eq!(uow.actions().len(), 3);
        match &uow.actions()[0] {
            Action::Property(change) => {
                assert_eq!(change.before, FieldValue::Text("a".into()));
                assert_eq!(change.after, FieldValue::Text("c".into()));
            }
            other => panic!("unexpected action {other:?}"),
        }
        assert_eq!(uow.modified().len(), 1);
        assert!(uow.created().is_empty());
    }

    #[test]
    fn created_then_deleted_is_tracked() {
        let map = map();
        let mut uow = UnitOfWork::new(1, "", "");
        let obj = uow.create_object(&map, NOTE).unwrap();
        uow.set_field(&obj, TITLE, FieldValue::Int(1)).unwrap();
        uow.delete_object(&map, &obj).unwrap();

        assert!(uow.created().contains(&obj.guid()));
        assert!(uow.deleted().contains(&obj.guid()));
        assert_eq!(uow.created_and_deleted().len(), 1);
        assert!(uow.net_created().is_empty());
        assert!(uow.net_deleted().is_empty());
        assert!(uow.modified().is_empty());
    }

    #[test]
    fn recording_after_commit_is_invalid() {
        let map = map();
        let obj = map.create_object(NOTE).unwrap();
        let mut uow = UnitOfWork::new(7, "", "");
        committed(&mut uow);
        let err = uow.set_field(&obj, TITLE, FieldValue::Int(1)).unwrap_err();
        assert!(matches!(
            err,
            UowError::InvalidState { seq: 7, state: UowState::Committed, .. }
        ));
        assert!(uow.commit().is_err());
    }

    // ----------------------------------------------------------------
    // Undo / redo
    // ----------------------------------------------------------------

    #[test]
    fn undo_then_redo_restores_graph() {
        let map = map();
        let fields = FieldRegistry::new();
        let notifier = NullNotifier;
        let ctx = UndoContext::new(&map, &notifier, &fields);

        let existing = map.create_object(NOTE).unwrap();
        let doomed = map.create_object(NOTE).unwrap();
        existing.set_field(TARGET, FieldValue::Ref(doomed.id().clone()));

        let mut uow = UnitOfWork::new(1, "Undo", "Redo");
        let fresh = uow.create_object(&map, NOTE).unwrap();
        uow.set_field(&fresh, TITLE, FieldValue::Text("new".into())).unwrap();
        uow.set_field(&existing, TARGET, FieldValue::Ref(fresh.id().clone())).unwrap();
        uow.delete_object(&map, &doomed).unwrap();
        committed(&mut uow);

        assert_eq!(uow.undo(&ctx).unwrap(), UndoOutcome::Completed);
        assert_eq!(uow.state(), UowState::Undone);
        assert!(!map.contains(fresh.guid()));
        assert_eq!(map.entry_state(doomed.id()), Some(EntryState::Live));
        assert_eq!(existing.field(TARGET), FieldValue::Ref(doomed.id().clone()));

        assert_eq!(uow.redo(&ctx).unwrap(), UndoOutcome::Completed);
        assert_eq!(uow.state(), UowState::Redone);
        assert!(Arc::ptr_eq(&map.get(fresh.id()).unwrap(), &fresh));
        assert_eq!(fresh.field(TITLE), FieldValue::Text("new".into()));
        assert!(!map.contains(doomed.guid()));
        assert_eq!(existing.field(TARGET), FieldValue::Ref(fresh.id().clone()));
    }

    #[test]
    fn undo_refused_when_created_object_is_referenced_externally() {
        let map = map();
        let fields = FieldRegistry::new();
        let ctx = UndoContext::new(&map, &NullNotifier, &fields);

        let mut uow = UnitOfWork::new(1, "", "");
        let fresh = uow.create_object(&map, NOTE).unwrap();
        committed(&mut uow);

        // A later edit outside the unit points at the new object.
        let outsider = map.create_object(NOTE).unwrap();
        outsider.set_field(TARGET, FieldValue::Ref(fresh.id().clone()));

        assert!(!uow.can_undo(&map));
        match uow.undo(&ctx).unwrap_err() {
            UowError::ReferentialIntegrity { target, referrer } => {
                assert_eq!(target, fresh.guid());
                assert_eq!(referrer, outsider.guid());
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(uow.state(), UowState::Committed);
        assert!(map.contains(fresh.guid()));
    }

    #[test]
    fn undo_allowed_when_reference_is_reversed_too() {
        let map = map();
        let fields = FieldRegistry::new();
        let ctx = UndoContext::new(&map, &NullNotifier, &fields);
        let owner = map.create_object(NOTE).unwrap();

        let mut uow = UnitOfWork::new(1, "", "");
        let fresh = uow.create_object(&map, NOTE).unwrap();
        let child = uow.create_object(&map, NOTE).unwrap();
        child.set_field(TARGET, FieldValue::Ref(fresh.id().clone()));
        uow.set_field(&owner, TARGET, FieldValue::RefSeq(vec![fresh.id().clone()]))
            .unwrap();
        committed(&mut uow);

        assert!(uow.can_undo(&map));
        uow.undo(&ctx).unwrap();
        assert_eq!(owner.field(TARGET), FieldValue::Null);
    }

    #[test]
    fn undo_refused_when_restored_object_points_at_created_one() {
        let map = map();
        let fields = FieldRegistry::new();
        let ctx = UndoContext::new(&map, &NullNotifier, &fields);
        let victim = map.create_object(NOTE).unwrap();

        let mut uow = UnitOfWork::new(1, "", "");
        let fresh = uow.create_object(&map, NOTE).unwrap();
        // Edited outside any unit, so undo cannot reverse it.
        victim.set_field(TARGET, FieldValue::Ref(fresh.id().clone()));
        uow.delete_object(&map, &victim).unwrap();
        committed(&mut uow);

        assert!(matches!(
            uow.undo(&ctx),
            Err(UowError::ReferentialIntegrity { referrer, .. }) if referrer == victim.guid()
        ));
    }

    #[test]
    fn redo_refused_when_deleted_object_is_referenced() {
        let map = map();
        let fields = FieldRegistry::new();
        let ctx = UndoContext::new(&map, &NullNotifier, &fields);
        let doomed = map.create_object(NOTE).unwrap();

        let mut uow = UnitOfWork::new(1, "", "");
        uow.delete_object(&map, &doomed).unwrap();
        committed(&mut uow);
        uow.undo(&ctx).unwrap();

        let outsider = map.create_object(NOTE).unwrap();
        outsider.set_field(TARGET, FieldValue::Ref(doomed.id().clone()));
        assert!(!uow.can_redo(&map));
        assert!(matches!(
            uow.redo(&ctx),
            Err(UowError::ReferentialIntegrity { .. })
        ));
        assert_eq!(uow.state(), UowState::Undone);

        outsider.set_field(TARGET, FieldValue::Null);
        assert!(uow.can_redo(&map));
        uow.redo(&ctx).unwrap();
        assert!(!map.contains(doomed.guid()));
    }

    #[test]
    fn redo_refused_for_non_redoable_action() {
        let map = map();
        let fields = FieldRegistry::new();
        let ctx = UndoContext::new(&map, &NullNotifier, &fields);
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut uow = UnitOfWork::new(1, "", "");
        uow.add_external(Box::new(Selection {
            log: log.clone(),
            redoable: false,
        }))
        .unwrap();
        committed(&mut uow);
        uow.undo(&ctx).unwrap();
        assert!(matches!(uow.redo(&ctx), Err(UowError::NotRedoable(1))));
    }

    #[test]
    fn non_data_actions_run_after_notifications() {
        struct Ordered(Arc<Mutex<Vec<&'static str>>>);
        impl ChangeNotifier for Ordered {
            fn prop_changed(&self, _change: &PropChange) -> Result<(), NotifyError> {
                self.0.lock().unwrap().push("notify");
                Ok(())
            }
        }

        let map = map();
        let fields = FieldRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let notifier = Ordered(log.clone());
        let ctx = UndoContext::new(&map, &notifier, &fields);
        let obj = map.create_object(NOTE).unwrap();

        let mut uow = UnitOfWork::new(1, "", "");
        uow.add_external(Box::new(Selection {
            log: log.clone(),
            redoable: true,
        }))
        .unwrap();
        uow.set_field(&obj, TITLE, FieldValue::Int(3)).unwrap();
        committed(&mut uow);

        uow.undo(&ctx).unwrap();
        uow.redo(&ctx).unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["notify", "undo selection", "notify", "redo selection"]
        );
    }

    #[test]
    fn undo_notifications_swap_counts() {
        let map = map();
        let fields = FieldRegistry::new();
        let recorder = Recorder::default();
        let ctx = UndoContext::new(&map, &recorder, &fields);
        let obj = map.create_object(NOTE).unwrap();
        let a = map.new_id();
        let b = map.new_id();

        let mut uow = UnitOfWork::new(1, "", "");
        uow.set_field(&obj, TARGET, FieldValue::RefSeq(vec![a, b])).unwrap();
        committed(&mut uow);
        uow.undo(&ctx).unwrap();
        uow.redo(&ctx).unwrap();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!((seen[0].inserted, seen[0].deleted), (0, 2));
        assert_eq!((seen[1].inserted, seen[1].deleted), (2, 0));
    }

    #[test]
    fn notification_failure_downgrades_to_refresh() {
        let map = map();
        let fields = FieldRegistry::new();
        let ctx = UndoContext::new(&map, &Failing, &fields);
        let obj = map.create_object(NOTE).unwrap();

        let mut uow = UnitOfWork::new(1, "", "");
        uow.set_field(&obj, TITLE, FieldValue::Int(9)).unwrap();
        committed(&mut uow);

        assert_eq!(uow.undo(&ctx).unwrap(), UndoOutcome::RefreshRequired);
        assert_eq!(obj.field(TITLE), FieldValue::Null);
        assert_eq!(uow.state(), UowState::Undone);
    }

    #[test]
    fn field_definition_changes_reverse() {
        let map = map();
        let fields = FieldRegistry::new();
        let ctx = UndoContext::new(&map, &NullNotifier, &fields);
        let first = FieldSpec::new("gloss", FieldKind::String);
        let second = FieldSpec::new("gloss", FieldKind::MultiString);

        let mut uow = UnitOfWork::new(1, "", "");
        uow.change_field_definition(&fields, NOTE, FieldId(50), Some(first))
            .unwrap();
        uow.change_field_definition(&fields, NOTE, FieldId(50), Some(second.clone()))
            .unwrap();
        assert_eq!(uow.actions().len(), 1);
        committed(&mut uow);

        uow.undo(&ctx).unwrap();
        assert_eq!(fields.get(NOTE, FieldId(50)), None);
        uow.redo(&ctx).unwrap();
        assert_eq!(fields.get(NOTE, FieldId(50)), Some(second));
    }

    #[test]
    fn rollback_reverses_open_unit() {
        let map = map();
        let fields = FieldRegistry::new();
        let ctx = UndoContext::new(&map, &NullNotifier, &fields);
        let obj = map.create_object(NOTE).unwrap();

        let mut uow = UnitOfWork::new(1, "", "");
        let fresh = uow.create_object(&map, NOTE).unwrap();
        uow.set_field(&obj, TARGET, FieldValue::Ref(fresh.id().clone())).unwrap();
        uow.rollback(&ctx).unwrap();

        assert_eq!(uow.state(), UowState::RolledBack);
        assert!(!map.contains(fresh.guid()));
        assert_eq!(obj.field(TARGET), FieldValue::Null);
    }

    #[test]
    fn non_undoable_simulates_redo_once() {
        let map = map();
        let fields = FieldRegistry::new();
        let recorder = Recorder::default();
        let ctx = UndoContext::new(&map, &recorder, &fields);
        let obj = map.create_object(NOTE).unwrap();

        let mut uow = UnitOfWork::non_undoable(1);
        uow.set_field(&obj, TITLE, FieldValue::Int(4)).unwrap();
        committed(&mut uow);

        assert_eq!(uow.undo(&ctx).unwrap(), UndoOutcome::Completed);
        assert_eq!(obj.field(TITLE), FieldValue::Int(4));
        uow.redo(&ctx).unwrap();
        uow.redo(&ctx).unwrap();
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
        assert!(!uow.can_undo(&map));
    }

    // ----------------------------------------------------------------
    // Queries
    // ----------------------------------------------------------------

    #[test]
    fn affects_same_objects_iff_sets_intersect() {
        let map = map();
        let shared = map.create_object(NOTE).unwrap();
        let other = map.create_object(NOTE).unwrap();

        let mut a = UnitOfWork::new(1, "", "");
        a.set_field(&shared, TITLE, FieldValue::Int(1)).unwrap();
        let mut b = UnitOfWork::new(2, "", "");
        b.set_field(&other, TITLE, FieldValue::Int(1)).unwrap();
        assert!(!a.affects_same_objects(&b));
        assert!(!b.affects_same_objects(&a));

        b.delete_object(&map, &shared).unwrap();
        assert!(a.affects_same_objects(&b));
        assert!(b.affects_same_objects(&a));
    }

    #[test]
    fn insert_actions_from_prepends_and_merges() {
        let map = map();
        let obj = map.create_object(NOTE).unwrap();
        obj.set_field(TITLE, FieldValue::Int(0));

        let mut side_effect = UnitOfWork::new(1, "", "");
        let fresh = side_effect.create_object(&map, NOTE).unwrap();
        side_effect.set_field(&obj, TITLE, FieldValue::Int(1)).unwrap();

        let mut visible = UnitOfWork::new(2, "Undo", "Redo");
        visible.set_field(&obj, TITLE, FieldValue::Int(2)).unwrap();
        visible.set_field(&fresh, TITLE, FieldValue::Int(5)).unwrap();
        visible.insert_actions_from(side_effect);

        assert_eq!(visible.actions().len(), 3);
        assert!(matches!(&visible.actions()[0], Action::Create(o) if o.guid() == fresh.guid()));
        match &visible.actions()[1] {
            Action::Property(change) => {
                assert_eq!(change.before, FieldValue::Int(0));
                assert_eq!(change.after, FieldValue::Int(2));
            }
            other => panic!("unexpected action {other:?}"),
        }
        assert!(visible.created().contains(&fresh.guid()));
        assert!(!visible.modified().contains(&fresh.guid()));
        assert!(visible.modified().contains(&obj.guid()));
    }
}
