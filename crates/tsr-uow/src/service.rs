use tracing::{debug, warn};

use crate::action::UndoContext;
use crate::changes::ChangeSet;
use crate::error::{UowError, UowResult};
use crate::sequence::SequenceService;
use crate::stack::UndoStack;
use crate::unit::{UndoOutcome, UnitOfWork, UowKind};

/// Owns the open unit of work, the undo history, and the pending change
/// set that the next publish will send out.
#[derive(Debug)]
pub struct UnitOfWorkService {
    sequence: SequenceService,
    current: Option<UnitOfWork>,
    stack: UndoStack,
    pending: ChangeSet,
}

impl UnitOfWorkService {
    pub fn new(sequence: SequenceService, undo_depth: usize) -> Self {
        Self {
            sequence,
            current: None,
            stack: UndoStack::new(undo_depth),
            pending: ChangeSet::new(),
        }
    }

    pub fn sequence(&self) -> &SequenceService {
        &self.sequence
    }

    pub fn stack(&self) -> &UndoStack {
        &self.stack
    }

    fn ensure_closed(&self) -> UowResult<()> {
        match &self.current {
            Some(open) => Err(UowError::AlreadyOpen(open.seq())),
            None => Ok(()),
        }
    }

    /// Open an undoable unit of work.
    pub fn begin(&mut self, undo_text: &str, redo_text: &str) -> UowResult<u64> {
        self.ensure_closed()?;
        let uow = UnitOfWork::new(self.sequence.next(), undo_text, redo_text);
        let seq = uow.seq();
        self.current = Some(uow);
        Ok(seq)
    }

    /// Open a unit for externally sourced changes.
    pub fn begin_non_undoable(&mut self) -> UowResult<u64> {
        self.ensure_closed()?;
        let uow = UnitOfWork::non_undoable(self.sequence.next());
        let seq = uow.seq();
        self.current = Some(uow);
        Ok(seq)
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    pub fn current(&self) -> Option<&UnitOfWork> {
        self.current.as_ref()
    }

    pub fn current_mut(&mut self) -> UowResult<&mut UnitOfWork> {
        self.current.as_mut().ok_or(UowError::NoOpenUnit)
    }

    /// Commit the open unit, add it to the pending change set and, if it is
    /// undoable and not empty, to the undo history.
    pub fn commit(&mut self) -> UowResult<u64> {
        let mut uow = self.current.take().ok_or(UowError::NoOpenUnit)?;
        uow.commit()?;
        self.pending.absorb_commit(&uow);
        let seq = uow.seq();
        if uow.kind() == UowKind::Undoable && !uow.is_empty() {
            self.stack.push(uow);
        }
        Ok(seq)
    }

    /// Reverse and discard the open unit.
    pub fn rollback(&mut self, ctx: &UndoContext<'_>) -> UowResult<()> {
        let mut uow = self.current.take().ok_or(UowError::NoOpenUnit)?;
        uow.rollback(ctx)
    }

    pub fn can_undo(&self, ctx: &UndoContext<'_>) -> bool {
        self.current.is_none()
            && self
                .stack
                .peek_undo()
                .is_some_and(|uow| uow.can_undo(ctx.map))
    }

    pub fn can_redo(&self, ctx: &UndoContext<'_>) -> bool {
        self.current.is_none()
            && self
                .stack
                .peek_redo()
                .is_some_and(|uow| uow.can_redo(ctx.map))
    }

    pub fn undo_text(&self) -> Option<&str> {
        self.stack.peek_undo().map(UnitOfWork::undo_text)
    }

    pub fn redo_text(&self) -> Option<&str> {
        self.stack.peek_redo().map(UnitOfWork::redo_text)
    }

    /// Undo the most recent unit. A refused or failed undo leaves it on the
    /// stack.
    pub fn undo(&mut self, ctx: &UndoContext<'_>) -> UowResult<UndoOutcome> {
        self.ensure_closed()?;
        let mut uow = self.stack.pop_undo().ok_or(UowError::EmptyStack("undo"))?;
        if let Err(e) = uow.check_undo(ctx.map) {
            self.stack.restore_undo(uow);
            return Err(e);
        }
        let outcome = match uow.undo(ctx) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(seq = uow.seq(), error = %e, "undo failed, unit kept on the stack");
                self.stack.restore_undo(uow);
                return Err(e);
            }
        };
        self.pending.absorb_undo(&uow);
        self.stack.push_undone(uow);
        Ok(outcome)
    }

    /// Redo the most recently undone unit. A refused or failed redo leaves
    /// it on the stack.
    pub fn redo(&mut self, ctx: &UndoContext<'_>) -> UowResult<UndoOutcome> {
        self.ensure_closed()?;
        let mut uow = self.stack.pop_redo().ok_or(UowError::EmptyStack("redo"))?;
        if let Err(e) = uow.check_redo(ctx.map) {
            self.stack.restore_redo(uow);
            return Err(e);
        }
        let outcome = match uow.redo(ctx) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(seq = uow.seq(), error = %e, "redo failed, unit kept on the stack");
                self.stack.restore_redo(uow);
                return Err(e);
            }
        };
        self.pending.absorb_commit(&uow);
        self.stack.push_redone(uow);
        Ok(outcome)
    }

    /// Finish a unit holding merged foreign changes: replay its
    /// notifications once and drop local history it invalidates.
    ///
    /// Foreign changes were already published by their writer, so they do
    /// not enter the pending change set.
    pub fn commit_foreign(&mut self, ctx: &UndoContext<'_>) -> UowResult<UndoOutcome> {
        let mut uow = self.current.take().ok_or(UowError::NoOpenUnit)?;
        uow.commit()?;
        let outcome = uow.redo(ctx)?;
        let dropped = self.stack.absorb_foreign(&uow.all_ids());
        debug!(seq = uow.seq(), touched = uow.all_ids().len(), dropped, "absorbed foreign changes");
        Ok(outcome)
    }

    pub fn pending(&self) -> &ChangeSet {
        &self.pending
    }

    /// Take the pending change set for publishing.
    pub fn take_pending(&mut self) -> ChangeSet {
        std::mem::take(&mut self.pending)
    }

    /// Put back a change set whose publish failed, ahead of anything
    /// recorded since.
    pub fn restore_pending(&mut self, mut earlier: ChangeSet) {
        earlier.merge(std::mem::take(&mut self.pending));
        self.pending = earlier;
    }

    /// Drop all history and pending changes (after a bulk reload).
    pub fn reset(&mut self) {
        self.current = None;
        self.stack.clear();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use super::*;
    use crate::action::ExternalAction;
    use crate::fields::FieldRegistry;
    use crate::notify::NullNotifier;
    use tsr_identity::{ClassCatalog, ClassDef, FieldValue, IdentityMap};
    use tsr_types::{ClassId, FieldId};

    const NOTE: ClassId = ClassId(1);

    fn map() -> IdentityMap {
        let catalog = ClassCatalog::new();
        catalog.register(ClassDef::new(NOTE, "Note")).unwrap();
        IdentityMap::new(Arc::new(catalog))
    }

    fn service() -> UnitOfWorkService {
        UnitOfWorkService::new(SequenceService::new(), 10)
    }

    #[test]
    fn begin_twice_is_rejected() {
        let mut svc = service();
        let seq = svc.begin("Undo", "Redo").unwrap();
        assert!(matches!(svc.begin("", ""), Err(UowError::AlreadyOpen(s)) if s == seq));
        assert!(matches!(svc.begin_non_undoable(), Err(UowError::AlreadyOpen(_))));
    }

    #[test]
    fn commit_without_open_unit_fails() {
        let mut svc = service();
        assert!(matches!(svc.commit(), Err(UowError::NoOpenUnit)));
    }

    #[test]
    fn commit_feeds_pending_and_history() {
        let map = map();
        let mut svc = service();
        svc.begin("Undo create", "Redo create").unwrap();
        let obj = svc.current_mut().unwrap().create_object(&map, NOTE).unwrap();
        svc.commit().unwrap();

        assert!(svc.pending().created().contains(&obj.guid()));
        assert_eq!(svc.undo_text(), Some("Undo create"));

        let published = svc.take_pending();
        assert_eq!(published.len(), 1);
        assert!(svc.pending().is_empty());
    }

    #[test]
    fn empty_unit_is_not_undoable() {
        let mut svc = service();
        svc.begin("", "").unwrap();
        svc.commit().unwrap();
        assert!(!svc.stack().can_undo());
    }

    #[test]
    fn undo_and_redo_round_trip_through_pending() {
        let map = map();
        let fields = FieldRegistry::new();
        let ctx = UndoContext::new(&map, &NullNotifier, &fields);
        let mut svc = service();

        svc.begin("Undo", "Redo").unwrap();
        let obj = svc.current_mut().unwrap().create_object(&map, NOTE).unwrap();
        svc.commit().unwrap();
        svc.take_pending();

        assert!(svc.can_undo(&ctx));
        svc.undo(&ctx).unwrap();
        assert!(svc.pending().deleted().contains(&obj.guid()));
        assert!(!map.contains(obj.guid()));

        assert!(svc.can_redo(&ctx));
        svc.redo(&ctx).unwrap();
        assert!(svc.pending().modified().contains(&obj.guid()));
        assert!(map.contains(obj.guid()));
    }

    #[test]
    fn refused_undo_stays_on_stack() {
        let map = map();
        let fields = FieldRegistry::new();
        let ctx = UndoContext::new(&map, &NullNotifier, &fields);
        let mut svc = service();

        svc.begin("", "").unwrap();
        let fresh = svc.current_mut().unwrap().create_object(&map, NOTE).unwrap();
        svc.commit().unwrap();

        let outsider = map.create_object(NOTE).unwrap();
        outsider.set_field(FieldId(1), FieldValue::Ref(fresh.id().clone()));

        assert!(matches!(
            svc.undo(&ctx),
            Err(UowError::ReferentialIntegrity { .. })
        ));
        assert_eq!(svc.stack().undo_len(), 1);
        assert!(map.contains(fresh.guid()));
    }

    /// Fails the first `failures` calls in each direction.
    #[derive(Debug)]
    struct Flaky {
        failures: u32,
        undo_calls: u32,
        redo_calls: u32,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                undo_calls: 0,
                redo_calls: 0,
            }
        }
    }

    impl ExternalAction for Flaky {
        fn undo(&mut self) -> UowResult<()> {
            self.undo_calls += 1;
            if self.undo_calls <= self.failures {
                return Err(UowError::External("view busy".into()));
            }
            Ok(())
        }

        fn redo(&mut self) -> UowResult<()> {
            self.redo_calls += 1;
            if self.redo_calls <= self.failures {
                return Err(UowError::External("view busy".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn failed_undo_and_redo_keep_the_unit() {
        let map = map();
        let fields = FieldRegistry::new();
        let ctx = UndoContext::new(&map, &NullNotifier, &fields);
        let mut svc = service();

        svc.begin("Undo select", "Redo select").unwrap();
        svc.current_mut()
            .unwrap()
            .add_external(Box::new(Flaky::new(1)))
            .unwrap();
        svc.commit().unwrap();
        svc.take_pending();

        assert!(matches!(svc.undo(&ctx), Err(UowError::External(_))));
        assert_eq!(svc.stack().undo_len(), 1);
        assert_eq!(svc.undo_text(), Some("Undo select"));
        svc.undo(&ctx).unwrap();
        assert_eq!(svc.stack().undo_len(), 0);

        assert!(matches!(svc.redo(&ctx), Err(UowError::External(_))));
        assert_eq!(svc.stack().redo_len(), 1);
        svc.redo(&ctx).unwrap();
        assert_eq!(svc.stack().undo_len(), 1);
        assert_eq!(svc.stack().redo_len(), 0);
    }

    #[test]
    fn foreign_unit_invalidates_overlapping_history() {
        let map = map();
        let fields = FieldRegistry::new();
        let ctx = UndoContext::new(&map, &NullNotifier, &fields);
        let mut svc = service();
        let obj = map.create_object(NOTE).unwrap();

        svc.begin("", "").unwrap();
        svc.current_mut()
            .unwrap()
            .set_field(&obj, FieldId(1), FieldValue::Int(1))
            .unwrap();
        svc.commit().unwrap();
        svc.take_pending();

        svc.begin_non_undoable().unwrap();
        svc.current_mut()
            .unwrap()
            .set_field(&obj, FieldId(1), FieldValue::Int(2))
            .unwrap();
        svc.commit_foreign(&ctx).unwrap();

        assert!(!svc.stack().can_undo());
        assert!(svc.pending().is_empty());
    }

    #[test]
    fn restore_pending_keeps_order() {
        let mut svc = service();
        let guid = tsr_types::Guid::new();
        let mut earlier = ChangeSet::new();
        earlier.note_created(guid);
        svc.restore_pending(earlier);
        assert_eq!(svc.pending().created(), &BTreeSet::from([guid]));
    }
}
