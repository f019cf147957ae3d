use std::collections::BTreeSet;

use tracing::debug;
use tsr_types::Guid;

use crate::unit::UnitOfWork;

/// Default number of undoable units kept.
pub const DEFAULT_UNDO_DEPTH: usize = 100;

/// LIFO undo and redo stacks of committed units.
///
/// The top of each stack is the end of its vector.
#[derive(Debug)]
pub struct UndoStack {
    undo: Vec<UnitOfWork>,
    redo: Vec<UnitOfWork>,
    depth: usize,
}

impl UndoStack {
    pub fn new(depth: usize) -> Self {
        Self {
            undo: Vec::new(),
            redo: Vec::new(),
            depth: depth.max(1),
        }
    }

    /// Push a newly committed unit. Invalidates everything redoable.
    pub fn push(&mut self, uow: UnitOfWork) {
        self.redo.clear();
        self.push_undoable(uow);
    }

    fn push_undoable(&mut self, uow: UnitOfWork) {
        self.undo.push(uow);
        if self.undo.len() > self.depth {
            let dropped = self.undo.remove(0);
            debug!(seq = dropped.seq(), depth = self.depth, "undo history trimmed");
        }
    }

    pub fn peek_undo(&self) -> Option<&UnitOfWork> {
        self.undo.last()
    }

    pub fn peek_redo(&self) -> Option<&UnitOfWork> {
        self.redo.last()
    }

    pub fn pop_undo(&mut self) -> Option<UnitOfWork> {
        self.undo.pop()
    }

    pub fn pop_redo(&mut self) -> Option<UnitOfWork> {
        self.redo.pop()
    }

    /// Put back a unit whose undo was refused or failed.
    pub fn restore_undo(&mut self, uow: UnitOfWork) {
        self.undo.push(uow);
    }

    /// Put back a unit whose redo was refused or failed.
    pub fn restore_redo(&mut self, uow: UnitOfWork) {
        self.redo.push(uow);
    }

    /// Record a unit that was just undone.
    pub fn push_undone(&mut self, uow: UnitOfWork) {
        self.redo.push(uow);
    }

    /// Record a unit that was just redone.
    pub fn push_redone(&mut self, uow: UnitOfWork) {
        self.push_undoable(uow);
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// Discard history invalidated by foreign changes to `ids`.
    ///
    /// The topmost entry touching any of `ids` is dropped together with
    /// every entry beneath it, on both stacks, since those entries can no
    /// longer be reversed in order. Returns how many units were dropped.
    pub fn absorb_foreign(&mut self, ids: &BTreeSet<Guid>) -> usize {
        let before = self.undo.len() + self.redo.len();
        for stack in [&mut self.undo, &mut self.redo] {
            if let Some(top) = stack.iter().rposition(|uow| uow.touches(ids)) {
                stack.drain(..=top);
            }
        }
        let dropped = before - self.undo.len() - self.redo.len();
        if dropped > 0 {
            debug!(dropped, "undo history invalidated by foreign changes");
        }
        dropped
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}

impl Default for UndoStack {
    fn default() -> Self {
        Self::new(DEFAULT_UNDO_DEPTH)
    }
}
