use tsr_commitlog::{ForeignChanges, Reconciliation};
use tsr_uow::ChangeSet;

/// Decides whether foreign commits can be merged with unpublished local
/// changes.
pub trait Reconciler: Send + Sync {
    fn reconcile(&self, foreign: &ForeignChanges, local: &ChangeSet) -> Reconciliation;
}

/// Accepts foreign changes only when they touch none of the objects with
/// pending local edits.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisjointReconciler;

impl Reconciler for DisjointReconciler {
    fn reconcile(&self, foreign: &ForeignChanges, local: &ChangeSet) -> Reconciliation {
        let touched_locally = |guid: &tsr_types::Guid| {
            local.modified().contains(guid) || local.deleted().contains(guid)
        };
        let overlap = foreign
            .updated
            .keys()
            .chain(foreign.deleted.iter())
            .filter(|g| touched_locally(*g))
            .chain(foreign.added.keys().filter(|g| local.created().contains(*g)))
            .count();
        if overlap == 0 {
            Reconciliation::Accept
        } else {
            Reconciliation::Reject(format!(
                "{overlap} object(s) changed both locally and in generation <= {}",
                foreign.latest_generation
            ))
        }
    }
}

/// Accepts everything; later foreign payloads win.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAllReconciler;

impl Reconciler for AcceptAllReconciler {
    fn reconcile(&self, _foreign: &ForeignChanges, _local: &ChangeSet) -> Reconciliation {
        Reconciliation::Accept
    }
}
