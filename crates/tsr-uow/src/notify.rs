use tsr_types::{FieldId, Guid};

/// One property-change notification.
///
/// `inserted` and `deleted` count the elements added to and removed from
/// the field; undo reports them swapped relative to the forward change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropChange {
    pub object: Guid,
    pub field: FieldId,
    pub alternative: Option<u32>,
    pub inserted: usize,
    pub deleted: usize,
}

#[derive(Debug, thiserror::Error)]
#[error("change notification failed: {0}")]
pub struct NotifyError(pub String);

/// Receiver of change notifications (typically the UI layer).
pub trait ChangeNotifier: Send + Sync {
    fn prop_changed(&self, change: &PropChange) -> Result<(), NotifyError>;
}

/// Notifier that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullNotifier;

impl ChangeNotifier for NullNotifier {
    fn prop_changed(&self, _change: &PropChange) -> Result<(), NotifyError> {
        Ok(())
    }
}
