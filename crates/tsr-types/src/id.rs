use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::guid::Guid;
use crate::meta::Handle;

struct IdCell {
    guid: Guid,
    /// 0 = no handle assigned yet.
    handle: AtomicU32,
}

/// Canonical identity of a persistent object within one store instance.
///
/// An `ObjectId` is a cheap, clonable reference to a shared identity cell.
/// Equality, hashing and ordering follow the guid alone, so two ids built
/// for the same guid compare equal even if they are different cells; the
/// identity map guarantees that only one cell per guid is ever handed out,
/// which [`same_instance`](Self::same_instance) can verify.
///
/// A handle may be attached once; afterwards it never changes for the
/// lifetime of the cell.
#[derive(Clone)]
pub struct ObjectId(Arc<IdCell>);

impl ObjectId {
    /// Create a fresh identity cell for `guid`.
    ///
    /// Application code should obtain ids from the identity map instead;
    /// a cell created here is not canonical until the map adopts it.
    pub fn new(guid: Guid) -> Self {
        Self(Arc::new(IdCell {
            guid,
            handle: AtomicU32::new(0),
        }))
    }

    /// The persistent guid.
    pub fn guid(&self) -> Guid {
        self.0.guid
    }

    /// The process-local handle, if one has been assigned.
    pub fn handle(&self) -> Option<Handle> {
        Handle::new(self.0.handle.load(AtomicOrdering::Acquire)).ok()
    }

    /// Attach `handle` if none is set yet.
    ///
    /// Returns the handle that is attached after the call, which is the
    /// existing one when the cell already had a handle.
    pub fn attach_handle(&self, handle: Handle) -> Handle {
        match self.0.handle.compare_exchange(
            0,
            handle.get(),
            AtomicOrdering::AcqRel,
            AtomicOrdering::Acquire,
        ) {
            Ok(_) => handle,
            // Existing values are always non-zero.
            Err(existing) => Handle::new(existing).unwrap_or(handle),
        }
    }

    /// Returns `true` if both ids are the very same identity cell.
    pub fn same_instance(&self, other: &ObjectId) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for ObjectId {
    fn eq(&self, other: &Self) -> bool {
        self.0.guid == other.0.guid
    }
}

impl Eq for ObjectId {}

impl Hash for ObjectId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.guid.hash(state);
    }
}

impl PartialOrd for ObjectId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ObjectId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.guid.cmp(&other.0.guid)
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.guid.serialize(serializer)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.handle() {
            Some(h) => write!(f, "ObjectId({} {})", self.0.guid.short_id(), h),
            None => write!(f, "ObjectId({})", self.0.guid.short_id()),
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.guid)
    }
}
