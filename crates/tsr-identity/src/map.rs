use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;
use tsr_types::{ClassId, Guid, Handle, ObjectId, ObjectPayload};

use crate::class::ClassMetadata;
use crate::codec::{BincodeCodec, PayloadCodec};
use crate::error::{IdentityError, IdentityResult};
use crate::object::{Fields, ModelObject};
use crate::surrogate::Surrogate;

/// What the map currently knows about one object.
#[derive(Clone, Debug)]
pub enum Entry {
    /// Only the identity is known; no data has been seen.
    IdOnly,
    /// Serialized form, materialized on demand.
    Surrogate(Arc<Surrogate>),
    /// Materialized object.
    Live(Arc<ModelObject>),
}

impl Entry {
    pub fn state(&self) -> EntryState {
        match self {
            Self::IdOnly => EntryState::IdOnly,
            Self::Surrogate(_) => EntryState::Surrogate,
            Self::Live(_) => EntryState::Live,
        }
    }

    fn class_id(&self) -> Option<ClassId> {
        match self {
            Self::IdOnly => None,
            Self::Surrogate(s) => Some(s.class_id()),
            Self::Live(o) => Some(o.class_id()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryState {
    IdOnly,
    Surrogate,
    Live,
}

/// Any of the three ways to address an object.
#[derive(Clone, Debug)]
pub enum ObjectKey {
    Handle(Handle),
    Guid(Guid),
    Id(ObjectId),
}

impl From<Handle> for ObjectKey {
    fn from(handle: Handle) -> Self {
        Self::Handle(handle)
    }
}

impl From<Guid> for ObjectKey {
    fn from(guid: Guid) -> Self {
        Self::Guid(guid)
    }
}

impl From<ObjectId> for ObjectKey {
    fn from(id: ObjectId) -> Self {
        Self::Id(id)
    }
}

impl From<&ObjectId> for ObjectKey {
    fn from(id: &ObjectId) -> Self {
        Self::Id(id.clone())
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handle(h) => write!(f, "handle {h}"),
            Self::Guid(g) => write!(f, "guid {g}"),
            Self::Id(id) => write!(f, "id {id}"),
        }
    }
}

struct Slot {
    id: ObjectId,
    entry: Entry,
}

struct MapState {
    slots: HashMap<Guid, Slot>,
    /// Indexed by `handle - 1`. Never shrinks; vacated handles become `None`.
    handles: Vec<Option<Guid>>,
    by_class: HashMap<ClassId, HashSet<Guid>>,
    /// Cells of unregistered objects, reused if the guid is seen again so a
    /// deleted object can come back under its own id.
    retired: HashMap<Guid, ObjectId>,
    next_handle: u32,
}

impl MapState {
    fn new() -> Self {
        Self {
            slots: HashMap::new(),
            handles: Vec::new(),
            by_class: HashMap::new(),
            retired: HashMap::new(),
            next_handle: Handle::FIRST.get(),
        }
    }

    /// The cell to use for a guid without a slot.
    fn revive_cell(&mut self, guid: Guid) -> ObjectId {
        self.retired
            .remove(&guid)
            .unwrap_or_else(|| ObjectId::new(guid))
    }

    fn not_found(&self, key: &ObjectKey) -> IdentityError {
        IdentityError::NotFound {
            key: key.to_string(),
            next_handle: self.next_handle,
        }
    }

    fn resolve(&self, key: &ObjectKey) -> IdentityResult<&Slot> {
        let guid = match key {
            ObjectKey::Handle(h) => match self.handles.get(h.index()).copied().flatten() {
                Some(guid) => guid,
                None => return Err(self.not_found(key)),
            },
            ObjectKey::Guid(g) => *g,
            ObjectKey::Id(id) => id.guid(),
        };
        match self.slots.get(&guid) {
            Some(slot) => Ok(slot),
            None if matches!(key, ObjectKey::Handle(_)) => Err(IdentityError::Consistency(
                format!("{key} maps to {guid} which has no entry"),
            )),
            None => Err(self.not_found(key)),
        }
    }

    /// Give `id` a handle unless it has one, and index it.
    fn assign_handle(&mut self, id: &ObjectId) -> Handle {
        let handle = match id.handle() {
            Some(existing) => existing,
            None => {
                // The counter starts at 1 and only grows.
                let fresh = Handle::new(self.next_handle).unwrap_or(Handle::FIRST);
                self.next_handle += 1;
                let attached = id.attach_handle(fresh);
                debug!(handle = attached.get(), guid = %id.guid().short_id(), "assigned handle");
                attached
            }
        };
        let index = handle.index();
        if index >= self.handles.len() {
            self.handles.resize(index + 1, None);
        }
        self.handles[index] = Some(id.guid());
        if handle.get() >= self.next_handle {
            self.next_handle = handle.get() + 1;
        }
        handle
    }

    fn index_class(&mut self, guid: Guid, class: ClassId) {
        self.by_class.entry(class).or_default().insert(guid);
    }

    /// Install `entry` for `id`, checking that `id` is the canonical cell.
    fn install(&mut self, id: &ObjectId, entry: Entry) -> IdentityResult<()> {
        let guid = id.guid();
        if let Some(slot) = self.slots.get(&guid) {
            if !matches!(slot.entry, Entry::IdOnly) {
                return Err(IdentityError::AlreadyRegistered(guid));
            }
            if !slot.id.same_instance(id) {
                return Err(IdentityError::DuplicateIdentity(guid));
            }
        }
        self.retired.remove(&guid);
        if let Some(class) = entry.class_id() {
            self.index_class(guid, class);
        }
        self.assign_handle(id);
        self.slots.insert(
            guid,
            Slot {
                id: id.clone(),
                entry,
            },
        );
        Ok(())
    }
}

/// The single source of truth mapping identity to materialized state.
///
/// All index tables sit behind one mutex. Materialization decodes payloads
/// outside that mutex because decoding canonicalizes every referenced guid,
/// which re-enters the map.
pub struct IdentityMap {
    state: Mutex<MapState>,
    classes: Arc<dyn ClassMetadata>,
    codec: Arc<dyn PayloadCodec>,
}

impl IdentityMap {
    /// Create an empty map using the default bincode payload codec.
    pub fn new(classes: Arc<dyn ClassMetadata>) -> Self {
        Self::with_codec(classes, Arc::new(BincodeCodec))
    }

    pub fn with_codec(classes: Arc<dyn ClassMetadata>, codec: Arc<dyn PayloadCodec>) -> Self {
        Self {
            state: Mutex::new(MapState::new()),
            classes,
            codec,
        }
    }

    pub fn classes(&self) -> &Arc<dyn ClassMetadata> {
        &self.classes
    }

    pub fn codec(&self) -> &Arc<dyn PayloadCodec> {
        &self.codec
    }

    fn state(&self) -> MutexGuard<'_, MapState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    /// The one canonical id for `guid`, creating an id-only entry if the
    /// guid has never been seen.
    pub fn canonical_id(&self, guid: Guid) -> ObjectId {
        let mut state = self.state();
        if let Some(slot) = state.slots.get(&guid) {
            return slot.id.clone();
        }
        let id = state.revive_cell(guid);
        state.slots.insert(
            guid,
            Slot {
                id: id.clone(),
                entry: Entry::IdOnly,
            },
        );
        id
    }

    /// A canonical id for a brand-new guid.
    pub fn new_id(&self) -> ObjectId {
        self.canonical_id(Guid::new())
    }

    /// Handle for a known object, assigning one if needed. Works for id-only
    /// entries without materializing anything.
    pub fn handle_for(&self, id: &ObjectId) -> IdentityResult<Handle> {
        let mut state = self.state();
        let canonical = state.resolve(&ObjectKey::from(id))?.id.clone();
        Ok(state.assign_handle(&canonical))
    }

    /// The canonical id behind any key, without materializing.
    pub fn id_of(&self, key: impl Into<ObjectKey>) -> IdentityResult<ObjectId> {
        let key = key.into();
        let id = self.state().resolve(&key)?.id.clone();
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// The live object for `key`, fluffing its surrogate if necessary.
    ///
    /// Fails with [`IdentityError::NotFound`] when the key is unknown or
    /// known only as an id.
    pub fn get(&self, key: impl Into<ObjectKey>) -> IdentityResult<Arc<ModelObject>> {
        let key = key.into();
        let surrogate = {
            let state = self.state();
            let slot = state.resolve(&key)?;
            match &slot.entry {
                Entry::Live(obj) => return Ok(obj.clone()),
                Entry::Surrogate(s) => s.clone(),
                Entry::IdOnly => return Err(state.not_found(&key)),
            }
        };
        self.fluff(&surrogate)
    }

    /// Like [`get`](Self::get), but an unknown or id-only key is `Ok(None)`.
    pub fn try_get(&self, key: impl Into<ObjectKey>) -> IdentityResult<Option<Arc<ModelObject>>> {
        let key = key.into();
        let surrogate = {
            let state = self.state();
            let Ok(slot) = state.resolve(&key) else {
                return Ok(None);
            };
            match &slot.entry {
                Entry::Live(obj) => return Ok(Some(obj.clone())),
                Entry::Surrogate(s) => s.clone(),
                Entry::IdOnly => return Ok(None),
            }
        };
        self.fluff(&surrogate).map(Some)
    }

    pub fn contains(&self, guid: Guid) -> bool {
        self.state().slots.contains_key(&guid)
    }

    pub fn entry_state(&self, key: impl Into<ObjectKey>) -> Option<EntryState> {
        let key = key.into();
        let state = self.state();
        state.resolve(&key).ok().map(|slot| slot.entry.state())
    }

    /// Materialize `surrogate` and install the live object.
    fn fluff(&self, surrogate: &Arc<Surrogate>) -> IdentityResult<Arc<ModelObject>> {
        let object = match surrogate.object() {
            Some(obj) => obj,
            None => {
                let class = surrogate.class_id();
                let mut fields = self
                    .classes
                    .construct(class)
                    .ok_or(IdentityError::UnknownClass(class))?;
                fields.extend(self.decode_fields(surrogate.payload())?);
                let fresh = Arc::new(ModelObject::new(surrogate.id().clone(), class, fields));
                surrogate.install(fresh)
            }
        };

        let guid = surrogate.id().guid();
        let mut state = self.state();
        if let Some(slot) = state.slots.get_mut(&guid) {
            if matches!(&slot.entry, Entry::Surrogate(current) if Arc::ptr_eq(current, surrogate)) {
                slot.entry = Entry::Live(object.clone());
                debug!(guid = %guid.short_id(), class = %object.class_id(), "fluffed object");
            }
        }
        Ok(object)
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register a not-yet-materialized surrogate.
    pub fn register_inactive_surrogate(&self, surrogate: Arc<Surrogate>) -> IdentityResult<()> {
        let guid = surrogate.id().guid();
        if surrogate.has_object() {
            return Err(IdentityError::AlreadyMaterialized(guid));
        }
        let id = surrogate.id().clone();
        self.state().install(&id, Entry::Surrogate(surrogate))
    }

    /// Register a serialized object under its canonical id.
    pub fn register_payload(&self, payload: ObjectPayload) -> IdentityResult<ObjectId> {
        let id = self.canonical_id(payload.guid);
        let surrogate = Surrogate::new(id.clone(), payload.class, payload.data);
        self.register_inactive_surrogate(Arc::new(surrogate))?;
        Ok(id)
    }

    /// Replace the data of an object that has not been materialized.
    ///
    /// Unknown and id-only guids are registered as new surrogates. A live
    /// object must be updated through its fields instead.
    pub fn replace_surrogate(&self, payload: ObjectPayload) -> IdentityResult<ObjectId> {
        let guid = payload.guid;
        let mut state = self.state();
        let (id, old_class) = match state.slots.get(&guid) {
            Some(slot) => match &slot.entry {
                Entry::Live(_) => return Err(IdentityError::AlreadyMaterialized(guid)),
                Entry::Surrogate(old) => (slot.id.clone(), Some(old.class_id())),
                Entry::IdOnly => (slot.id.clone(), None),
            },
            None => (state.revive_cell(guid), None),
        };
        if let Some(set) = old_class.and_then(|class| state.by_class.get_mut(&class)) {
            set.remove(&guid);
        }
        let surrogate = Arc::new(Surrogate::new(id.clone(), payload.class, payload.data));
        state.index_class(guid, payload.class);
        state.assign_handle(&id);
        state.slots.insert(
            guid,
            Slot {
                id: id.clone(),
                entry: Entry::Surrogate(surrogate),
            },
        );
        Ok(id)
    }

    /// Swap a registered surrogate for its materialized object.
    pub fn register_activated_surrogate(&self, surrogate: &Arc<Surrogate>) -> IdentityResult<()> {
        let guid = surrogate.id().guid();
        let object = surrogate
            .object()
            .ok_or(IdentityError::NotMaterialized(guid))?;
        let mut state = self.state();
        let slot = state
            .slots
            .get_mut(&guid)
            .ok_or(IdentityError::NotRegistered(guid))?;
        if !matches!(&slot.entry, Entry::Surrogate(current) if Arc::ptr_eq(current, surrogate)) {
            return Err(IdentityError::NotRegistered(guid));
        }
        slot.entry = Entry::Live(object);
        debug!(guid = %guid.short_id(), "activated surrogate");
        Ok(())
    }

    /// Register a brand-new live object, assigning a handle if it has none.
    pub fn register_created(&self, object: Arc<ModelObject>) -> IdentityResult<Handle> {
        let id = object.id().clone();
        let mut state = self.state();
        state.install(&id, Entry::Live(object))?;
        Ok(state.assign_handle(&id))
    }

    /// Construct and register a new instance of `class` with its default
    /// field values.
    pub fn create_object(&self, class: ClassId) -> IdentityResult<Arc<ModelObject>> {
        let fields = self
            .classes
            .construct(class)
            .ok_or(IdentityError::UnknownClass(class))?;
        let object = Arc::new(ModelObject::new(self.new_id(), class, fields));
        self.register_created(object.clone())?;
        Ok(object)
    }

    /// Remove an object from every index, returning what was known about it.
    pub fn unregister(&self, id: &ObjectId) -> IdentityResult<Entry> {
        let key = ObjectKey::from(id);
        let mut state = self.state();
        let guid = id.guid();
        let Some(slot) = state.slots.remove(&guid) else {
            return Err(state.not_found(&key));
        };
        if let Some(class) = slot.entry.class_id() {
            if let Some(set) = state.by_class.get_mut(&class) {
                set.remove(&guid);
            }
        }
        if let Some(handle) = slot.id.handle() {
            if let Some(cell) = state.handles.get_mut(handle.index()) {
                *cell = None;
            }
        }
        state.retired.insert(guid, slot.id.clone());
        debug!(guid = %guid.short_id(), "unregistered object");
        Ok(slot.entry)
    }

    /// Restore a previously unregistered live object.
    ///
    /// Re-registering the object that is already installed is a no-op.
    pub fn reregister(&self, object: &Arc<ModelObject>) -> IdentityResult<()> {
        let guid = object.guid();
        let mut state = self.state();
        if let Some(slot) = state.slots.get(&guid) {
            if let Entry::Live(current) = &slot.entry {
                if Arc::ptr_eq(current, object) {
                    return Ok(());
                }
            }
        }
        state.install(object.id(), Entry::Live(object.clone()))?;
        debug!(guid = %guid.short_id(), "reregistered object");
        Ok(())
    }

    /// Pre-size the tables before loading `additional` more entries.
    pub fn expect_additional_objects(&self, additional: usize) {
        let mut state = self.state();
        state.slots.reserve(additional);
        state.handles.reserve(additional);
    }

    /// Drop every entry. The handle counter keeps counting so that handles
    /// held by ids from before the reload stay unique.
    pub fn clear(&self) {
        let mut state = self.state();
        state.slots.clear();
        state.by_class.clear();
        state.retired.clear();
        state.handles.iter_mut().for_each(|h| *h = None);
        debug!(next_handle = state.next_handle, "cleared identity map");
    }

    // ------------------------------------------------------------------
    // Enumeration
    // ------------------------------------------------------------------

    /// Lazy sequence over every instance of `class` and its subclasses.
    ///
    /// The member list is captured when this is called; objects are
    /// materialized as the iterator reaches them. Call again to restart.
    pub fn all_instances_of(&self, class: ClassId) -> AllInstances<'_> {
        let guids: Vec<Guid> = self.instance_ids_of(class).iter().map(ObjectId::guid).collect();
        AllInstances {
            map: self,
            guids: guids.into_iter(),
        }
    }

    /// Ids of every instance of `class` and its subclasses, in handle order.
    pub fn instance_ids_of(&self, class: ClassId) -> Vec<ObjectId> {
        let closure = self.classes.closure(class);
        let state = self.state();
        let mut ids: Vec<ObjectId> = closure
            .iter()
            .filter_map(|c| state.by_class.get(c))
            .flatten()
            .filter_map(|guid| state.slots.get(guid).map(|slot| slot.id.clone()))
            .collect();
        ids.sort_by_key(|id| id.handle());
        ids
    }

    pub fn count(&self, class: ClassId) -> usize {
        let closure = self.classes.closure(class);
        let state = self.state();
        closure
            .iter()
            .filter_map(|c| state.by_class.get(c))
            .map(HashSet::len)
            .sum()
    }

    /// Every object whose fields reference `target`.
    ///
    /// Scans live objects and undecoded surrogate payloads; nothing is
    /// materialized.
    pub fn referrers_of(&self, target: &ObjectId) -> IdentityResult<Vec<ObjectId>> {
        let entries: Vec<(ObjectId, Entry)> = {
            let state = self.state();
            state
                .slots
                .values()
                .filter(|slot| !matches!(slot.entry, Entry::IdOnly))
                .map(|slot| (slot.id.clone(), slot.entry.clone()))
                .collect()
        };
        let guid = target.guid();
        let mut referrers = Vec::new();
        for (id, entry) in entries {
            let refers = match entry {
                Entry::Live(obj) => obj.refers_to(guid),
                Entry::Surrogate(s) => match s.object() {
                    Some(obj) => obj.refers_to(guid),
                    None => self.codec.referenced_guids(s.payload())?.contains(&guid),
                },
                Entry::IdOnly => false,
            };
            if refers {
                referrers.push(id);
            }
        }
        referrers.sort();
        Ok(referrers)
    }

    // ------------------------------------------------------------------
    // Payloads
    // ------------------------------------------------------------------

    /// Serialize a live object to its payload form.
    pub fn encode_object(&self, object: &ModelObject) -> IdentityResult<ObjectPayload> {
        let data = self.codec.encode(&object.fields())?;
        Ok(ObjectPayload::new(object.guid(), object.class_id(), data))
    }

    /// Decode field values, resolving every reference to its canonical id.
    pub fn decode_fields(&self, data: &[u8]) -> IdentityResult<Fields> {
        self.codec.decode(data, &mut |guid| self.canonical_id(guid))
    }

    /// Serialized form of whatever is registered for `id`.
    pub fn payload_of(&self, id: &ObjectId) -> IdentityResult<ObjectPayload> {
        let key = ObjectKey::from(id);
        let entry = self.state().resolve(&key)?.entry.clone();
        match entry {
            Entry::Live(obj) => self.encode_object(&obj),
            Entry::Surrogate(s) => match s.object() {
                Some(obj) => self.encode_object(&obj),
                None => Ok(s.to_payload()),
            },
            Entry::IdOnly => Err(self.state().not_found(&key)),
        }
    }

    // ------------------------------------------------------------------
    // Size
    // ------------------------------------------------------------------

    /// Number of entries, including id-only ones.
    pub fn len(&self) -> usize {
        self.state().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The handle the next assignment will use.
    pub fn next_handle(&self) -> u32 {
        self.state().next_handle
    }
}

impl fmt::Debug for IdentityMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("IdentityMap")
            .field("entries", &state.slots.len())
            .field("next_handle", &state.next_handle)
            .finish()
    }
}

/// Iterator returned by [`IdentityMap::all_instances_of`].
pub struct AllInstances<'a> {
    map: &'a IdentityMap,
    guids: std::vec::IntoIter<Guid>,
}

impl Iterator for AllInstances<'_> {
    type Item = IdentityResult<Arc<ModelObject>>;

    fn next(&mut self) -> Option<Self::Item> {
        for guid in self.guids.by_ref() {
            match self.map.try_get(guid) {
                Ok(Some(obj)) => return Some(Ok(obj)),
                // Removed since the member list was taken.
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.guids.len()))
    }
}
