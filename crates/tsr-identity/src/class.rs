//! Class metadata: class-id ↔ name, subclass enumeration, and the registry
//! of constructor functions used when materializing objects.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{PoisonError, RwLock};

use tsr_types::ClassId;

use crate::error::{IdentityError, IdentityResult};
use crate::object::Fields;

/// Builds the default field layout of a freshly constructed object.
pub type Constructor = fn() -> Fields;

/// Class-metadata service consumed by the identity map.
pub trait ClassMetadata: Send + Sync {
    /// Look up a class by name.
    fn class_id(&self, name: &str) -> Option<ClassId>;

    /// Name of a class.
    fn class_name(&self, class: ClassId) -> Option<String>;

    /// Classes that name `class` as their immediate superclass.
    fn direct_subclasses(&self, class: ClassId) -> Vec<ClassId>;

    /// Default fields of a new instance, or `None` for an unknown class.
    fn construct(&self, class: ClassId) -> Option<Fields>;

    /// `class` plus every transitive subclass, in breadth-first order.
    fn closure(&self, class: ClassId) -> Vec<ClassId> {
        let mut seen = BTreeSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([class]);
        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                order.push(next);
                queue.extend(self.direct_subclasses(next));
            }
        }
        order
    }
}

/// Definition of one class registered in a [`ClassCatalog`].
#[derive(Clone, Debug)]
pub struct ClassDef {
    pub id: ClassId,
    pub name: String,
    pub superclass: Option<ClassId>,
    pub constructor: Constructor,
}

impl ClassDef {
    pub fn new(id: ClassId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            superclass: None,
            constructor: Fields::new,
        }
    }

    pub fn with_superclass(mut self, superclass: ClassId) -> Self {
        self.superclass = Some(superclass);
        self
    }

    pub fn with_constructor(mut self, constructor: Constructor) -> Self {
        self.constructor = constructor;
        self
    }
}

#[derive(Default)]
struct CatalogState {
    classes: HashMap<ClassId, ClassDef>,
    by_name: HashMap<String, ClassId>,
    subclasses: HashMap<ClassId, Vec<ClassId>>,
}

/// In-memory class registry mapping each class id to its constructor.
///
/// Intended for tests and embedding; a real deployment would back
/// [`ClassMetadata`] with its schema service.
#[derive(Default)]
pub struct ClassCatalog {
    state: RwLock<CatalogState>,
}

impl ClassCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class. Superclasses must be registered first.
    pub fn register(&self, def: ClassDef) -> IdentityResult<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = def.superclass {
            if !state.classes.contains_key(&parent) {
                return Err(IdentityError::UnknownClass(parent));
            }
            state.subclasses.entry(parent).or_default().push(def.id);
        }
        state.by_name.insert(def.name.clone(), def.id);
        state.classes.insert(def.id, def);
        Ok(())
    }

    /// Number of registered classes.
    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .classes
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ClassMetadata for ClassCatalog {
    fn class_id(&self, name: &str) -> Option<ClassId> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.by_name.get(name).copied()
    }

    fn class_name(&self, class: ClassId) -> Option<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.classes.get(&class).map(|def| def.name.clone())
    }

    fn direct_subclasses(&self, class: ClassId) -> Vec<ClassId> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.subclasses.get(&class).cloned().unwrap_or_default()
    }

    fn construct(&self, class: ClassId) -> Option<Fields> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.classes.get(&class).map(|def| (def.constructor)())
    }
}

impl std::fmt::Debug for ClassCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassCatalog")
            .field("class_count", &self.len())
            .finish()
    }
}
