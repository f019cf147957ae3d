//! Identity map for the Tessera object store.
//!
//! The map guarantees exactly one in-memory representative per persistent
//! object. Every guid resolves to one canonical [`ObjectId`](tsr_types::ObjectId)
//! and one [`Entry`], which moves one way through three states:
//!
//! - [`Entry::IdOnly`] -- the identity is known, nothing else
//! - [`Entry::Surrogate`] -- the encoded payload is known ([`Surrogate`])
//! - [`Entry::Live`] -- the object is materialized ([`ModelObject`])
//!
//! Materializing ("fluffing") a surrogate decodes its payload through a
//! [`PayloadCodec`] and builds the object from the constructor registered
//! with the [`ClassMetadata`] service. Decoding canonicalizes every
//! referenced guid, so it runs outside the map's lock and the result is
//! installed with a second, double-checked acquisition.
//!
//! # Design Rules
//!
//! 1. One canonical id per guid per map; `canonical_id` is idempotent.
//! 2. Handles start at 1 and are never reused within one map.
//! 3. References between objects are ids, never owning pointers.
//! 4. Unknown keys are consistency errors carrying the key and next handle.

pub mod class;
pub mod codec;
pub mod error;
pub mod map;
pub mod object;
pub mod surrogate;

// Re-export primary types at crate root for ergonomic imports.
pub use class::{ClassCatalog, ClassDef, ClassMetadata, Constructor};
pub use codec::{BincodeCodec, PayloadCodec};
pub use error::{IdentityError, IdentityResult};
pub use map::{AllInstances, Entry, EntryState, IdentityMap, ObjectKey};
pub use object::{FieldValue, Fields, ModelObject};
pub use surrogate::Surrogate;
