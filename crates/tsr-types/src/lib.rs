//! Foundation types for the Tessera object store.
//!
//! This crate provides the identity and structural types shared by every
//! other Tessera crate. It has no knowledge of how objects are stored,
//! materialized, or committed.
//!
//! # Key Types
//!
//! - [`Guid`] - 128-bit globally unique identifier of a persistent object
//! - [`ObjectId`] - canonical identity cell (guid plus optional [`Handle`])
//! - [`Handle`] - small process-local integer for O(1) lookup
//! - [`ClassId`] / [`FieldId`] - class-metadata discriminants
//! - [`ObjectPayload`] - one serialized object (class + encoded fields)

pub mod error;
pub mod guid;
pub mod id;
pub mod meta;
pub mod payload;

pub use error::TypeError;
pub use guid::Guid;
pub use id::ObjectId;
pub use meta::{ClassId, FieldId, Handle};
pub use payload::ObjectPayload;
