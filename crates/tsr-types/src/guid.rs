use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Globally unique 128-bit identifier of a persistent object.
///
/// A `Guid` is stable across processes and sessions; it is what the commit
/// log and the durable store exchange. Inside one process the identity map
/// hands out exactly one [`ObjectId`](crate::ObjectId) per guid.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Guid(uuid::Uuid);

impl Guid {
    /// Generate a fresh random guid.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// The all-zero guid. Never assigned to a real object.
    pub const fn nil() -> Self {
        Self(uuid::Uuid::nil())
    }

    /// Returns `true` for the all-zero guid.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Build from the 16 raw bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(uuid::Uuid::from_bytes(bytes))
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    /// The 16 raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Compact 32-character lowercase hex form without hyphens.
    pub fn to_short_string(&self) -> String {
        self.0.simple().to_string()
    }

    /// Parse the compact form produced by [`to_short_string`](Self::to_short_string).
    ///
    /// The hyphenated form is accepted as well.
    pub fn from_short_string(s: &str) -> Result<Self, TypeError> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| TypeError::InvalidGuid {
                input: s.to_string(),
                reason: e.to_string(),
            })
    }

    /// First 8 hex characters, for log lines.
    pub fn short_id(&self) -> String {
        self.to_short_string()[..8].to_string()
    }
}

impl Default for Guid {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for Guid {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_short_string(s)
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self.short_id())
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<uuid::Uuid> for Guid {
    fn from(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }
}
