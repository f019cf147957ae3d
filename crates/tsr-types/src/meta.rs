use std::fmt;
use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Process-local small integer standing in for an object identifier.
///
/// Handles start at 1 and are assigned from a monotonically increasing
/// per-store counter. They are never persisted or shared between processes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(NonZeroU32);

impl Handle {
    /// The first handle any store assigns.
    pub const FIRST: Handle = match NonZeroU32::new(1) {
        Some(v) => Handle(v),
        None => unreachable!(),
    };

    /// Build from a raw value; zero is rejected.
    pub fn new(raw: u32) -> Result<Self, TypeError> {
        NonZeroU32::new(raw).map(Self).ok_or(TypeError::ZeroHandle)
    }

    /// The raw integer value.
    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// Zero-based index for table addressing.
    pub fn index(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Class discriminant supplied by the class-metadata service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassId(pub u32);

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class:{}", self.0)
    }
}

/// Field discriminant within a class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldId(pub u32);

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field:{}", self.0)
    }
}
