use tsr_types::{ClassId, Guid};

/// Errors from identity map operations.
///
/// Every variant is a programmer or consistency error: callers are expected
/// to treat them as fatal rather than retry.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// The key is unknown to the map, or known only as a bare id with no data.
    #[error("no object for {key} (next available handle {next_handle})")]
    NotFound { key: String, next_handle: u32 },

    /// A surrogate or live object is already registered for this guid.
    #[error("object {0} is already registered")]
    AlreadyRegistered(Guid),

    /// An inactive surrogate was offered that already carries a live object.
    #[error("surrogate for {0} is already materialized")]
    AlreadyMaterialized(Guid),

    /// An activated surrogate was offered that the map never registered.
    #[error("surrogate for {0} was not registered")]
    NotRegistered(Guid),

    /// An activated surrogate was offered that has no live object.
    #[error("surrogate for {0} has not been materialized")]
    NotMaterialized(Guid),

    /// A second identity cell was offered for a guid the map already knows.
    #[error("object {0} is known under a different canonical id")]
    DuplicateIdentity(Guid),

    /// The class-metadata service does not know this class.
    #[error("unknown class {0}")]
    UnknownClass(ClassId),

    /// Field payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The map's own index tables disagree with each other.
    #[error("identity map inconsistency: {0}")]
    Consistency(String),
}

/// Result alias for identity map operations.
pub type IdentityResult<T> = Result<T, IdentityError>;
