use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("identity error: {0}")]
    Identity(#[from] tsr_identity::IdentityError),

    #[error("unit of work error: {0}")]
    Uow(#[from] tsr_uow::UowError),

    #[error("commit log error: {0}")]
    Log(#[from] tsr_commitlog::LogError),

    #[error("durable model version {on_disk} cannot be opened by a process supporting {supported}")]
    MigrationForbidden { on_disk: u32, supported: u32 },

    #[error("commit log full: record needs {needed} bytes, {available} available")]
    CapacityExceeded { needed: u64, available: u64 },

    #[error("foreign changes conflict with local edits: {0}")]
    ConflictDetected(String),

    #[error("durable store error: {0}")]
    Durable(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
