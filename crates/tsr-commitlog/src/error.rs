use std::io;
use std::path::PathBuf;

/// Errors produced by the shared commit log.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// I/O error on a shared segment or lock file.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// CRC integrity check failed for a framed structure.
    #[error("CRC integrity check failed at offset {offset}: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        offset: u64,
        expected: u32,
        actual: u32,
    },

    /// A frame has an invalid length field.
    #[error("invalid frame length {length} at offset {offset}")]
    InvalidRecordLength { offset: u64, length: u32 },

    /// The metadata header or ring contents contradict each other.
    #[error("corrupt commit log: {0}")]
    Corrupt(String),

    /// Every writer slot is occupied.
    #[error("all {slots} writer slots are occupied")]
    SlotsExhausted { slots: usize },

    /// An existing segment file has a different size than configured.
    #[error("segment {path} is {actual} bytes, expected {expected}")]
    SegmentSize {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// A segment that must already exist is missing.
    #[error("segment not found: {0}")]
    SegmentNotFound(PathBuf),

    /// The log configuration is unusable.
    #[error("invalid log configuration: {0}")]
    InvalidConfig(String),
}

/// Convenience alias used throughout the commit-log crate.
pub type LogResult<T> = std::result::Result<T, LogError>;
