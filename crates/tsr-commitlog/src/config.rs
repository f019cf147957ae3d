use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LogError, LogResult};
use crate::frame::HEADER_SIZE;

/// Number of writer slots in the metadata header.
pub const SLOT_COUNT: usize = 8;

/// Default ring capacity: 10000 pages of 4 KiB.
pub const DEFAULT_RING_CAPACITY: u64 = 10_000 * 4096;

/// Default size of the metadata segment.
pub const DEFAULT_METADATA_SIZE: u64 = 4096;

const MIN_METADATA_SIZE: u64 = 256;

/// Location and sizing of one project's shared segments.
///
/// The sizes are fixed when the segments are first created; every process
/// joining the same project must use the same values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Directory holding the segment and lock files.
    pub shared_dir: PathBuf,
    /// Project name, used as the file stem.
    pub project: String,
    /// Ring buffer capacity in bytes.
    pub capacity: u64,
    /// Metadata segment size in bytes.
    pub metadata_size: u64,
}

impl LogConfig {
    pub fn new(shared_dir: impl Into<PathBuf>, project: impl Into<String>) -> Self {
        Self {
            shared_dir: shared_dir.into(),
            project: project.into(),
            capacity: DEFAULT_RING_CAPACITY,
            metadata_size: DEFAULT_METADATA_SIZE,
        }
    }

    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_metadata_size(mut self, metadata_size: u64) -> Self {
        self.metadata_size = metadata_size;
        self
    }

    pub fn validate(&self) -> LogResult<()> {
        if self.project.is_empty()
            || self
                .project
                .chars()
                .any(|c| std::path::is_separator(c) || c == '.')
        {
            return Err(LogError::InvalidConfig(format!(
                "project name {:?} must be non-empty and contain no separators or dots",
                self.project
            )));
        }
        if self.capacity <= HEADER_SIZE as u64 || self.capacity > u32::MAX as u64 {
            return Err(LogError::InvalidConfig(format!(
                "ring capacity {} out of range",
                self.capacity
            )));
        }
        if self.metadata_size < MIN_METADATA_SIZE {
            return Err(LogError::InvalidConfig(format!(
                "metadata size {} below minimum {MIN_METADATA_SIZE}",
                self.metadata_size
            )));
        }
        Ok(())
    }

    fn file(&self, suffix: &str) -> PathBuf {
        self.shared_dir.join(format!("{}.{suffix}", self.project))
    }

    pub fn meta_path(&self) -> PathBuf {
        self.file("meta")
    }

    pub fn ring_path(&self) -> PathBuf {
        self.file("ring")
    }

    pub fn mutex_path(&self) -> PathBuf {
        self.file("mutex")
    }

    pub fn flush_lock_path(&self) -> PathBuf {
        self.file("flush.lock")
    }

    pub fn shared_dir(&self) -> &Path {
        &self.shared_dir
    }
}
