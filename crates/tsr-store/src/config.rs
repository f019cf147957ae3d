use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tsr_commitlog::{LogConfig, DEFAULT_METADATA_SIZE, DEFAULT_RING_CAPACITY};
use tsr_uow::DEFAULT_UNDO_DEPTH;

use crate::error::{StoreError, StoreResult};

/// Store settings, loadable from TOML. Missing keys take their defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub project: String,
    /// Directory for the shared commit log. `None` opens the store in
    /// exclusive mode, committing straight to durable storage.
    pub shared_dir: Option<PathBuf>,
    pub ring_capacity: u64,
    pub metadata_size: u64,
    /// Highest durable model version this process understands.
    pub model_version: u32,
    pub undo_depth: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            project: "default".into(),
            shared_dir: None,
            ring_capacity: DEFAULT_RING_CAPACITY,
            metadata_size: DEFAULT_METADATA_SIZE,
            model_version: 1,
            undo_depth: DEFAULT_UNDO_DEPTH,
        }
    }
}

impl StoreConfig {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            ..Self::default()
        }
    }

    pub fn with_shared_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shared_dir = Some(dir.into());
        self
    }

    pub fn with_ring_capacity(mut self, capacity: u64) -> Self {
        self.ring_capacity = capacity;
        self
    }

    pub fn with_model_version(mut self, version: u32) -> Self {
        self.model_version = version;
        self
    }

    pub fn is_exclusive(&self) -> bool {
        self.shared_dir.is_none()
    }

    /// The commit-log subset, if the store runs in shared mode.
    pub fn log_config(&self) -> Option<LogConfig> {
        self.shared_dir.as_ref().map(|dir| {
            LogConfig::new(dir, self.project.clone())
                .with_capacity(self.ring_capacity)
                .with_metadata_size(self.metadata_size)
        })
    }

    pub fn from_toml_str(text: &str) -> StoreResult<Self> {
        toml::from_str(text).map_err(|e| StoreError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> StoreResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> StoreResult<String> {
        toml::to_string_pretty(self).map_err(|e| StoreError::Config(e.to_string()))
    }
}
