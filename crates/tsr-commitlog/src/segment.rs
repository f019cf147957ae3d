//! OS resources behind the commit log: memory-mapped shared segments, the
//! per-project mutex and the flush-owner lock.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use memmap2::MmapMut;
use tracing::{debug, error, info};

use crate::error::{LogError, LogResult};

/// A fixed-size file mapped shared into every process of a project.
pub struct SharedSegment {
    map: MmapMut,
    path: PathBuf,
}

impl SharedSegment {
    /// Open the segment at `path`, creating it with `size` zero bytes if it
    /// does not exist yet. Callers hold the project mutex.
    pub fn open(path: &Path, size: u64) -> LogResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let actual = file.metadata()?.len();
        if actual == 0 {
            file.set_len(size)?;
            debug!(path = %path.display(), size, "created shared segment");
        } else if actual != size {
            return Err(LogError::SegmentSize {
                path: path.to_path_buf(),
                expected: size,
                actual,
            });
        }
        Self::map(file, path)
    }

    /// Open a segment that must already exist, whatever its size.
    pub fn open_existing(path: &Path) -> LogResult<Self> {
        let file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(LogError::SegmentNotFound(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        Self::map(file, path)
    }

    fn map(file: File, path: &Path) -> LogResult<Self> {
        // SAFETY: MmapMut::map_mut is unsafe because the file can be modified
        // by other processes while mapped. This is sound here because:
        // 1. The segment is shared on purpose and is only read or written
        //    while the project mutex is held
        // 2. The file length is fixed at creation and never truncated
        // 3. The mapping lives as long as SharedSegment and all access goes
        //    through bytes()/bytes_mut(), which are bounded by its length
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self {
            map,
            path: path.to_path_buf(),
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.map
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.map
    }

    pub fn len(&self) -> u64 {
        self.map.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write dirty pages back to the backing file.
    pub fn flush(&self) -> LogResult<()> {
        self.map.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for SharedSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSegment")
            .field("path", &self.path)
            .field("len", &self.map.len())
            .finish()
    }
}

/// The named mutex guarding both shared segments of a project.
///
/// Backed by an exclusive OS file lock, so it is released by the kernel
/// even if the holder crashes.
#[derive(Debug)]
pub struct ProjectMutex {
    file: File,
    path: PathBuf,
}

impl ProjectMutex {
    pub fn open(path: &Path) -> LogResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Block until the mutex is held. Released when the guard drops.
    pub fn lock(&self) -> LogResult<ProjectMutexGuard<'_>> {
        self.file.lock_exclusive()?;
        Ok(ProjectMutexGuard { mutex: self })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Holds a [`ProjectMutex`] until dropped.
#[must_use = "the mutex is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ProjectMutexGuard<'a> {
    mutex: &'a ProjectMutex,
}

impl Drop for ProjectMutexGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.mutex.file) {
            error!(path = %self.mutex.path.display(), error = %e, "failed to release project mutex");
        }
    }
}

/// Exclusive lock on durable storage held by the flush owner.
#[derive(Debug)]
pub struct DurableLock {
    file: File,
    path: PathBuf,
}

impl DurableLock {
    /// Try to take the lock without blocking. Returns `None` if another
    /// process holds it.
    pub fn try_acquire(path: &Path) -> LogResult<Option<Self>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                info!(path = %path.display(), "acquired durable storage lock");
                Ok(Some(Self {
                    file,
                    path: path.to_path_buf(),
                }))
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DurableLock {
    fn drop(&mut self) {
        match FileExt::unlock(&self.file) {
            Ok(()) => info!(path = %self.path.display(), "released durable storage lock"),
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "failed to release durable storage lock")
            }
        }
    }
}
