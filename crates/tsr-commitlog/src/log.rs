use std::fs;

use tracing::{debug, error, info, warn};
use tsr_types::Guid;

use crate::config::LogConfig;
use crate::error::{LogError, LogResult};
use crate::fold::ForeignChanges;
use crate::metadata::{LogMetadata, FREE_SLOT, NO_MASTER};
use crate::record::ChangeBatch;
use crate::ring::{self, RingEntry};
use crate::segment::{DurableLock, ProjectMutex, SharedSegment};

/// A reconciler's verdict on a batch of foreign changes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reconciliation {
    Accept,
    Reject(String),
}

/// The local side of a commit transaction.
///
/// Every method is called with the project mutex held.
pub trait CommitParticipant {
    type Error: From<LogError> + std::fmt::Display;

    /// Decide whether unseen foreign changes can be merged.
    fn reconcile(&mut self, foreign: &ForeignChanges) -> Result<Reconciliation, Self::Error>;

    /// Merge accepted foreign changes into local state. `persist` is set
    /// when this writer is the flush owner and must also store them durably.
    fn apply_foreign(&mut self, foreign: &ForeignChanges, persist: bool) -> Result<(), Self::Error>;

    /// Local changes to publish. Called once per commit, after foreign
    /// changes were applied.
    fn local_changes(&mut self) -> Result<ChangeBatch, Self::Error>;

    /// Store a just-published batch durably. Only called on the flush owner.
    fn persist_local(&mut self, generation: i64, batch: &ChangeBatch) -> Result<(), Self::Error>;

    /// Newest generation durable storage already holds.
    fn durable_generation(&mut self) -> Result<i64, Self::Error>;

    /// Store live records newer than [`Self::durable_generation`] that no
    /// flush owner has persisted yet. Called when this writer takes over
    /// flush ownership and when it gives it up.
    fn persist_backlog(&mut self, backlog: &ForeignChanges) -> Result<(), Self::Error>;
}

/// Result of [`CommitLog::commit`]. Contention is reported here rather
/// than as an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed {
        generation: i64,
        foreign_applied: bool,
    },
    /// The record was appended but the flush owner failed to persist it.
    /// The next commit retries through the backlog.
    Unflushed {
        generation: i64,
        foreign_applied: bool,
        error: String,
    },
    NothingToCommit {
        foreign_applied: bool,
    },
    /// The participant rejected unseen foreign changes. Nothing changed.
    Conflict { latest_generation: i64, reason: String },
    /// The local record does not fit. Nothing was appended.
    CapacityExceeded {
        needed: u64,
        available: u64,
        foreign_applied: bool,
    },
}

impl CommitOutcome {
    pub fn generation(&self) -> Option<i64> {
        match self {
            Self::Committed { generation, .. } | Self::Unflushed { generation, .. } => {
                Some(*generation)
            }
            _ => None,
        }
    }

    pub fn foreign_applied(&self) -> bool {
        match self {
            Self::Committed {
                foreign_applied, ..
            }
            | Self::Unflushed {
                foreign_applied, ..
            }
            | Self::NothingToCommit { foreign_applied }
            | Self::CapacityExceeded {
                foreign_applied, ..
            } => *foreign_applied,
            Self::Conflict { .. } => false,
        }
    }
}

/// Read-only view of a project's shared state.
#[derive(Clone, Debug)]
pub struct LogSnapshot {
    pub capacity: u64,
    pub metadata: LogMetadata,
    pub entries: Vec<RingEntry>,
}

/// Mutable state handed to the body of a transaction.
struct Txn<'a> {
    meta: &'a mut LogMetadata,
    ring: &'a mut [u8],
    slot: usize,
    source: Guid,
    durable: &'a mut Option<DurableLock>,
    /// Set on claiming flush ownership until the backlog was persisted.
    backlog_due: &'a mut bool,
    config: &'a LogConfig,
}

impl Txn<'_> {
    /// Become flush owner if nobody is. Returns whether this writer owns
    /// flushing afterwards.
    fn ensure_master(&mut self) -> LogResult<bool> {
        if self.meta.master_slot().is_none()
            && claim_master(self.meta, self.slot, self.durable, self.config)?
        {
            *self.backlog_due = true;
        }
        Ok(self.owns_flush())
    }

    fn owns_flush(&self) -> bool {
        self.meta.is_master(self.slot) && self.durable.is_some()
    }

    /// Hand every live record newer than the durable generation to the
    /// participant for persisting, whoever wrote it.
    fn flush_backlog<P: CommitParticipant>(&mut self, participant: &mut P) -> Result<(), P::Error> {
        let durable = participant.durable_generation()?;
        let entries = ring::scan(self.ring, self.meta)?;
        let backlog = ForeignChanges::fold(
            entries
                .iter()
                .map(|e| &e.record)
                .filter(|r| r.generation > durable),
        );
        if backlog.records > 0 {
            info!(
                slot = self.slot,
                durable,
                records = backlog.records,
                latest = backlog.latest_generation,
                "persisting unflushed commit records"
            );
            participant.persist_backlog(&backlog)?;
        }
        *self.backlog_due = false;
        Ok(())
    }

    fn release_slot(&mut self) {
        self.meta.slots[self.slot] = FREE_SLOT;
        if self.meta.is_master(self.slot) {
            self.meta.master = NO_MASTER;
        }
        *self.durable = None;
    }
}

/// Returns whether flush ownership was taken.
fn claim_master(
    meta: &mut LogMetadata,
    slot: usize,
    durable: &mut Option<DurableLock>,
    config: &LogConfig,
) -> LogResult<bool> {
    if durable.is_none() {
        *durable = DurableLock::try_acquire(&config.flush_lock_path())?;
    }
    if durable.is_some() {
        meta.master = slot as i32;
        info!(slot, project = %config.project, "claimed flush ownership");
        Ok(true)
    } else {
        warn!(slot, project = %config.project, "durable storage lock held elsewhere, not claiming flush ownership");
        Ok(false)
    }
}

/// One process's membership in a project's shared commit log.
///
/// Joining claims a writer slot; [`CommitLog::leave`] (or dropping)
/// releases it.
#[derive(Debug)]
pub struct CommitLog {
    config: LogConfig,
    meta: SharedSegment,
    ring: SharedSegment,
    mutex: ProjectMutex,
    slot: usize,
    source: Guid,
    durable: Option<DurableLock>,
    backlog_due: bool,
    joined: bool,
}

impl CommitLog {
    /// Join the project's log. `loaded_generation` is the durable
    /// generation the caller's in-memory state reflects.
    pub fn join(config: LogConfig, loaded_generation: i64) -> LogResult<Self> {
        config.validate()?;
        fs::create_dir_all(&config.shared_dir)?;
        let mutex = ProjectMutex::open(&config.mutex_path())?;
        let mut durable = None;
        let mut backlog_due = false;

        let (meta_seg, ring_seg, slot) = {
            let _guard = mutex.lock()?;
            let mut meta_seg = SharedSegment::open(&config.meta_path(), config.metadata_size)?;
            let ring_seg = SharedSegment::open(&config.ring_path(), config.capacity)?;
            let mut meta = LogMetadata::read_from(meta_seg.bytes())?;

            if meta.all_free() {
                meta.reset_region();
                meta.master = NO_MASTER;
                meta.current_generation = meta.current_generation.max(loaded_generation);
                debug!(generation = meta.current_generation, "no live writers, reset commit log");
            }

            let slot = meta
                .first_free_slot()
                .ok_or(LogError::SlotsExhausted {
                    slots: meta.slots.len(),
                })?;
            meta.slots[slot] = loaded_generation.min(meta.current_generation).max(0);

            if meta.master_slot().is_none() {
                backlog_due = claim_master(&mut meta, slot, &mut durable, &config)?;
            }
            meta.write_to(meta_seg.bytes_mut())?;
            debug!(
                slot,
                seen = meta.slots[slot],
                generation = meta.current_generation,
                master = meta.master,
                "joined commit log"
            );
            (meta_seg, ring_seg, slot)
        };

        Ok(Self {
            config,
            meta: meta_seg,
            ring: ring_seg,
            mutex,
            slot,
            source: Guid::new(),
            durable,
            backlog_due,
            joined: true,
        })
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Per-join writer identity stamped on every record.
    pub fn source(&self) -> Guid {
        self.source
    }

    /// Whether this writer holds the durable storage lock.
    pub fn is_master(&self) -> bool {
        self.durable.is_some()
    }

    /// Run `body` with the project mutex held. The header is written back
    /// if the body changed it, whether or not the body succeeded.
    fn transaction<T, E, F>(&mut self, body: F) -> Result<T, E>
    where
        E: From<LogError>,
        F: FnOnce(&mut Txn<'_>) -> Result<T, E>,
    {
        let _guard = self.mutex.lock()?;
        let mut meta = LogMetadata::read_from(self.meta.bytes())?;
        let original = meta.clone();

        let result = {
            let mut txn = Txn {
                meta: &mut meta,
                ring: self.ring.bytes_mut(),
                slot: self.slot,
                source: self.source,
                durable: &mut self.durable,
                backlog_due: &mut self.backlog_due,
                config: &self.config,
            };
            body(&mut txn)
        };

        if meta != original {
            meta.write_to(self.meta.bytes_mut())?;
        }
        result
    }

    /// Current header, read under the mutex.
    pub fn metadata(&mut self) -> LogResult<LogMetadata> {
        self.transaction(|txn| Ok::<_, LogError>(txn.meta.clone()))
    }

    /// Publish the participant's local changes after merging any unseen
    /// foreign commits.
    pub fn commit<P: CommitParticipant>(
        &mut self,
        participant: &mut P,
    ) -> Result<CommitOutcome, P::Error> {
        self.transaction::<_, P::Error, _>(|txn| {
            let is_master = txn.ensure_master()?;
            if is_master && *txn.backlog_due {
                txn.flush_backlog(participant)?;
            }
            let seen = txn.meta.seen(txn.slot);
            let current = txn.meta.current_generation;

            let entries = ring::scan(txn.ring, txn.meta)?;
            let source = txn.source;
            let foreign = ForeignChanges::fold(
                entries
                    .iter()
                    .map(|e| &e.record)
                    .filter(|r| r.generation > seen && r.source != source),
            );

            let mut foreign_applied = false;
            if foreign.records > 0 {
                match participant.reconcile(&foreign)? {
                    Reconciliation::Reject(reason) => {
                        warn!(
                            slot = txn.slot,
                            latest = foreign.latest_generation,
                            %reason,
                            "foreign commits rejected"
                        );
                        return Ok(CommitOutcome::Conflict {
                            latest_generation: foreign.latest_generation,
                            reason,
                        });
                    }
                    Reconciliation::Accept => {
                        participant.apply_foreign(&foreign, is_master)?;
                        foreign_applied = true;
                        debug!(
                            slot = txn.slot,
                            records = foreign.records,
                            objects = foreign.len(),
                            "applied foreign commits"
                        );
                    }
                }
            }

            // Everything up to `current` is now reflected locally.
            let mut staged = txn.meta.clone();
            staged.slots[txn.slot] = current;
            if let Some(min_seen) = staged.min_seen() {
                ring::reclaim(txn.ring, &mut staged, min_seen)?;
            }

            let batch = participant.local_changes()?;
            if batch.is_empty() {
                *txn.meta = staged;
                return Ok(CommitOutcome::NothingToCommit { foreign_applied });
            }

            let generation = current + 1;
            let frame = batch.to_record(generation, source).encode()?;
            let offset = match ring::append(txn.ring, &mut staged, &frame) {
                Ok(offset) => offset,
                Err(no_room) => {
                    if foreign_applied {
                        txn.meta.slots[txn.slot] = current;
                    }
                    warn!(
                        slot = txn.slot,
                        needed = no_room.needed,
                        available = no_room.available,
                        "commit log full"
                    );
                    return Ok(CommitOutcome::CapacityExceeded {
                        needed: no_room.needed,
                        available: no_room.available,
                        foreign_applied,
                    });
                }
            };

            staged.current_generation = generation;
            staged.slots[txn.slot] = generation;
            *txn.meta = staged;
            debug!(
                slot = txn.slot,
                generation,
                offset,
                size = frame.len(),
                objects = batch.len(),
                "appended commit record"
            );

            if is_master {
                if let Err(e) = participant.persist_local(generation, &batch) {
                    error!(slot = txn.slot, generation, error = %e, "appended record not persisted");
                    *txn.backlog_due = true;
                    return Ok(CommitOutcome::Unflushed {
                        generation,
                        foreign_applied,
                        error: e.to_string(),
                    });
                }
            }
            Ok(CommitOutcome::Committed {
                generation,
                foreign_applied,
            })
        })
    }

    /// Give up the slot without persisting anything. Records only this
    /// writer could still flush wait for the next flush owner.
    fn release(&mut self) -> LogResult<()> {
        if !self.joined {
            return Ok(());
        }
        self.transaction(|txn| {
            if txn.owns_flush() {
                debug!(slot = txn.slot, "dropping flush ownership without persisting the backlog");
            }
            txn.release_slot();
            Ok::<_, LogError>(())
        })?;
        self.finish_release()
    }

    fn finish_release(&mut self) -> LogResult<()> {
        self.joined = false;
        self.meta.flush()?;
        self.ring.flush()?;
        debug!(slot = self.slot, project = %self.config.project, "left commit log");
        Ok(())
    }

    /// Release the writer slot and, if held, flush ownership. A flush
    /// owner first persists every live record durable storage lacks.
    pub fn leave<P: CommitParticipant>(mut self, participant: &mut P) -> Result<(), P::Error> {
        if !self.joined {
            return Ok(());
        }
        self.transaction::<_, P::Error, _>(|txn| {
            if txn.owns_flush() {
                txn.flush_backlog(participant)?;
            }
            txn.release_slot();
            Ok(())
        })?;
        Ok(self.finish_release()?)
    }

    /// Snapshot a project's shared state without joining it.
    pub fn inspect(config: &LogConfig) -> LogResult<LogSnapshot> {
        config.validate()?;
        let meta_path = config.meta_path();
        if !meta_path.exists() {
            return Err(LogError::SegmentNotFound(meta_path));
        }
        let mutex = ProjectMutex::open(&config.mutex_path())?;
        let _guard = mutex.lock()?;
        let meta_seg = SharedSegment::open_existing(&meta_path)?;
        let ring_seg = SharedSegment::open_existing(&config.ring_path())?;
        let metadata = LogMetadata::read_from(meta_seg.bytes())?;
        let entries = ring::scan(ring_seg.bytes(), &metadata)?;
        Ok(LogSnapshot {
            capacity: ring_seg.len(),
            metadata,
            entries,
        })
    }
}

impl Drop for CommitLog {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(slot = self.slot, error = %e, "failed to release commit log slot");
        }
    }
}
