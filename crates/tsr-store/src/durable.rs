use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;
use tsr_types::{Guid, ObjectPayload};

use crate::error::StoreResult;

/// Durable storage boundary of a project.
///
/// Only the flush owner writes; every process reads at startup.
pub trait DurableStore: Send + Sync {
    fn model_version(&self) -> StoreResult<u32>;

    fn set_model_version(&self, version: u32) -> StoreResult<()>;

    /// Generation of the last persisted commit.
    fn generation(&self) -> StoreResult<i64>;

    fn load(&self) -> StoreResult<Vec<ObjectPayload>>;

    /// Upsert `upserts`, remove `deleted` and record `generation`.
    fn persist(&self, generation: i64, upserts: &[ObjectPayload], deleted: &[Guid])
        -> StoreResult<()>;
}

#[derive(Debug, Default)]
struct Contents {
    model_version: u32,
    generation: i64,
    objects: BTreeMap<Guid, ObjectPayload>,
}

/// In-memory durable store. Clones share the same contents, so several
/// stores in one process can stand in for processes sharing a file.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDurableStore {
    inner: Arc<RwLock<Contents>>,
}

impl InMemoryDurableStore {
    pub fn new(model_version: u32) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Contents {
                model_version,
                ..Contents::default()
            })),
        }
    }

    pub fn get(&self, guid: Guid) -> Option<ObjectPayload> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .objects
            .get(&guid)
            .cloned()
    }

    pub fn contains(&self, guid: Guid) -> bool {
        self.get(guid).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .objects
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DurableStore for InMemoryDurableStore {
    fn model_version(&self) -> StoreResult<u32> {
        Ok(self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .model_version)
    }

    fn set_model_version(&self, version: u32) -> StoreResult<()> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .model_version = version;
        Ok(())
    }

    fn generation(&self) -> StoreResult<i64> {
        Ok(self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .generation)
    }

    fn load(&self) -> StoreResult<Vec<ObjectPayload>> {
        Ok(self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .objects
            .values()
            .cloned()
            .collect())
    }

    fn persist(
        &self,
        generation: i64,
        upserts: &[ObjectPayload],
        deleted: &[Guid],
    ) -> StoreResult<()> {
        let mut contents = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        for payload in upserts {
            contents.objects.insert(payload.guid, payload.clone());
        }
        for guid in deleted {
            contents.objects.remove(guid);
        }
        contents.generation = contents.generation.max(generation);
        debug!(
            generation,
            upserts = upserts.len(),
            deleted = deleted.len(),
            "persisted changes"
        );
        Ok(())
    }
}
