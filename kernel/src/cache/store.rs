// Cache Store
//
// In-process projection of cat records.
//
// Discipline: exactly one writer (the stream consumer) and any number of
// readers. The mutating methods are crate-private so nothing outside the
// consumer can touch the projection; the lock makes every mutation
// atomic with respect to readers.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::event::CacheEvent;
use crate::model::{CatId, CatRecord};

/// What applying a single event did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    Replaced,
    Removed,
    /// Delete of an identifier the store never held.
    Absent,
}

#[derive(Debug, Default)]
pub struct CacheStore {
    cats: RwLock<HashMap<CatId, CatRecord>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &CatId) -> Option<CatRecord> {
        self.cats.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.cats.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cats.read().is_empty()
    }

    /// Snapshot of every cached record, in no particular order.
    pub fn snapshot(&self) -> Vec<CatRecord> {
        self.cats.read().values().cloned().collect()
    }

    pub(crate) fn apply_create(&self, record: CatRecord) -> Applied {
        match self.cats.write().insert(record.id, record) {
            Some(_) => Applied::Replaced,
            None => Applied::Inserted,
        }
    }

    pub(crate) fn apply_delete(&self, id: &CatId) -> Applied {
        match self.cats.write().remove(id) {
            Some(_) => Applied::Removed,
            None => Applied::Absent,
        }
    }

    pub(crate) fn apply(&self, event: CacheEvent) -> Applied {
        match event {
            CacheEvent::Create(record) => self.apply_create(record),
            CacheEvent::Delete(id) => self.apply_delete(&id),
        }
    }
}
