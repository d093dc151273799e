use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use super::{CatRepository, RepositoryError};
use crate::model::{CatId, CatRecord};

/// Process-local repository. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryCatRepository {
    cats: RwLock<HashMap<CatId, CatRecord>>,
}

impl InMemoryCatRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatRepository for InMemoryCatRepository {
    async fn get(&self, id: CatId) -> Result<CatRecord, RepositoryError> {
        self.cats
            .read()
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound(id))
    }

    async fn create(&self, cat: &CatRecord) -> Result<(), RepositoryError> {
        match self.cats.write().entry(cat.id) {
            Entry::Occupied(_) => Err(RepositoryError::AlreadyExists(cat.id)),
            Entry::Vacant(slot) => {
                slot.insert(cat.clone());
                Ok(())
            }
        }
    }

    async fn update(&self, cat: &CatRecord) -> Result<(), RepositoryError> {
        match self.cats.write().get_mut(&cat.id) {
            Some(existing) => {
                *existing = cat.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(cat.id)),
        }
    }

    async fn delete(&self, id: CatId) -> Result<(), RepositoryError> {
        self.cats
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound(id))
    }
}
