// Cat Service
//
// Composes the durable repository with the read cache. Writes go to the
// repository first and are then published to the event log; reads are
// served from the cache and fall back to the repository on a miss.

use std::sync::Arc;

use crate::cache::{CacheError, CatCache};
use crate::model::{CatId, CatRecord, NewCat};
use crate::repository::{CatRepository, RepositoryError};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("cat {0} not found")]
    NotFound(CatId),

    #[error(transparent)]
    Repository(RepositoryError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl From<RepositoryError> for ServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(id) => ServiceError::NotFound(id),
            other => ServiceError::Repository(other),
        }
    }
}

#[derive(Clone)]
pub struct CatService {
    repository: Arc<dyn CatRepository>,
    cache: Arc<CatCache>,
}

impl CatService {
    pub fn new(repository: Arc<dyn CatRepository>, cache: Arc<CatCache>) -> Self {
        Self { repository, cache }
    }

    pub fn cache(&self) -> &CatCache {
        &self.cache
    }

    pub async fn create(&self, cat: NewCat) -> Result<CatRecord, ServiceError> {
        let record = cat.with_id(CatId::new_v4());
        self.repository.create(&record).await?;
        self.cache.publish_create(&record).await?;
        tracing::info!(cat_id = %record.id, "cat created");
        Ok(record)
    }

    pub async fn get(&self, id: CatId) -> Result<CatRecord, ServiceError> {
        if let Some(cached) = self.cache.get(&id) {
            return Ok(cached);
        }
        tracing::debug!(cat_id = %id, "cache miss");
        Ok(self.repository.get(id).await?)
    }

    /// Replace a cat. The log has no update event, so the new state is
    /// re-published as a create and overwrites the cached copy.
    pub async fn update(&self, cat: CatRecord) -> Result<CatRecord, ServiceError> {
        self.repository.update(&cat).await?;
        self.cache.publish_create(&cat).await?;
        tracing::info!(cat_id = %cat.id, "cat updated");
        Ok(cat)
    }

    pub async fn delete(&self, id: CatId) -> Result<(), ServiceError> {
        self.repository.delete(id).await?;
        self.cache.publish_delete(id).await?;
        tracing::info!(cat_id = %id, "cat deleted");
        Ok(())
    }
}
