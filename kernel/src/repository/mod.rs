// Durable Cat Storage
//
// System of record for cats. The service writes here directly; the read
// cache is fed separately through the event log and is not
// transactionally coupled to this store.

use async_trait::async_trait;

use crate::model::{CatId, CatRecord};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryCatRepository;
pub use postgres::PostgresCatRepository;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("cat {0} not found")]
    NotFound(CatId),

    #[error("cat {0} already exists")]
    AlreadyExists(CatId),

    #[error("storage backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait CatRepository: Send + Sync {
    async fn get(&self, id: CatId) -> Result<CatRecord, RepositoryError>;

    async fn create(&self, cat: &CatRecord) -> Result<(), RepositoryError>;

    /// Replace an existing cat. Fails with `NotFound` if absent.
    async fn update(&self, cat: &CatRecord) -> Result<(), RepositoryError>;

    async fn delete(&self, id: CatId) -> Result<(), RepositoryError>;
}
