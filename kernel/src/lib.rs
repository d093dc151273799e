// Cat Shelter Kernel
//
// Record model, durable storage contract, and the read cache kept in sync
// by folding an append-only event log.

pub mod cache;
pub mod config;
pub mod event;
pub mod log;
pub mod model;
pub mod repository;
pub mod service;

pub use cache::{CacheError, CatCache, ConsumerState, ConsumerStatus};
pub use config::{CacheConfig, ConfigError, StartFrom};
pub use event::CacheEvent;
pub use log::{EventLog, InMemoryEventLog, Position, RedisStreamLog};
pub use model::{CatId, CatRecord, NewCat};
pub use repository::{
    CatRepository, InMemoryCatRepository, PostgresCatRepository, RepositoryError,
};
pub use service::{CatService, ServiceError};
