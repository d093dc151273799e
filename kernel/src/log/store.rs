// Event Log Storage Abstraction
//
// Defines the contract the cache relies on. Implementations may be
// in-process (tests, single node) or shared (Redis Streams).

use async_trait::async_trait;
use std::time::Duration;

use super::{LogEntry, LogError, Position};

/// Storage backend for the event log.
///
/// Properties required from implementations:
/// - Append-only
/// - Positions strictly increase in append order
/// - Reads return entries in position order
///
/// Implementations MUST NOT:
/// - Reorder entries
/// - Mutate existing entries
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append a payload and return the position it was assigned.
    ///
    /// Returns only once the log has accepted the entry.
    async fn append(&self, payload: Vec<u8>) -> Result<Position, LogError>;

    /// Read up to `max_count` entries strictly after `after`
    /// (`None` reads from the beginning).
    ///
    /// Blocks up to `block` when nothing is available yet and then
    /// returns an empty batch.
    async fn read(
        &self,
        after: Option<Position>,
        block: Duration,
        max_count: usize,
    ) -> Result<Vec<LogEntry>, LogError>;

    /// Position of the newest entry, if any.
    async fn last_position(&self) -> Result<Option<Position>, LogError>;
}
