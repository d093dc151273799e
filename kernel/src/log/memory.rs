// In-Memory Event Log
//
// Single-process log used for local runs and tests. Readers park on a
// `Notify` until an append lands or their block timeout expires.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{EventLog, LogEntry, LogError, Position};

#[derive(Debug, Default)]
pub struct InMemoryEventLog {
    entries: Mutex<Vec<LogEntry>>,
    appended: Notify,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn collect_after(&self, after: Option<Position>, max_count: usize) -> Vec<LogEntry> {
        let entries = self.entries.lock();
        let start = entries.partition_point(|e| Some(e.position) <= after);
        entries[start..]
            .iter()
            .take(max_count)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, payload: Vec<u8>) -> Result<Position, LogError> {
        let position = {
            let mut entries = self.entries.lock();
            let position = Position::new(0, entries.len() as u64 + 1);
            entries.push(LogEntry { position, payload });
            position
        };
        self.appended.notify_waiters();
        Ok(position)
    }

    async fn read(
        &self,
        after: Option<Position>,
        block: Duration,
        max_count: usize,
    ) -> Result<Vec<LogEntry>, LogError> {
        let deadline = Instant::now() + block;
        loop {
            // Register interest before looking, so an append between the
            // check and the await still wakes us.
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.collect_after(after, max_count);
            if !batch.is_empty() {
                return Ok(batch);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn last_position(&self) -> Result<Option<Position>, LogError> {
        Ok(self.entries.lock().last().map(|e| e.position))
    }
}
