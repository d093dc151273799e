// Event-Log-Synchronized Read Cache
//
// Handlers read from a local projection and publish mutations to the
// event log. Only the stream consumer writes the projection, so a publish
// becomes visible to `get` once the consumer has applied it.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::CacheConfig;
use crate::event::{CacheEvent, CodecError};
use crate::log::{EventLog, LogError, Position};
use crate::model::{CatId, CatRecord};

pub mod consumer;
pub mod replay;
pub mod store;

pub use consumer::{ConsumerState, ConsumerStatus};
use consumer::StreamConsumer;
pub use replay::{replay, ReplayOutcome};
pub use store::CacheStore;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("could not encode event: {0}")]
    Encode(#[from] CodecError),

    #[error("could not publish event: {0}")]
    Publish(#[from] LogError),

    #[error("cache consumer already started")]
    AlreadyStarted,

    #[error("timed out waiting for the cache to reach {0}")]
    SyncTimeout(Position),

    #[error("cache consumer stopped before reaching {0}")]
    Stopped(Position),
}

/// Entry point for everything that reads or mutates cached cats.
pub struct CatCache {
    log: Arc<dyn EventLog>,
    store: Arc<CacheStore>,
    status: watch::Receiver<ConsumerStatus>,
    token: CancellationToken,
    pending: Mutex<Option<StreamConsumer>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CatCache {
    /// Build a cache over `log`. Nothing is consumed until [`start`].
    ///
    /// [`start`]: CatCache::start
    pub fn new(log: Arc<dyn EventLog>, config: CacheConfig) -> Self {
        let store = Arc::new(CacheStore::new());
        let (consumer, status) = StreamConsumer::new(Arc::clone(&log), Arc::clone(&store), config);
        Self {
            log,
            store,
            status,
            token: CancellationToken::new(),
            pending: Mutex::new(Some(consumer)),
            task: Mutex::new(None),
        }
    }

    /// Spawn the stream consumer on the current tokio runtime.
    pub fn start(&self) -> Result<(), CacheError> {
        let consumer = self.pending.lock().take().ok_or(CacheError::AlreadyStarted)?;
        let handle = tokio::spawn(consumer.run(self.token.child_token()));
        *self.task.lock() = Some(handle);
        Ok(())
    }

    /// Cancel the consumer and wait for it to exit. Once this returns the
    /// projection is frozen.
    pub async fn stop(&self) {
        self.token.cancel();
        self.pending.lock().take();

        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(error) = handle.await {
                tracing::error!(%error, "cache consumer task failed");
            }
        }
    }

    /// Cached record for `id`. May lag recent publishes.
    pub fn get(&self, id: &CatId) -> Option<CatRecord> {
        self.store.get(id)
    }

    /// Append a create event. Returns once the log accepted it, not once
    /// the projection reflects it.
    pub async fn publish_create(&self, record: &CatRecord) -> Result<Position, CacheError> {
        self.publish(CacheEvent::Create(record.clone())).await
    }

    /// Append a delete event, with the same contract as [`publish_create`].
    ///
    /// [`publish_create`]: CatCache::publish_create
    pub async fn publish_delete(&self, id: CatId) -> Result<Position, CacheError> {
        self.publish(CacheEvent::Delete(id)).await
    }

    async fn publish(&self, event: CacheEvent) -> Result<Position, CacheError> {
        let cat_id = event.cat_id();
        let payload = event.encode()?;
        let position = self.log.append(payload).await?;
        tracing::debug!(%cat_id, %position, "published cache event");
        Ok(position)
    }

    /// Wait until the consumer has applied everything up to `position`.
    pub async fn wait_for(&self, position: Position, timeout: Duration) -> Result<(), CacheError> {
        let mut status = self.status.clone();
        let reached = tokio::time::timeout(timeout, async {
            status
                .wait_for(|s| s.cursor.is_some_and(|cursor| cursor >= position))
                .await
                .map(|_| ())
        })
        .await;

        match reached {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(CacheError::Stopped(position)),
            Err(_) => Err(CacheError::SyncTimeout(position)),
        }
    }

    pub fn status(&self) -> ConsumerStatus {
        self.status.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

impl Drop for CatCache {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StartFrom;
    use crate::log::{InMemoryEventLog, LogEntry};
    use async_trait::async_trait;

    const SYNC: Duration = Duration::from_secs(5);

    fn config() -> CacheConfig {
        CacheConfig {
            block_timeout_ms: 50,
            batch_size: 8,
            backoff_initial_ms: 5,
            backoff_max_ms: 50,
            start_from: StartFrom::Beginning,
        }
    }

    fn started(log: Arc<dyn EventLog>) -> CatCache {
        let cache = CatCache::new(log, config());
        cache.start().unwrap();
        cache
    }

    fn cat(id: &str, name: &str, age: u32, vaccinated: bool) -> CatRecord {
        CatRecord {
            id: id.parse().unwrap(),
            name: name.into(),
            age,
            vaccinated,
        }
    }

    const A1: &str = "00000000-0000-4000-8000-0000000000a1";
    const A2: &str = "00000000-0000-4000-8000-0000000000a2";

    #[tokio::test]
    async fn published_create_becomes_visible_then_delete_removes_it() {
        let cache = started(Arc::new(InMemoryEventLog::new()));
        let tom = cat(A1, "Tom", 2, true);

        let pos = cache.publish_create(&tom).await.unwrap();
        cache.wait_for(pos, SYNC).await.unwrap();
        assert_eq!(cache.get(&tom.id), Some(tom.clone()));

        let pos = cache.publish_delete(tom.id).await.unwrap();
        cache.wait_for(pos, SYNC).await.unwrap();
        assert_eq!(cache.get(&tom.id), None);

        cache.stop().await;
    }

    #[tokio::test]
    async fn identical_creates_leave_one_record() {
        let cache = started(Arc::new(InMemoryEventLog::new()));
        let cat = cat(A2, "Luna", 4, false);

        cache.publish_create(&cat).await.unwrap();
        let pos = cache.publish_create(&cat).await.unwrap();
        cache.wait_for(pos, SYNC).await.unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&cat.id), Some(cat));
        cache.stop().await;
    }

    #[tokio::test]
    async fn later_event_wins_for_same_id() {
        let cache = started(Arc::new(InMemoryEventLog::new()));
        let tom = cat(A1, "Tom", 2, true);

        cache.publish_create(&tom).await.unwrap();
        let pos = cache.publish_delete(tom.id).await.unwrap();
        cache.wait_for(pos, SYNC).await.unwrap();

        assert_eq!(cache.get(&tom.id), None);
        assert_eq!(cache.status().applied, 2);
        cache.stop().await;
    }

    #[tokio::test]
    async fn publish_does_not_touch_projection_synchronously() {
        let cache = CatCache::new(Arc::new(InMemoryEventLog::new()), config());
        let tom = cat(A1, "Tom", 2, true);

        cache.publish_create(&tom).await.unwrap();
        assert_eq!(cache.get(&tom.id), None);

        cache.start().unwrap();
        cache.wait_for(Position::new(0, 1), SYNC).await.unwrap();
        assert_eq!(cache.get(&tom.id), Some(tom));
        cache.stop().await;
    }

    #[tokio::test]
    async fn malformed_entry_is_skipped() {
        let log = Arc::new(InMemoryEventLog::new());
        let cache = started(log.clone());
        let before = cat(A1, "Tom", 2, true);
        let after = cat(A2, "Luna", 4, false);

        cache.publish_create(&before).await.unwrap();
        log.append(b"\xff\xfe garbage".to_vec()).await.unwrap();
        let pos = cache.publish_create(&after).await.unwrap();
        cache.wait_for(pos, SYNC).await.unwrap();

        assert_eq!(cache.get(&before.id), Some(before));
        assert_eq!(cache.get(&after.id), Some(after));
        assert_eq!(cache.status().skipped, 1);
        cache.stop().await;
    }

    #[tokio::test]
    async fn caches_sharing_a_log_converge() {
        let log: Arc<dyn EventLog> = Arc::new(InMemoryEventLog::new());
        let writer = started(Arc::clone(&log));
        let reader = started(Arc::clone(&log));
        let tom = cat(A1, "Tom", 2, true);

        let pos = writer.publish_create(&tom).await.unwrap();
        reader.wait_for(pos, SYNC).await.unwrap();
        assert_eq!(reader.get(&tom.id), Some(tom));

        writer.stop().await;
        reader.stop().await;
    }

    #[tokio::test]
    async fn nothing_is_applied_after_stop() {
        let cache = started(Arc::new(InMemoryEventLog::new()));
        let tom = cat(A1, "Tom", 2, true);

        cache.stop().await;
        assert_eq!(cache.status().state, ConsumerState::Stopped);

        let pos = cache.publish_create(&tom).await.unwrap();
        let err = cache.wait_for(pos, Duration::from_millis(200)).await.unwrap_err();

        assert!(matches!(err, CacheError::Stopped(_)));
        assert_eq!(cache.get(&tom.id), None);
    }

    #[tokio::test]
    async fn zero_batch_size_still_makes_progress() {
        let config = CacheConfig {
            batch_size: 0,
            ..config()
        };
        let cache = CatCache::new(Arc::new(InMemoryEventLog::new()), config);
        cache.start().unwrap();
        let tom = cat(A1, "Tom", 2, true);

        let pos = cache.publish_create(&tom).await.unwrap();
        cache.wait_for(pos, SYNC).await.unwrap();

        assert_eq!(cache.get(&tom.id), Some(tom));
        assert_eq!(cache.status().cursor, Some(pos));
        cache.stop().await;
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let cache = started(Arc::new(InMemoryEventLog::new()));
        assert!(matches!(cache.start(), Err(CacheError::AlreadyStarted)));
        cache.stop().await;
    }

    #[tokio::test]
    async fn wait_for_times_out_when_position_never_arrives() {
        let cache = started(Arc::new(InMemoryEventLog::new()));
        let err = cache
            .wait_for(Position::new(0, 99), Duration::from_millis(100))
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::SyncTimeout(_)));
        cache.stop().await;
    }

    struct RejectingLog;

    #[async_trait]
    impl EventLog for RejectingLog {
        async fn append(&self, _payload: Vec<u8>) -> Result<Position, LogError> {
            Err(LogError::Rejected("OOM command not allowed".into()))
        }

        async fn read(
            &self,
            _after: Option<Position>,
            block: Duration,
            _max_count: usize,
        ) -> Result<Vec<LogEntry>, LogError> {
            tokio::time::sleep(block).await;
            Ok(Vec::new())
        }

        async fn last_position(&self) -> Result<Option<Position>, LogError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn append_failure_surfaces_to_publisher() {
        let cache = started(Arc::new(RejectingLog));

        let err = cache
            .publish_delete(A1.parse().unwrap())
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::Publish(LogError::Rejected(_))));
        cache.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_readers_during_consumption() {
        let cache = Arc::new(started(Arc::new(InMemoryEventLog::new())));
        let tom = cat(A1, "Tom", 0, true);

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let id = tom.id;
                tokio::spawn(async move {
                    let mut last_age = 0;
                    for _ in 0..500 {
                        if let Some(seen) = cache.get(&id) {
                            // Ages are published in increasing order.
                            assert!(seen.age >= last_age);
                            last_age = seen.age;
                        }
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        let mut last = None;
        for age in 0..50 {
            last = Some(cache.publish_create(&CatRecord { age, ..tom.clone() }).await.unwrap());
        }
        for reader in readers {
            reader.await.unwrap();
        }

        cache.wait_for(last.unwrap(), SYNC).await.unwrap();
        assert_eq!(cache.get(&tom.id).unwrap().age, 49);
        cache.stop().await;
    }
}
