// Stream Consumer
//
// Background task that tails the event log and folds each batch into the
// cache store. It is the only writer of the store and the only owner of
// the cursor.
//
// Lifecycle:
//   Idle -> Reading -> Applying -> Idle
//   Reading -> ErrorBackoff -> Reading   (log I/O failure)
//   any -> Stopped                       (cancellation only)

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::{CacheConfig, StartFrom};
use crate::log::{EventLog, Position};

use super::replay::{replay, ReplayOutcome};
use super::store::CacheStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerState {
    #[default]
    Idle,
    Reading,
    Applying,
    ErrorBackoff,
    /// Terminal. The store is never mutated again.
    Stopped,
}

/// Read-only view of consumer progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStatus {
    pub state: ConsumerState,
    pub cursor: Option<Position>,
    pub applied: u64,
    pub skipped: u64,
    pub failures: u64,
}

/// Exponential retry delay, reset on the first successful read.
#[derive(Debug)]
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    retrying: bool,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
            retrying: false,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        self.retrying = true;
        delay
    }

    /// Returns whether a retry sequence was in progress.
    fn reset(&mut self) -> bool {
        self.current = self.initial;
        std::mem::replace(&mut self.retrying, false)
    }
}

pub(crate) struct StreamConsumer {
    log: Arc<dyn EventLog>,
    store: Arc<CacheStore>,
    config: CacheConfig,
    cursor: Option<Position>,
    status: watch::Sender<ConsumerStatus>,
}

impl StreamConsumer {
    pub(crate) fn new(
        log: Arc<dyn EventLog>,
        store: Arc<CacheStore>,
        config: CacheConfig,
    ) -> (Self, watch::Receiver<ConsumerStatus>) {
        let (status, receiver) = watch::channel(ConsumerStatus::default());
        let consumer = Self {
            log,
            store,
            config,
            cursor: None,
            status,
        };
        (consumer, receiver)
    }

    /// Consume until `token` is cancelled.
    ///
    /// The token is checked once per poll and raced against the blocking
    /// read and the backoff sleep. A batch read before cancellation was
    /// observed is discarded rather than applied.
    pub(crate) async fn run(mut self, token: CancellationToken) {
        let mut backoff = Backoff::new(self.config.backoff_initial(), self.config.backoff_max());

        if self.config.start_from == StartFrom::Latest
            && !self.seek_latest(&token, &mut backoff).await
        {
            self.transition(ConsumerState::Stopped);
            return;
        }

        tracing::info!(cursor = ?self.cursor, "cache consumer started");

        while !token.is_cancelled() {
            self.transition(ConsumerState::Reading);

            let read = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                read = self.log.read(
                    self.cursor,
                    self.config.block_timeout(),
                    self.config.batch_size(),
                ) => read,
            };

            match read {
                Ok(batch) => {
                    if backoff.reset() {
                        tracing::info!("event log reachable again");
                    }

                    if batch.is_empty() {
                        self.transition(ConsumerState::Idle);
                        continue;
                    }
                    if token.is_cancelled() {
                        break;
                    }

                    self.transition(ConsumerState::Applying);
                    let outcome = replay(&self.store, &batch);
                    tracing::debug!(
                        entries = batch.len(),
                        applied = outcome.applied,
                        skipped = outcome.skipped,
                        cursor = ?outcome.cursor,
                        "applied batch"
                    );
                    self.advance(outcome);
                    self.transition(ConsumerState::Idle);
                }
                Err(error) => {
                    let delay = backoff.next_delay();
                    tracing::error!(%error, retry_in = ?delay, "event log read failed");
                    self.status.send_modify(|status| {
                        status.state = ConsumerState::ErrorBackoff;
                        status.failures += 1;
                    });

                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.transition(ConsumerState::Stopped);
        tracing::info!(cursor = ?self.cursor, "cache consumer stopped");
    }

    /// Position the cursor at the current end of the log. Returns `false`
    /// if cancelled first.
    async fn seek_latest(&mut self, token: &CancellationToken, backoff: &mut Backoff) -> bool {
        loop {
            let last = tokio::select! {
                biased;
                _ = token.cancelled() => return false,
                last = self.log.last_position() => last,
            };

            match last {
                Ok(position) => {
                    self.cursor = position;
                    self.status.send_modify(|status| status.cursor = position);
                    return true;
                }
                Err(error) => {
                    let delay = backoff.next_delay();
                    tracing::error!(%error, retry_in = ?delay, "could not locate end of event log");
                    self.status.send_modify(|status| {
                        status.state = ConsumerState::ErrorBackoff;
                        status.failures += 1;
                    });
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return false,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    fn advance(&mut self, outcome: ReplayOutcome) {
        if outcome.cursor.is_some() {
            self.cursor = outcome.cursor;
        }
        let cursor = self.cursor;
        self.status.send_modify(|status| {
            status.cursor = cursor;
            status.applied += outcome.applied;
            status.skipped += outcome.skipped;
        });
    }

    fn transition(&self, state: ConsumerState) {
        self.status.send_if_modified(|status| {
            let changed = status.state != state;
            status.state = state;
            changed
        });
    }
}
