// Redis Streams Event Log
//
// Shared log backed by a single Redis stream, so several service
// instances converge on the same cache content.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamRangeReply, StreamReadReply};
use redis::{Client, ErrorKind, RedisError};
use std::time::Duration;

use super::{EventLog, LogEntry, LogError, Position};

/// Stream entry field holding the encoded event.
pub const PAYLOAD_FIELD: &str = "event";

/// Event log stored in a Redis stream.
///
/// Reads and appends go through separate connections: a multiplexed
/// connection answers in order, so a read parked in `XREAD BLOCK` would
/// otherwise hold up every append queued behind it.
#[derive(Clone)]
pub struct RedisStreamLog {
    reader: ConnectionManager,
    writer: ConnectionManager,
    stream: String,
}

impl RedisStreamLog {
    /// Connect to `url` and use `stream` as the log key.
    pub async fn connect(url: &str, stream: impl Into<String>) -> Result<Self, LogError> {
        let client = Client::open(url).map_err(map_redis_error)?;
        let reader = ConnectionManager::new(client.clone())
            .await
            .map_err(map_redis_error)?;
        let writer = ConnectionManager::new(client)
            .await
            .map_err(map_redis_error)?;

        let stream = stream.into();
        tracing::info!(stream = %stream, "connected to redis event log");

        Ok(Self {
            reader,
            writer,
            stream,
        })
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }
}

#[async_trait]
impl EventLog for RedisStreamLog {
    async fn append(&self, payload: Vec<u8>) -> Result<Position, LogError> {
        let mut conn = self.writer.clone();
        let id: String = redis::cmd("XADD")
            .arg(&self.stream)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        id.parse()
    }

    async fn read(
        &self,
        after: Option<Position>,
        block: Duration,
        max_count: usize,
    ) -> Result<Vec<LogEntry>, LogError> {
        let mut conn = self.reader.clone();
        let from = after.unwrap_or(Position::new(0, 0)).to_string();
        // BLOCK 0 means "forever" to Redis.
        let block_ms = block.as_millis().max(1) as u64;

        let reply: Option<StreamReadReply> = redis::cmd("XREAD")
            .arg("COUNT")
            .arg(max_count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.stream)
            .arg(from)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        match reply {
            Some(reply) => entries_from_reply(reply),
            None => Ok(Vec::new()),
        }
    }

    async fn last_position(&self) -> Result<Option<Position>, LogError> {
        let mut conn = self.writer.clone();
        let reply: StreamRangeReply = redis::cmd("XREVRANGE")
            .arg(&self.stream)
            .arg("+")
            .arg("-")
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        reply.ids.first().map(|entry| entry.id.parse()).transpose()
    }
}

fn entries_from_reply(reply: StreamReadReply) -> Result<Vec<LogEntry>, LogError> {
    let mut entries = Vec::new();
    for key in reply.keys {
        for entry in key.ids {
            let position = entry.id.parse()?;
            // A missing field still advances the cursor; the codec
            // reports the empty payload as malformed.
            let payload = entry.get::<Vec<u8>>(PAYLOAD_FIELD).unwrap_or_default();
            entries.push(LogEntry { position, payload });
        }
    }
    Ok(entries)
}

fn map_redis_error(err: RedisError) -> LogError {
    if err.kind() == ErrorKind::IoError
        || err.is_io_error()
        || err.is_timeout()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
    {
        LogError::Unavailable(err.to_string())
    } else {
        LogError::Rejected(err.to_string())
    }
}
