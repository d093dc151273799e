// Event Log
//
// Ordered, append-only sequence of opaque payloads. Positions are
// `<millis>-<seq>` pairs compared lexicographically as integers, the
// same shape Redis Streams uses for entry IDs.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub mod memory;
pub mod redis_stream;
pub mod store;

pub use memory::InMemoryEventLog;
pub use redis_stream::RedisStreamLog;
pub use store::EventLog;

/// Position of an entry in the event log. Serialized in its text form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub millis: u64,
    pub seq: u64,
}

impl Position {
    pub const fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

impl FromStr for Position {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LogError::InvalidPosition(s.to_string());
        let (millis, seq) = s.split_once('-').ok_or_else(invalid)?;
        Ok(Self {
            millis: millis.parse().map_err(|_| invalid())?,
            seq: seq.parse().map_err(|_| invalid())?,
        })
    }
}

impl Serialize for Position {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Position {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One entry as read back from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub position: Position,
    pub payload: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The log could not be reached. Readers retry, writers surface it.
    #[error("event log unavailable: {0}")]
    Unavailable(String),

    #[error("event log rejected the request: {0}")]
    Rejected(String),

    #[error("invalid log position `{0}`")]
    InvalidPosition(String),
}
