// Cache Event Codec
//
// Both event kinds share one JSON envelope:
//   {"create": {"id": "...", "name": "...", "age": 2, "vaccinated": true}}
//   {"delete": "<uuid>"}

use serde::{Deserialize, Serialize};

use crate::model::{CatId, CatRecord};

/// A mutation carried through the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheEvent {
    Create(CatRecord),
    Delete(CatId),
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed event payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl CacheEvent {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Identifier of the record this event touches.
    pub fn cat_id(&self) -> CatId {
        match self {
            CacheEvent::Create(record) => record.id,
            CacheEvent::Delete(id) => *id,
        }
    }
}
