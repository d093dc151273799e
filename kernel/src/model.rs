// Shelter Cat Records
//
// The record shape shared by the durable store, the event log codec
// and the local read cache.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Stable identifier for a cat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CatId(pub Uuid);

impl CatId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for CatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for CatId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(CatId)
    }
}

/// A cat as stored and cached. Replaced wholesale, never patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatRecord {
    pub id: CatId,
    pub name: String,
    pub age: u32,
    pub vaccinated: bool,
}

/// A cat that has not been assigned an identifier yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCat {
    pub name: String,
    pub age: u32,
    pub vaccinated: bool,
}

impl NewCat {
    pub fn with_id(self, id: CatId) -> CatRecord {
        CatRecord {
            id,
            name: self.name,
            age: self.age,
            vaccinated: self.vaccinated,
        }
    }
}
