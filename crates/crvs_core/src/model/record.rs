//! Record identity, record types and actor identity.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier of one civil-registration record.
pub type RecordId = Uuid;

/// Kind of life event a record registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Birth,
    Death,
    Marriage,
}

impl RecordType {
    pub const ALL: [RecordType; 3] = [Self::Birth, Self::Death, Self::Marriage];

    /// Stable string id used in storage and scope qualifiers.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Birth => "birth",
            Self::Death => "death",
            Self::Marriage => "marriage",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "birth" => Some(Self::Birth),
            "death" => Some(Self::Death),
            "marriage" => Some(Self::Marriage),
            _ => None,
        }
    }
}

impl Display for RecordType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of a human or system actor, as resolved by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl Display for ActorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActorId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Durable header row written by the first CREATE action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecordHeader {
    pub record_id: RecordId,
    pub record_type: RecordType,
    /// Epoch milliseconds of the CREATE append.
    pub created_at: i64,
}
