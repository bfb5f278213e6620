use std::fmt;

use odm_types::{LockMode, RawDocument};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of storage operation, used for journaling and error context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Insert,
    Update,
    Remove,
    Find,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Remove => "remove",
            Self::Find => "find",
        };
        f.write_str(name)
    }
}

/// Acknowledgement level requested for a write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteConcern {
    Unacknowledged,
    #[default]
    Acknowledged,
    Majority,
    /// Acknowledged by this many nodes.
    Nodes(u32),
}

/// Per-operation write flags passed through to the storage engine.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOptions {
    /// Acknowledgement level. `None` leaves the engine default.
    #[serde(default)]
    pub write_concern: Option<WriteConcern>,
    /// Request a durable flush before acknowledging.
    #[serde(default)]
    pub fsync: bool,
    /// Upper bound on how long the engine may take.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Storage-level lock to hold for the duration of the write.
    #[serde(default)]
    pub lock: Option<LockMode>,
}

impl WriteOptions {
    /// The same options with a storage-level lock requested.
    pub fn with_lock(&self, lock: Option<LockMode>) -> Self {
        Self {
            lock,
            ..self.clone()
        }
    }
}

/// Per-operation read flags.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadOptions {
    /// Storage-level lock to acquire while reading.
    #[serde(default)]
    pub lock: Option<LockMode>,
}

/// A targeted update of one document.
///
/// `criteria` holds additional equality conditions that must hold for the
/// update to apply (e.g. an expected version). A command that matches zero
/// documents is not an error at this layer; callers inspect the match count.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateCommand {
    /// Identifier of the document to update.
    pub id: Value,
    /// Extra equality criteria, by storage key.
    pub criteria: RawDocument,
    /// Storage keys to set.
    pub set: RawDocument,
    /// Storage keys to remove.
    pub unset: Vec<String>,
}

impl UpdateCommand {
    /// An empty update targeting `id`.
    pub fn new(id: Value) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Add an equality criterion.
    pub fn expect(mut self, key: impl Into<String>, value: Value) -> Self {
        self.criteria.insert(key.into(), value);
        self
    }

    /// Set a storage key.
    pub fn set(mut self, key: impl Into<String>, value: Value) -> Self {
        self.set.insert(key.into(), value);
        self
    }

    /// Remove a storage key.
    pub fn unset(mut self, key: impl Into<String>) -> Self {
        self.unset.push(key.into());
        self
    }

    /// Returns `true` if the command would not change anything.
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }
}
