//! Durable store contract for reliable delivery.
//!
//! The store is a key-value collaborator keyed by (group, name). Each key
//! holds an append-only queue of timestamped payloads plus an optional
//! "intent" marker recording that a reliable subscriber wants the queue kept.
//! Implementations must preserve insertion order on read and must be safe
//! to share between threads (and, for shared backends, between processes).

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::payload::Payload;

/// Errors that can occur during durable store operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The group's shared container is missing or inaccessible.
    #[error("Group container unavailable: {0}")]
    GroupUnavailable(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Stored data failed an integrity check.
    #[error("Corrupted record: {0}")]
    Corrupted(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::BackendError(err.to_string())
    }
}

/// Address of one durable queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueKey {
    pub group: String,
    pub name: String,
}

impl QueueKey {
    #[must_use]
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.name)
    }
}

/// One persisted post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurableEntry {
    /// When the post was made.
    pub timestamp: DateTime<Utc>,
    pub payload: Payload,
}

impl DurableEntry {
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>, payload: Payload) -> Self {
        Self { timestamp, payload }
    }
}

/// Storage trait for durable (group, name) queues.
///
/// # Safety Considerations
/// - `append` must never damage records already written
/// - `read_all` skips unreadable records instead of failing the whole read
pub trait DurableStore: Send + Sync {
    /// Make sure the group's container exists and is reachable.
    fn open_group(&self, group: &str) -> Result<(), StorageError>;

    /// Append one entry to the end of a queue, creating it if needed.
    fn append(&self, key: &QueueKey, entry: &DurableEntry) -> Result<(), StorageError>;

    /// All entries of a queue in insertion order. A missing queue is empty.
    fn read_all(&self, key: &QueueKey) -> Result<Vec<DurableEntry>, StorageError>;

    /// Delete a queue and everything in it.
    fn clear(&self, key: &QueueKey) -> Result<(), StorageError>;

    /// Read and delete a queue as one step.
    ///
    /// The default is `read_all` followed by `clear`; shared backends
    /// override it to hold their lock across both.
    fn take_all(&self, key: &QueueKey) -> Result<Vec<DurableEntry>, StorageError> {
        let entries = self.read_all(key)?;
        self.clear(key)?;
        Ok(entries)
    }

    /// Names of the non-empty queues in a group.
    fn queue_names(&self, group: &str) -> Result<BTreeSet<String>, StorageError>;

    /// Record or withdraw a reliable subscriber's intent to consume a queue.
    fn set_intent(&self, key: &QueueKey, active: bool) -> Result<(), StorageError>;

    /// Names with a recorded intent in a group.
    fn intents(&self, group: &str) -> Result<BTreeSet<String>, StorageError>;
}
