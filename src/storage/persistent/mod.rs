//! File-backed durable queues shared between processes.
//!
//! This module provides crash-tolerant storage for reliable delivery:
//! - Append-only queue files, one per (group, name)
//! - Advisory file locking so several processes can share a group
//! - CRC32 checksums so damaged records are skipped, not fatal
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     FileDurableStore                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐                    │
//! │  │ queue files     │  │ intent markers  │                    │
//! │  │ (append-only)   │  │ (header only)   │                    │
//! │  └────────┬────────┘  └────────┬────────┘                    │
//! │           │                    │                             │
//! │           └──────────┬─────────┘                             │
//! │                      ↓                                       │
//! │           ┌─────────────────────┐                            │
//! │           │ FileLock per group  │                            │
//! │           └─────────────────────┘                            │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod codec;
mod file_lock;
mod queue_file;
mod store;

pub use file_lock::FileLock;
pub use store::FileDurableStore;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ValidationError, WatchError};

/// Configuration for the file-backed store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistentConfig {
    /// Whether to fsync after every write (slower but safer).
    pub sync_on_write: bool,
    /// Create a group's directory on first use instead of failing.
    pub create_missing_groups: bool,
    /// Appends that would grow one queue file past this size are refused.
    pub max_queue_bytes: u64,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
            create_missing_groups: true,
            max_queue_bytes: 64 * 1024 * 1024, // 64 MB
        }
    }
}

impl PersistentConfig {
    const MIN_QUEUE_BYTES: u64 = 4 * 1024;

    #[must_use]
    pub const fn with_sync_on_write(mut self, sync: bool) -> Self {
        self.sync_on_write = sync;
        self
    }

    /// Check the configuration.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `max_queue_bytes` is too small to hold a
    /// single useful record.
    pub fn validate(self) -> Result<Self, WatchError> {
        if self.max_queue_bytes < Self::MIN_QUEUE_BYTES {
            return Err(ValidationError::InvalidConfig {
                reason: format!(
                    "max_queue_bytes must be at least {} bytes (got {})",
                    Self::MIN_QUEUE_BYTES,
                    self.max_queue_bytes
                ),
            }
            .into());
        }
        Ok(self)
    }
}

/// Open or create a file-backed durable store at the given path.
///
/// # Arguments
/// * `path` - Directory shared by every process taking part in the groups
/// * `config` - Optional configuration (uses defaults if None)
///
/// # Errors
/// - If the configuration is invalid
/// - If the path cannot be created or accessed
///
/// # Example
/// ```rust,ignore
/// use std::sync::Arc;
/// use watchpost::storage::persistent::open_store;
/// use watchpost::{Hub, HubConfig};
///
/// let store = open_store("./shared", None)?;
/// let hub = Hub::with_store(HubConfig::default(), Arc::new(store))?;
/// ```
pub fn open_store(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> Result<FileDurableStore, WatchError> {
    let cfg = config.unwrap_or_default().validate()?;
    Ok(FileDurableStore::open(path.as_ref(), cfg)?)
}
