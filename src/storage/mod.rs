//! Durable storage for reliable app-group delivery.
//!
//! [`DurableStore`] is the contract; [`InMemoryDurableStore`] keeps queues
//! in process memory and the `persistent` feature adds a file-backed store
//! that several processes can share.

mod memory;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::InMemoryDurableStore;
pub use traits::{DurableEntry, DurableStore, QueueKey, StorageError};
