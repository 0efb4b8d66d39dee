//! Reliable delivery: durable (group, name) queues behind app-group posts.
//!
//! Every post is appended to the durable store before any in-process
//! observation hears about it. Queues are drained when an accepting reliable
//! observation exists (or nobody intends to read them), when a reliable
//! observation is created (catch-up) or resumed, and discarded when a
//! reliable observation stops collecting. While a queue is kept for a
//! reliable subscriber, plain observations receive copies.
//! Queues nobody intends to read are garbage-collected.

/// Cross-process post signal.
pub mod signal;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub use signal::{GroupSignal, LocalSignal, SignalHandler, SignalSubscription};

use crate::payload::Payload;
use crate::storage::{DurableEntry, DurableStore, QueueKey, StorageError};

/// Running totals for one hub's reliable delivery.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReliableStats {
    pub posts: u64,
    pub drained_entries: u64,
    pub discarded_queues: u64,
    pub evicted_queues: u64,
    pub store_failures: u64,
}

pub(crate) struct ReliableDelivery {
    store: Arc<dyn DurableStore>,
    stats: Mutex<ReliableStats>,
}

impl ReliableDelivery {
    pub(crate) fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            store,
            stats: Mutex::new(ReliableStats::default()),
        }
    }

    fn record(&self, update: impl FnOnce(&mut ReliableStats)) {
        update(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }

    pub(crate) fn stats(&self) -> ReliableStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn open_group(&self, group: &str) -> Result<(), StorageError> {
        self.store.open_group(group)
    }

    /// Persist one post stamped with the current time.
    pub(crate) fn append(&self, key: &QueueKey, payload: Payload) -> Result<(), StorageError> {
        let entry = DurableEntry::new(Utc::now(), payload);
        match self.store.append(key, &entry) {
            Ok(()) => {
                self.record(|s| s.posts += 1);
                Ok(())
            }
            Err(e) => {
                self.record(|s| s.store_failures += 1);
                tracing::warn!(queue = %key, error = %e, "durable append failed");
                Err(e)
            }
        }
    }

    /// Take every entry of a queue in post order. A failed read yields
    /// nothing rather than an error.
    pub(crate) fn drain(&self, key: &QueueKey) -> Vec<DurableEntry> {
        match self.store.take_all(key) {
            Ok(entries) => {
                if !entries.is_empty() {
                    let n = entries.len() as u64;
                    self.record(|s| s.drained_entries += n);
                }
                entries
            }
            Err(e) => {
                self.record(|s| s.store_failures += 1);
                tracing::warn!(queue = %key, error = %e, "durable drain failed");
                Vec::new()
            }
        }
    }

    /// Every entry of a queue in post order, leaving the queue in place.
    /// A failed read yields nothing.
    pub(crate) fn peek(&self, key: &QueueKey) -> Vec<DurableEntry> {
        self.store.read_all(key).unwrap_or_else(|e| {
            self.record(|s| s.store_failures += 1);
            tracing::warn!(queue = %key, error = %e, "durable read failed");
            Vec::new()
        })
    }

    /// Empty a queue without delivering it.
    pub(crate) fn discard(&self, key: &QueueKey) -> Result<(), StorageError> {
        self.store.clear(key)?;
        self.record(|s| s.discarded_queues += 1);
        Ok(())
    }

    pub(crate) fn mark_intent(&self, key: &QueueKey) {
        if let Err(e) = self.store.set_intent(key, true) {
            self.record(|s| s.store_failures += 1);
            tracing::warn!(queue = %key, error = %e, "failed to record reliable intent");
        }
    }

    /// Discard the queue and withdraw the intent to collect it.
    pub(crate) fn stop_collection(&self, key: &QueueKey) {
        if let Err(e) = self.discard(key) {
            tracing::warn!(queue = %key, error = %e, "failed to discard durable queue");
        }
        if let Err(e) = self.store.set_intent(key, false) {
            self.record(|s| s.store_failures += 1);
            tracing::warn!(queue = %key, error = %e, "failed to clear reliable intent");
        }
    }

    pub(crate) fn has_intent(&self, key: &QueueKey) -> Result<bool, StorageError> {
        Ok(self.store.intents(&key.group)?.contains(&key.name))
    }

    /// Like [`Self::has_intent`], but an unreadable store counts as an
    /// intent so nothing is drained on a guess.
    pub(crate) fn intent_recorded(&self, key: &QueueKey) -> bool {
        self.has_intent(key).unwrap_or_else(|e| {
            self.record(|s| s.store_failures += 1);
            tracing::warn!(queue = %key, error = %e, "failed to read reliable intents");
            true
        })
    }

    /// Clear every queue in `group` that has neither a recorded intent nor a
    /// name in `live`. Returns the number of queues evicted.
    pub(crate) fn collect_garbage(
        &self,
        group: &str,
        live: &BTreeSet<String>,
    ) -> Result<usize, StorageError> {
        let intents = self.store.intents(group)?;
        let mut evicted = 0;
        for name in self.store.queue_names(group)? {
            if intents.contains(&name) || live.contains(&name) {
                continue;
            }
            self.store.clear(&QueueKey::new(group, name))?;
            evicted += 1;
        }

        if evicted > 0 {
            self.record(|s| s.evicted_queues += evicted as u64);
            tracing::info!(group, evicted, "collected orphaned durable queues");
        }
        Ok(evicted)
    }
}

impl fmt::Debug for ReliableDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReliableDelivery")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Whether this post should also run garbage collection.
pub(crate) fn should_collect(frequency: u32) -> bool {
    match frequency {
        0 => false,
        1 => true,
        n => rand::rng().random_range(0..n) == 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryDurableStore;

    fn delivery() -> (Arc<InMemoryDurableStore>, ReliableDelivery) {
        let store = Arc::new(InMemoryDurableStore::new());
        store.open_group("g").unwrap();
        let reliable = ReliableDelivery::new(Arc::clone(&store) as Arc<dyn DurableStore>);
        (store, reliable)
    }

    #[test]
    fn test_drain_returns_post_order_then_empty() {
        let (_store, reliable) = delivery();
        let key = QueueKey::new("g", "n");
        for i in 0..4 {
            reliable.append(&key, Payload::Int(i)).unwrap();
        }

        let drained: Vec<_> = reliable
            .drain(&key)
            .into_iter()
            .filter_map(|e| e.payload.as_int())
            .collect();
        assert_eq!(drained, vec![0, 1, 2, 3]);
        assert!(reliable.drain(&key).is_empty());
        assert_eq!(reliable.stats().posts, 4);
        assert_eq!(reliable.stats().drained_entries, 4);
    }

    #[test]
    fn test_drain_failure_is_empty() {
        let (store, reliable) = delivery();
        let key = QueueKey::new("g", "n");
        reliable.append(&key, Payload::Int(1)).unwrap();

        store.set_available(false);
        assert!(reliable.drain(&key).is_empty());
        assert_eq!(reliable.stats().store_failures, 1);

        store.set_available(true);
        assert_eq!(reliable.drain(&key).len(), 1);
    }

    #[test]
    fn test_stop_collection_clears_queue_and_intent() {
        let (store, reliable) = delivery();
        let key = QueueKey::new("g", "n");
        reliable.mark_intent(&key);
        reliable.append(&key, Payload::Int(1)).unwrap();

        reliable.stop_collection(&key);
        assert!(store.is_empty());
        assert!(!reliable.has_intent(&key).unwrap());
    }

    #[test]
    fn test_garbage_collection_spares_intent_and_live() {
        let (_store, reliable) = delivery();
        for name in ["orphan", "intended", "live"] {
            reliable.append(&QueueKey::new("g", name), Payload::Null).unwrap();
        }
        reliable.mark_intent(&QueueKey::new("g", "intended"));

        let live = BTreeSet::from(["live".to_string()]);
        assert_eq!(reliable.collect_garbage("g", &live).unwrap(), 1);
        assert!(reliable.drain(&QueueKey::new("g", "orphan")).is_empty());
        assert_eq!(reliable.drain(&QueueKey::new("g", "intended")).len(), 1);
        assert_eq!(reliable.drain(&QueueKey::new("g", "live")).len(), 1);
    }

    #[test]
    fn test_cleanup_frequency_edges() {
        assert!(!should_collect(0));
        assert!(should_collect(1));
        // 1-in-N: over many draws both outcomes show up.
        let hits = (0..2000).filter(|_| should_collect(4)).count();
        assert!(hits > 0 && hits < 2000);
    }
}
