//! In-memory durable store.
//!
//! Thread-safe, process-local implementation of [`DurableStore`]. Sharing one
//! instance between several hubs models processes that share a group
//! container, which is how relaunch behavior is exercised in tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use crate::storage::traits::{DurableEntry, DurableStore, QueueKey, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct GroupState {
    queues: BTreeMap<String, Vec<DurableEntry>>,
    intents: BTreeSet<String>,
}

/// Durable store kept in process memory.
#[derive(Debug)]
pub struct InMemoryDurableStore {
    groups: RwLock<HashMap<String, GroupState>>,
    available: AtomicBool,
}

impl Default for InMemoryDurableStore {
    fn default() -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl InMemoryDurableStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the shared container going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Total number of queued entries across all groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups
            .read()
            .map(|g| g.values().flat_map(|s| s.queues.values()).map(Vec::len).sum())
            .unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self, group: &str) -> Result<(), StorageError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::GroupUnavailable(group.to_string()))
        }
    }
}

impl DurableStore for InMemoryDurableStore {
    fn open_group(&self, group: &str) -> Result<(), StorageError> {
        self.check_available(group)?;
        let mut groups = self.groups.write().map_err(|_| lock_err("open_group"))?;
        groups.entry(group.to_string()).or_default();
        Ok(())
    }

    fn append(&self, key: &QueueKey, entry: &DurableEntry) -> Result<(), StorageError> {
        self.check_available(&key.group)?;
        let mut groups = self.groups.write().map_err(|_| lock_err("append"))?;
        let state = groups
            .get_mut(&key.group)
            .ok_or_else(|| StorageError::GroupUnavailable(key.group.clone()))?;
        state
            .queues
            .entry(key.name.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    fn read_all(&self, key: &QueueKey) -> Result<Vec<DurableEntry>, StorageError> {
        self.check_available(&key.group)?;
        let groups = self.groups.read().map_err(|_| lock_err("read_all"))?;
        Ok(groups
            .get(&key.group)
            .and_then(|s| s.queues.get(&key.name))
            .cloned()
            .unwrap_or_default())
    }

    fn clear(&self, key: &QueueKey) -> Result<(), StorageError> {
        self.check_available(&key.group)?;
        let mut groups = self.groups.write().map_err(|_| lock_err("clear"))?;
        if let Some(state) = groups.get_mut(&key.group) {
            state.queues.remove(&key.name);
        }
        Ok(())
    }

    fn take_all(&self, key: &QueueKey) -> Result<Vec<DurableEntry>, StorageError> {
        self.check_available(&key.group)?;
        let mut groups = self.groups.write().map_err(|_| lock_err("take_all"))?;
        Ok(groups
            .get_mut(&key.group)
            .and_then(|s| s.queues.remove(&key.name))
            .unwrap_or_default())
    }

    fn queue_names(&self, group: &str) -> Result<BTreeSet<String>, StorageError> {
        self.check_available(group)?;
        let groups = self.groups.read().map_err(|_| lock_err("queue_names"))?;
        Ok(groups
            .get(group)
            .map(|s| {
                s.queues
                    .iter()
                    .filter(|(_, q)| !q.is_empty())
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn set_intent(&self, key: &QueueKey, active: bool) -> Result<(), StorageError> {
        self.check_available(&key.group)?;
        let mut groups = self.groups.write().map_err(|_| lock_err("set_intent"))?;
        let state = groups
            .get_mut(&key.group)
            .ok_or_else(|| StorageError::GroupUnavailable(key.group.clone()))?;
        if active {
            state.intents.insert(key.name.clone());
        } else {
            state.intents.remove(&key.name);
        }
        Ok(())
    }

    fn intents(&self, group: &str) -> Result<BTreeSet<String>, StorageError> {
        self.check_available(group)?;
        let groups = self.groups.read().map_err(|_| lock_err("intents"))?;
        Ok(groups.get(group).map(|s| s.intents.clone()).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Payload;
    use chrono::{TimeZone, Utc};

    fn entry(secs: i64, v: i64) -> DurableEntry {
        DurableEntry::new(Utc.timestamp_opt(secs, 0).unwrap(), Payload::Int(v))
    }

    #[test]
    fn test_append_requires_open_group() {
        let store = InMemoryDurableStore::new();
        let key = QueueKey::new("g", "n");
        assert!(matches!(
            store.append(&key, &entry(1, 1)),
            Err(StorageError::GroupUnavailable(_))
        ));

        store.open_group("g").unwrap();
        store.append(&key, &entry(1, 1)).unwrap();
        assert_eq!(store.read_all(&key).unwrap().len(), 1);
    }

    #[test]
    fn test_take_all_preserves_order_and_empties() {
        let store = InMemoryDurableStore::new();
        store.open_group("g").unwrap();
        let key = QueueKey::new("g", "n");
        for i in 0..5 {
            store.append(&key, &entry(i, i)).unwrap();
        }

        let taken: Vec<_> = store
            .take_all(&key)
            .unwrap()
            .into_iter()
            .filter_map(|e| e.payload.as_int())
            .collect();
        assert_eq!(taken, vec![0, 1, 2, 3, 4]);
        assert!(store.take_all(&key).unwrap().is_empty());
        assert!(store.queue_names("g").unwrap().is_empty());
    }

    #[test]
    fn test_intents_round_trip() {
        let store = InMemoryDurableStore::new();
        store.open_group("g").unwrap();
        let key = QueueKey::new("g", "n");

        store.set_intent(&key, true).unwrap();
        assert!(store.intents("g").unwrap().contains("n"));

        store.set_intent(&key, false).unwrap();
        assert!(store.intents("g").unwrap().is_empty());
    }

    #[test]
    fn test_unavailable_store_fails_everything() {
        let store = InMemoryDurableStore::new();
        store.open_group("g").unwrap();
        store.set_available(false);

        let key = QueueKey::new("g", "n");
        assert!(store.append(&key, &entry(1, 1)).is_err());
        assert!(store.read_all(&key).is_err());
        assert!(store.open_group("g").is_err());

        store.set_available(true);
        assert!(store.read_all(&key).unwrap().is_empty());
    }
}
