//! Process-wide index of live observations.
//!
//! Keyed by owner and observation ids only; entries hold weak references so
//! the registry never keeps an observation (or its owners) alive. Entries
//! whose observation is gone are pruned lazily, whenever the registry is
//! consulted.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::observation::{Observation, ObservationId, ObservationInner, Selector};
use crate::owner::OwnerId;

/// Identity of one registered observation.
#[derive(Debug, Clone)]
pub(crate) struct RegistryEntry {
    pub(crate) id: ObservationId,
    pub(crate) observer: Option<OwnerId>,
    pub(crate) source: Option<OwnerId>,
    pub(crate) selector: Selector,
    pub(crate) reliable: bool,
    observation: Weak<ObservationInner>,
}

impl RegistryEntry {
    pub(crate) fn for_observation(observation: &Observation) -> Self {
        Self {
            id: observation.id(),
            observer: observation.observer_id(),
            source: observation.source_id(),
            selector: observation.selector().clone(),
            reliable: observation.is_reliable(),
            observation: Arc::downgrade(&observation.inner),
        }
    }

    fn same_identity(&self, other: &Self) -> bool {
        self.observer == other.observer
            && self.source == other.source
            && self.selector == other.selector
    }

    fn is_live(&self) -> bool {
        self.observation.strong_count() > 0
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    entries: HashMap<ObservationId, RegistryEntry>,
    by_owner: HashMap<OwnerId, HashSet<ObservationId>>,
}

impl RegistryState {
    fn unlink(&mut self, id: ObservationId) -> Option<RegistryEntry> {
        let entry = self.entries.remove(&id)?;
        for owner in [entry.observer, entry.source].into_iter().flatten() {
            if let Some(ids) = self.by_owner.get_mut(&owner) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.by_owner.remove(&owner);
                }
            }
        }
        Some(entry)
    }

    fn prune(&mut self) {
        let dead: Vec<ObservationId> = self
            .entries
            .values()
            .filter(|e| !e.is_live())
            .map(|e| e.id)
            .collect();
        for id in dead {
            self.unlink(id);
        }
    }

    fn candidates(&self, anchor: Option<OwnerId>) -> Vec<&RegistryEntry> {
        match anchor {
            Some(owner) => self
                .by_owner
                .get(&owner)
                .into_iter()
                .flatten()
                .filter_map(|id| self.entries.get(id))
                .collect(),
            None => self.entries.values().collect(),
        }
    }
}

/// Owner-indexed registry of observations.
///
/// Upgraded observations are only ever returned, never dropped, while the
/// lock is held: the last handle to an observation may own a callback whose
/// captured owners re-enter the registry when released.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    state: Mutex<RegistryState>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `entry` unless a live entry with the same (observer, source,
    /// selector) exists. Check and insert are one atomic step.
    pub(crate) fn insert_unique(&self, entry: RegistryEntry) -> bool {
        let mut state = self.lock();

        let anchor = entry.observer.or(entry.source);
        let mut dead = Vec::new();
        for existing in state.candidates(anchor) {
            if !existing.is_live() {
                dead.push(existing.id);
            } else if existing.same_identity(&entry) {
                return false;
            }
        }
        for id in dead {
            state.unlink(id);
        }

        for owner in [entry.observer, entry.source].into_iter().flatten() {
            state.by_owner.entry(owner).or_default().insert(entry.id);
        }
        state.entries.insert(entry.id, entry);
        true
    }

    /// Find the live observation matching the given owners and selector.
    /// An absent owner matches any.
    pub(crate) fn find(
        &self,
        observer: Option<OwnerId>,
        source: Option<OwnerId>,
        selector: &Selector,
    ) -> Option<Observation> {
        let mut state = self.lock();
        state.prune();
        state
            .candidates(observer.or(source))
            .into_iter()
            .filter(|e| {
                observer.map_or(true, |o| e.observer == Some(o))
                    && source.map_or(true, |s| e.source == Some(s))
                    && &e.selector == selector
            })
            .find_map(|e| e.observation.upgrade())
            .map(Observation::from_inner)
    }

    /// Every live observation whose entry satisfies `pred`.
    pub(crate) fn find_all<P>(&self, pred: P) -> Vec<Observation>
    where
        P: Fn(&RegistryEntry) -> bool,
    {
        let mut state = self.lock();
        state.prune();
        state
            .entries
            .values()
            .filter(|e| pred(e))
            .filter_map(|e| e.observation.upgrade())
            .map(Observation::from_inner)
            .collect()
    }

    pub(crate) fn remove(&self, id: ObservationId) -> bool {
        self.lock().unlink(id).is_some()
    }

    /// Number of live entries.
    pub(crate) fn len(&self) -> usize {
        let mut state = self.lock();
        state.prune();
        state.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use crate::observation::Selector;
    use crate::owner::Owner;
    use crate::Hub;

    #[test]
    fn test_find_by_either_owner() {
        let hub = Hub::new();
        let observer = Owner::new("observer");
        let source = Owner::new("source");
        let sel = Selector::notification("n");
        let obs = hub
            .observe(sel.clone())
            .observer(&observer)
            .source(&source)
            .on_event(|_| {})
            .unwrap();

        let registry = &hub.shared().registry;
        assert_eq!(registry.find(Some(observer.id()), None, &sel), Some(obs.clone()));
        assert_eq!(registry.find(None, Some(source.id()), &sel), Some(obs.clone()));
        assert_eq!(
            registry.find(Some(observer.id()), Some(source.id()), &sel),
            Some(obs.clone())
        );
        assert!(registry
            .find(Some(source.id()), None, &sel)
            .is_none());
        assert!(registry
            .find(Some(observer.id()), None, &Selector::notification("other"))
            .is_none());

        obs.remove();
        assert!(registry.find(Some(observer.id()), None, &sel).is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_owner_drop_removes_entries() {
        let hub = Hub::new();
        let source = Owner::new("source");
        let sel = Selector::notification("n");
        hub.observe(sel.clone()).source(&source).on_event(|_| {}).unwrap();
        let id = source.id();
        assert_eq!(hub.shared().registry.len(), 1);

        drop(source);
        assert!(hub.shared().registry.find(None, Some(id), &sel).is_none());
        assert_eq!(hub.shared().registry.len(), 0);
    }

    #[test]
    fn test_find_all_by_selector() {
        let hub = Hub::new();
        let a = Owner::new("a");
        let b = Owner::new("b");
        hub.observe(Selector::notification("x")).source(&a).on_event(|_| {}).unwrap();
        hub.observe(Selector::notification("x")).source(&b).on_event(|_| {}).unwrap();
        hub.observe(Selector::notification("y")).source(&a).on_event(|_| {}).unwrap();

        let xs = hub
            .shared()
            .registry
            .find_all(|e| e.selector == Selector::notification("x"));
        assert_eq!(xs.len(), 2);
    }

    #[test]
    fn test_unreachable_observation_is_not_counted() {
        let hub = Hub::new();
        let observer = Owner::new("observer");
        let source = Owner::new("source");
        let sel = Selector::notification("n");
        let obs = hub
            .observe(sel.clone())
            .observer(&observer)
            .source(&source)
            .remove_automatically(false)
            .on_event(|_| {})
            .unwrap();
        let source_id = source.id();

        drop(observer);
        drop(source);
        assert!(obs.is_registered());
        assert_eq!(hub.observation_count(), 1);

        drop(obs);
        assert_eq!(hub.observation_count(), 0);
        assert!(hub.shared().registry.find(None, Some(source_id), &sel).is_none());
        assert!(hub.shared().registry.find_all(|_| true).is_empty());
    }
}
