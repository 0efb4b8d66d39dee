//! Observable key/value properties attached to an owner.
//!
//! A [`PropertySet`] is the owner's property storage; every change triggers
//! the key-path observations whose source is that owner. Observations may
//! ask for a prior ("will change") event and for the current value at
//! registration time.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::event::{ChangeKind, DetectedEvent, EventMetadata};
use crate::hub::Hub;
use crate::observation::{Observation, ObservationBuilder, ObservationId, Selector};
use crate::owner::Owner;
use crate::payload::Payload;

use super::{interested, EventSource, RegistryEntryView};

/// Key/value bag whose changes are observable by key path.
#[derive(Debug)]
pub struct PropertySet {
    hub: Hub,
    owner: Owner,
    values: Mutex<BTreeMap<String, Payload>>,
    wants_prior: Mutex<HashSet<ObservationId>>,
}

#[derive(Debug, Clone)]
struct Change {
    key_path: String,
    kind: ChangeKind,
    old: Option<Payload>,
    new: Option<Payload>,
    indexes: BTreeSet<usize>,
}

impl Change {
    fn metadata(&self, prior: bool) -> EventMetadata {
        EventMetadata::KeyValue {
            key_path: self.key_path.clone(),
            kind: self.kind,
            old: self.old.clone(),
            new: if prior { None } else { self.new.clone() },
            prior,
            indexes: self.indexes.clone(),
        }
    }
}

impl PropertySet {
    #[must_use]
    pub fn new(hub: &Hub, owner: &Owner) -> Self {
        Self {
            hub: hub.clone(),
            owner: owner.clone(),
            values: Mutex::new(BTreeMap::new()),
            wants_prior: Mutex::new(HashSet::new()),
        }
    }

    #[must_use]
    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    fn values(&self) -> MutexGuard<'_, BTreeMap<String, Payload>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn get(&self, key_path: &str) -> Option<Payload> {
        self.values().get(key_path).cloned()
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.values().keys().cloned().collect()
    }

    /// Start building an observation of `key_paths` on this set's owner.
    pub fn observe<I, S>(&self, key_paths: I) -> ObservationBuilder<'_>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hub
            .observe(Selector::key_paths(key_paths))
            .source(&self.owner)
    }

    /// Also send `observation` a prior event before each change.
    pub fn request_prior(&self, observation: &Observation) {
        self.wants_prior
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(observation.id());
    }

    /// Send `observation` the current value of each watched key path that
    /// has one, as a `Setting` change with no old value.
    pub fn send_initial(&self, observation: &Observation) {
        let Selector::KeyPaths { key_paths } = observation.selector() else {
            return;
        };
        let current: Vec<(String, Payload)> = {
            let values = self.values();
            key_paths
                .iter()
                .filter_map(|k| values.get(k).map(|v| (k.clone(), v.clone())))
                .collect()
        };
        for (key_path, value) in current {
            let change = Change {
                key_path,
                kind: ChangeKind::Setting,
                old: None,
                new: Some(value.clone()),
                indexes: BTreeSet::new(),
            };
            observation.trigger(false, |event| {
                event.payload = value;
                event.metadata = change.metadata(false);
            });
        }
    }

    /// Set a value. Returns the previous one.
    pub fn set(&self, key_path: &str, value: impl Into<Payload>) -> Option<Payload> {
        let value = value.into();
        let old = self.get(key_path);
        self.apply(Change {
            key_path: key_path.to_string(),
            kind: ChangeKind::Setting,
            old: old.clone(),
            new: Some(value),
            indexes: BTreeSet::new(),
        });
        old
    }

    /// Remove a value. Returns it, or None (and notifies nobody) if unset.
    pub fn remove(&self, key_path: &str) -> Option<Payload> {
        let old = self.get(key_path)?;
        self.apply(Change {
            key_path: key_path.to_string(),
            kind: ChangeKind::Removal,
            old: Some(old.clone()),
            new: None,
            indexes: BTreeSet::new(),
        });
        Some(old)
    }

    /// Insert into an array property. Returns false if the property is not
    /// an array (an unset property counts as empty) or `index` is past its
    /// end.
    pub fn insert_at(&self, key_path: &str, index: usize, value: impl Into<Payload>) -> bool {
        let value = value.into();
        self.edit_array(key_path, index, ChangeKind::Insertion, |items| {
            if index > items.len() {
                return None;
            }
            items.insert(index, value.clone());
            Some((None, Some(value)))
        })
    }

    /// Remove from an array property. Returns false if there is no element
    /// at `index`.
    pub fn remove_at(&self, key_path: &str, index: usize) -> bool {
        self.edit_array(key_path, index, ChangeKind::Removal, |items| {
            (index < items.len()).then(|| (Some(items.remove(index)), None))
        })
    }

    /// Replace an element of an array property. Returns false if there is
    /// no element at `index`.
    pub fn replace_at(&self, key_path: &str, index: usize, value: impl Into<Payload>) -> bool {
        let value = value.into();
        self.edit_array(key_path, index, ChangeKind::Replacement, |items| {
            let slot = items.get_mut(index)?;
            let old = std::mem::replace(slot, value.clone());
            Some((Some(old), Some(value)))
        })
    }

    fn edit_array<F>(&self, key_path: &str, index: usize, kind: ChangeKind, edit: F) -> bool
    where
        F: FnOnce(&mut Vec<Payload>) -> Option<(Option<Payload>, Option<Payload>)>,
    {
        let mut items = match self.get(key_path) {
            None => Vec::new(),
            Some(Payload::Array(items)) => items,
            Some(_) => return false,
        };
        let Some((old, new)) = edit(&mut items) else {
            return false;
        };

        let change = Change {
            key_path: key_path.to_string(),
            kind,
            old,
            new,
            indexes: BTreeSet::from([index]),
        };
        self.notify(&change, true);
        self.values().insert(key_path.to_string(), Payload::Array(items));
        self.notify(&change, false);
        true
    }

    fn apply(&self, change: Change) {
        self.notify(&change, true);
        {
            let mut values = self.values();
            match &change.new {
                Some(v) => values.insert(change.key_path.clone(), v.clone()),
                None => values.remove(&change.key_path),
            };
        }
        self.notify(&change, false);
    }

    fn notify(&self, change: &Change, prior: bool) {
        let watching = KeyPathChange { set: self, key_path: &change.key_path };
        let targets = interested(&self.hub, |entry| watching.wants(entry));

        let wants_prior: HashSet<ObservationId> = if prior {
            let all = self.wants_prior.lock().unwrap_or_else(PoisonError::into_inner);
            targets.iter().map(Observation::id).filter(|id| all.contains(id)).collect()
        } else {
            HashSet::new()
        };

        for observation in &targets {
            if prior && !wants_prior.contains(&observation.id()) {
                continue;
            }
            observation.trigger(false, |event| {
                event.payload = if prior {
                    change.old.clone().unwrap_or_default()
                } else {
                    change.new.clone().unwrap_or_default()
                };
                event.metadata = change.metadata(prior);
            });
        }
    }
}

/// A change to one key path of one property set.
struct KeyPathChange<'a> {
    set: &'a PropertySet,
    key_path: &'a str,
}

impl EventSource for KeyPathChange<'_> {
    fn hub(&self) -> &Hub {
        &self.set.hub
    }

    fn wants(&self, entry: &RegistryEntryView<'_>) -> bool {
        entry.source() == Some(self.set.owner.id()) && entry.selector().watches_key_path(self.key_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::Delivery;
    use std::sync::{Arc, Mutex as StdMutex};

    type Seen = Arc<StdMutex<Vec<EventMetadata>>>;

    fn watch(props: &PropertySet, observer: &Owner, keys: &[&str]) -> (Observation, Seen) {
        let seen: Seen = Arc::new(StdMutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let obs = props
            .observe(keys.iter().copied())
            .observer(observer)
            .on_event(move |d: &Delivery| s.lock().unwrap().push(d.metadata().clone()))
            .unwrap();
        (obs, seen)
    }

    #[test]
    fn test_set_reports_old_and_new() {
        let hub = Hub::new();
        let model = Owner::new("model");
        let observer = Owner::new("observer");
        let props = PropertySet::new(&hub, &model);
        let (_obs, seen) = watch(&props, &observer, &["title"]);

        assert_eq!(props.set("title", "a"), None);
        assert_eq!(props.set("title", "b"), Some(Payload::from("a")));
        props.set("other", 1);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(
            seen[1],
            EventMetadata::KeyValue {
                key_path: "title".to_string(),
                kind: ChangeKind::Setting,
                old: Some(Payload::from("a")),
                new: Some(Payload::from("b")),
                prior: false,
                indexes: BTreeSet::new(),
            }
        );
    }

    #[test]
    fn test_prior_only_when_requested() {
        let hub = Hub::new();
        let model = Owner::new("model");
        let observer = Owner::new("observer");
        let props = PropertySet::new(&hub, &model);
        let (obs, seen) = watch(&props, &observer, &["x"]);

        props.set("x", 1);
        props.request_prior(&obs);
        props.set("x", 2);

        let priors: Vec<bool> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|m| matches!(m, EventMetadata::KeyValue { prior: true, .. }))
            .collect();
        assert_eq!(priors, vec![false, true, false]);
    }

    #[test]
    fn test_array_edits_report_kind_and_index() {
        let hub = Hub::new();
        let model = Owner::new("model");
        let observer = Owner::new("observer");
        let props = PropertySet::new(&hub, &model);
        let (_obs, seen) = watch(&props, &observer, &["items"]);

        assert!(props.insert_at("items", 0, "a"));
        assert!(props.insert_at("items", 1, "b"));
        assert!(props.replace_at("items", 0, "z"));
        assert!(props.remove_at("items", 1));
        assert!(!props.remove_at("items", 5));
        props.set("scalar", 1);
        assert!(!props.insert_at("scalar", 0, "x"));

        let kinds: Vec<(ChangeKind, Vec<usize>)> = seen
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| match m {
                EventMetadata::KeyValue { kind, indexes, .. } => {
                    Some((*kind, indexes.iter().copied().collect()))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                (ChangeKind::Insertion, vec![0]),
                (ChangeKind::Insertion, vec![1]),
                (ChangeKind::Replacement, vec![0]),
                (ChangeKind::Removal, vec![1]),
            ]
        );
        assert_eq!(props.get("items"), Some(Payload::Array(vec![Payload::from("z")])));
    }

    #[test]
    fn test_send_initial_and_multiple_key_paths() {
        let hub = Hub::new();
        let model = Owner::new("model");
        let observer = Owner::new("observer");
        let props = PropertySet::new(&hub, &model);
        props.set("a", 1);

        let (obs, seen) = watch(&props, &observer, &["a", "b"]);
        props.send_initial(&obs);
        props.set("b", 2);
        assert_eq!(props.remove("a"), Some(Payload::Int(1)));
        assert_eq!(props.remove("a"), None);

        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_dropping_model_removes_observation() {
        let hub = Hub::new();
        let model = Owner::new("model");
        let observer = Owner::new("observer");
        let props = PropertySet::new(&hub, &model);
        let (obs, _seen) = watch(&props, &observer, &["a"]);

        drop(props);
        drop(model);
        assert!(!obs.is_registered());
        assert!(observer.observations().is_empty());
    }
}
