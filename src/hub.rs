//! The hub: explicit process-wide context for observations.
//!
//! A [`Hub`] owns the registry, the reliable-delivery subsystem, the set of
//! registered app groups and the injected collaborators (durable store and
//! group signal). Every observation is created through a hub and keeps a
//! reference to its shared state, so a hub can be cloned and passed around
//! freely.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;

use crate::config::{GroupPattern, HubConfig};
use crate::error::{DeliveryError, WatchError, WatchResult};
use crate::observation::{Observation, ObservationBuilder, Selector};
use crate::owner::Owner;
use crate::payload::Payload;
use crate::registry::Registry;
use crate::reliable::{
    should_collect, GroupSignal, LocalSignal, ReliableDelivery, ReliableStats, SignalSubscription,
};
use crate::storage::{DurableEntry, DurableStore, InMemoryDurableStore, QueueKey, StorageError};

/// Registered groups in registration order; the last one is the default.
#[derive(Debug, Default)]
struct GroupTable {
    groups: Vec<(String, SignalSubscription)>,
}

impl GroupTable {
    fn position(&self, group: &str) -> Option<usize> {
        self.groups.iter().position(|(g, _)| g == group)
    }

    fn default_group(&self) -> Option<&str> {
        self.groups.last().map(|(g, _)| g.as_str())
    }
}

/// How far plain observations have been fed from a queue that is kept for a
/// reliable subscriber. A queue only grows until it is taken whole, so its
/// first entry identifies it and a count of entries is enough.
#[derive(Debug)]
struct ForwardCursor {
    first: DurableEntry,
    seen: usize,
}

pub(crate) struct HubShared {
    pub(crate) config: HubConfig,
    pub(crate) registry: Registry,
    pub(crate) reliable: ReliableDelivery,
    group_pattern: GroupPattern,
    groups: Mutex<GroupTable>,
    forwarded: Mutex<HashMap<QueueKey, ForwardCursor>>,
    store: Arc<dyn DurableStore>,
    signal: Arc<dyn GroupSignal>,
}

impl HubShared {
    fn groups(&self) -> MutexGuard<'_, GroupTable> {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_group_registered(&self, group: &str) -> bool {
        self.groups().position(group).is_some()
    }

    fn resolve_group(&self, group: Option<&str>) -> WatchResult<String> {
        let resolved = match group {
            Some(g) => g.to_string(),
            None => self
                .groups()
                .default_group()
                .map(str::to_string)
                .ok_or_else(|| WatchError::MissingPrecondition {
                    group: "(default)".to_string(),
                })?,
        };
        if self.is_group_registered(&resolved) {
            Ok(resolved)
        } else {
            Err(WatchError::MissingPrecondition { group: resolved })
        }
    }

    /// Live app-group observations of `group`, by post name.
    fn live_by_name(&self, group: &str) -> BTreeMap<String, Vec<Observation>> {
        let mut by_name: BTreeMap<String, Vec<Observation>> = BTreeMap::new();
        for observation in self
            .registry
            .find_all(|e| e.selector.group() == Some(group))
        {
            if let Some(name) = observation.selector().name() {
                by_name.entry(name.to_string()).or_default().push(observation);
            }
        }
        by_name
    }

    /// Forward delivery after a group signal.
    ///
    /// A queue is drained when an accepting reliable observation exists, or
    /// when nobody intends to read it later. Otherwise it stays in the store
    /// and plain observations get copies of the entries they have not seen.
    fn deliver_group(&self, group: &str) {
        if !self.is_group_registered(group) {
            return;
        }

        for (name, observations) in self.live_by_name(group) {
            let reliable_ready = observations
                .iter()
                .any(|o| o.is_reliable() && o.is_accepting());
            // All paused and reliable: leave the posts durable for resume.
            if !reliable_ready && !observations.iter().any(Observation::is_accepting) {
                continue;
            }

            let key = QueueKey::new(group, name.as_str());
            let keep = !reliable_ready
                && (observations.iter().any(Observation::is_reliable)
                    || self.reliable.intent_recorded(&key));
            let entries = if keep {
                self.reliable.peek(&key)
            } else {
                self.reliable.drain(&key)
            };
            let fresh = self.advance_cursor(&key, &entries, keep);
            if entries.len() == fresh {
                continue;
            }
            tracing::trace!(group, name = %name, entries = entries.len(), fresh = entries.len() - fresh, keep, "delivering posts");

            for observation in &observations {
                let due = match (observation.is_reliable(), keep) {
                    (true, true) => continue,
                    (true, false) => &entries[..],
                    (false, _) => &entries[fresh..],
                };
                if due.is_empty() {
                    continue;
                }
                let events = observation.events_from_entries(group, due.to_vec());
                observation.trigger_events(events, false);
            }
        }
    }

    fn forwarded(&self) -> MutexGuard<'_, HashMap<QueueKey, ForwardCursor>> {
        self.forwarded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of leading `entries` plain observations already had. Records
    /// all of them as had when the queue stays in the store.
    fn advance_cursor(&self, key: &QueueKey, entries: &[DurableEntry], kept: bool) -> usize {
        let mut cursors = self.forwarded();
        let seen = match cursors.get(key) {
            Some(cursor) if entries.first() == Some(&cursor.first) => cursor.seen.min(entries.len()),
            _ => 0,
        };
        match entries.first() {
            Some(first) if kept => {
                cursors.insert(
                    key.clone(),
                    ForwardCursor {
                        first: first.clone(),
                        seen: entries.len(),
                    },
                );
            }
            _ => {
                cursors.remove(key);
            }
        }
        seen
    }

    /// Start a new plain observation of `key` at the next post rather than
    /// at whatever is already waiting in the store.
    pub(crate) fn skip_pending(&self, key: &QueueKey) {
        let entries = self.reliable.peek(key);
        self.advance_cursor(key, &entries, true);
    }

    fn collect_garbage(&self, group: &str) -> Result<usize, StorageError> {
        let live: BTreeSet<String> = self.live_by_name(group).into_keys().collect();
        self.reliable.collect_garbage(group, &live)
    }
}

impl Drop for HubShared {
    fn drop(&mut self) {
        let table = std::mem::take(self.groups.get_mut().unwrap_or_else(PoisonError::into_inner));
        for (group, subscription) in table.groups {
            self.signal.unsubscribe(&group, subscription);
        }
    }
}

/// Process-wide observation context.
#[derive(Clone)]
pub struct Hub {
    shared: Arc<HubShared>,
}

impl Hub {
    /// A hub with default configuration, an in-memory durable store and an
    /// in-process signal.
    ///
    /// # Panics
    /// Never in practice: the default configuration always validates.
    #[must_use]
    pub fn new() -> Self {
        Self::with_collaborators(
            HubConfig::default(),
            Arc::new(InMemoryDurableStore::new()),
            Arc::new(LocalSignal::new()),
        )
        .expect("default hub configuration is valid")
    }

    /// A hub over a specific durable store, with an in-process signal.
    ///
    /// # Errors
    /// Returns `Validation` if `config` does not validate.
    pub fn with_store(config: HubConfig, store: Arc<dyn DurableStore>) -> WatchResult<Self> {
        Self::with_collaborators(config, store, Arc::new(LocalSignal::new()))
    }

    /// A hub over the given store and signal. Hubs sharing both behave like
    /// separate processes attached to the same groups.
    ///
    /// # Errors
    /// Returns `Validation` if `config` does not validate.
    pub fn with_collaborators(
        config: HubConfig,
        store: Arc<dyn DurableStore>,
        signal: Arc<dyn GroupSignal>,
    ) -> WatchResult<Self> {
        let config = config.validate()?;
        let group_pattern = config.compile_group_pattern()?;
        Ok(Self {
            shared: Arc::new(HubShared {
                config,
                registry: Registry::new(),
                reliable: ReliableDelivery::new(Arc::clone(&store)),
                group_pattern,
                groups: Mutex::new(GroupTable::default()),
                forwarded: Mutex::new(HashMap::new()),
                store,
                signal,
            }),
        })
    }

    pub(crate) fn shared(&self) -> &Arc<HubShared> {
        &self.shared
    }

    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.shared.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.shared.store
    }

    /// Start building an observation for `selector`.
    pub fn observe(&self, selector: Selector) -> ObservationBuilder<'_> {
        ObservationBuilder::new(self, selector)
    }

    /// Start building an app-group observation; `None` uses the default
    /// group.
    ///
    /// # Errors
    /// Returns `MissingPrecondition` if the group is not registered (or no
    /// group is, when defaulting).
    pub fn observe_app_group(
        &self,
        group: Option<&str>,
        name: impl Into<String>,
    ) -> WatchResult<ObservationBuilder<'_>> {
        let group = self.shared.resolve_group(group)?;
        Ok(self.observe(Selector::app_group(group, name)))
    }

    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    /// Register an app group: validate the identifier, open its container in
    /// the durable store, subscribe to its signal and make it the default
    /// group. Returns false if it was already registered (it still becomes
    /// the default).
    ///
    /// # Errors
    /// - `Validation` for an identifier that fails the group pattern
    /// - `Delivery(StorageUnavailable)` if the container cannot be opened
    pub fn register_group(&self, group: &str) -> WatchResult<bool> {
        self.shared.group_pattern.check(group)?;

        let mut table = self.shared.groups();
        if let Some(pos) = table.position(group) {
            let entry = table.groups.remove(pos);
            table.groups.push(entry);
            return Ok(false);
        }

        self.shared.reliable.open_group(group)?;

        let weak: Weak<HubShared> = Arc::downgrade(&self.shared);
        let subscription = self.shared.signal.subscribe(
            group,
            Arc::new(move |signalled: &str| {
                if let Some(shared) = weak.upgrade() {
                    shared.deliver_group(signalled);
                }
            }),
        );
        table.groups.push((group.to_string(), subscription));

        tracing::debug!(group, "group registered");
        Ok(true)
    }

    /// Stop taking part in `group`. Posts to it are refused and signals for
    /// it are ignored until it is registered again.
    pub fn deregister_group(&self, group: &str) -> bool {
        let removed = {
            let mut table = self.shared.groups();
            table.position(group).map(|pos| table.groups.remove(pos))
        };
        match removed {
            Some((group, subscription)) => {
                self.shared.signal.unsubscribe(&group, subscription);
                tracing::debug!(group = %group, "group deregistered");
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_group_registered(&self, group: &str) -> bool {
        self.shared.is_group_registered(group)
    }

    /// The most recently registered group still registered.
    #[must_use]
    pub fn default_group(&self) -> Option<String> {
        self.shared.groups().default_group().map(str::to_string)
    }

    #[must_use]
    pub fn registered_groups(&self) -> Vec<String> {
        self.shared
            .groups()
            .groups
            .iter()
            .map(|(g, _)| g.clone())
            .collect()
    }

    // ------------------------------------------------------------------
    // Posting
    // ------------------------------------------------------------------

    /// Post `payload` under `name` in `group` (`None`: the default group).
    ///
    /// The post is stored durably, every participant of the group is
    /// signalled, and in-process observations receive it before this
    /// returns (on their dispatch targets).
    ///
    /// # Errors
    /// - `MissingPrecondition` for an unregistered group
    /// - `Delivery(Serialization)` if the payload cannot be encoded
    /// - `Delivery(StorageUnavailable)` if the store refused the write
    /// - `Delivery(NoSubscribers)` when posts without subscribers are not
    ///   permitted and nobody listens for `name`
    pub fn post(
        &self,
        group: Option<&str>,
        name: &str,
        payload: impl Into<Payload>,
    ) -> WatchResult<()> {
        let group = self.shared.resolve_group(group)?;
        let key = QueueKey::new(group.as_str(), name);
        let payload = payload.into();
        if !payload.is_storable() {
            return Err(DeliveryError::Serialization {
                message: format!("{} payload holds a non-finite float", payload.type_name()),
            }
            .into());
        }

        if !self.shared.config.permit_posts_without_subscribers {
            let selector = Selector::app_group(group.as_str(), name);
            let live = self.shared.registry.find_all(|e| e.selector == selector);
            if live.is_empty() && !self.shared.reliable.has_intent(&key)? {
                return Err(DeliveryError::NoSubscribers {
                    group,
                    name: name.to_string(),
                }
                .into());
            }
        }

        self.shared
            .reliable
            .append(&key, payload)
            .map_err(|e| match e {
                StorageError::SerializationError(message) => {
                    WatchError::from(DeliveryError::Serialization { message })
                }
                other => other.into(),
            })?;

        self.shared.signal.post_signal(&group);

        if should_collect(self.shared.config.cleanup_frequency) {
            if let Err(e) = self.shared.collect_garbage(&group) {
                tracing::warn!(group = %group, error = %e, "garbage collection after post failed");
            }
        }
        Ok(())
    }

    /// Post any serializable value.
    ///
    /// # Errors
    /// `Delivery(Serialization)` if `value` cannot be represented as a
    /// payload, otherwise as [`Hub::post`].
    pub fn post_serialize<T: Serialize + ?Sized>(
        &self,
        group: Option<&str>,
        name: &str,
        value: &T,
    ) -> WatchResult<()> {
        let payload = Payload::from_serialize(value).map_err(|e| {
            WatchError::from(DeliveryError::Serialization {
                message: e.to_string(),
            })
        })?;
        self.post(group, name, payload)
    }

    /// Empty the durable queue for `name` without delivering it.
    ///
    /// # Errors
    /// `MissingPrecondition` for an unregistered group, or
    /// `Delivery(StorageUnavailable)`.
    pub fn discard(&self, group: Option<&str>, name: &str) -> WatchResult<()> {
        let group = self.shared.resolve_group(group)?;
        Ok(self.shared.reliable.discard(&QueueKey::new(group, name))?)
    }

    /// Discard the queue for `name` and withdraw any reliable intent, even
    /// one recorded by an earlier process.
    ///
    /// # Errors
    /// `MissingPrecondition` for an unregistered group.
    pub fn stop_reliable_collection(&self, group: Option<&str>, name: &str) -> WatchResult<()> {
        let group = self.shared.resolve_group(group)?;
        self.shared.reliable.stop_collection(&QueueKey::new(group, name));
        Ok(())
    }

    /// Evict queues in `group` (`None`: the default group) that have neither
    /// a reliable intent nor a live observation. Returns how many went.
    ///
    /// # Errors
    /// `MissingPrecondition` for an unregistered group, or
    /// `Delivery(StorageUnavailable)`.
    pub fn collect_garbage(&self, group: Option<&str>) -> WatchResult<usize> {
        let group = self.shared.resolve_group(group)?;
        Ok(self.shared.collect_garbage(&group)?)
    }

    #[must_use]
    pub fn reliable_stats(&self) -> ReliableStats {
        self.shared.reliable.stats()
    }

    // ------------------------------------------------------------------
    // Lookup by identity
    // ------------------------------------------------------------------

    /// The registered observation for these owners and selector. A missing
    /// owner matches any.
    #[must_use]
    pub fn find(
        &self,
        observer: Option<&Owner>,
        source: Option<&Owner>,
        selector: &Selector,
    ) -> Option<Observation> {
        self.shared
            .registry
            .find(observer.map(Owner::id), source.map(Owner::id), selector)
    }

    /// Remove the matching observation. Returns false if none was found.
    pub fn remove_matching(
        &self,
        observer: Option<&Owner>,
        source: Option<&Owner>,
        selector: &Selector,
    ) -> bool {
        self.find(observer, source, selector)
            .is_some_and(|o| o.remove())
    }

    /// Pause the matching observation. Returns false if none was found.
    pub fn pause_matching(
        &self,
        observer: Option<&Owner>,
        source: Option<&Owner>,
        selector: &Selector,
    ) -> bool {
        self.find(observer, source, selector)
            .is_some_and(|o| o.pause())
    }

    /// Resume the matching observation. Returns false if none was found.
    pub fn resume_matching(
        &self,
        observer: Option<&Owner>,
        source: Option<&Owner>,
        selector: &Selector,
    ) -> bool {
        self.find(observer, source, selector)
            .is_some_and(|o| o.resume())
    }

    /// Remove `observer`'s observation of `name` in `group`.
    ///
    /// With `retain_state` a reliable queue keeps collecting for a later
    /// observation; without it the queue and intent are dropped, even when no
    /// observation is currently registered. Returns true if an observation
    /// was removed.
    pub fn remove_app_group_observation(
        &self,
        observer: &Owner,
        group: Option<&str>,
        name: &str,
        retain_state: bool,
    ) -> bool {
        let Ok(group) = self.shared.resolve_group(group) else {
            return false;
        };
        let selector = Selector::app_group(group.as_str(), name);
        match self.find(Some(observer), None, &selector) {
            Some(observation) if retain_state => observation.remove(),
            Some(observation) => observation.remove_stopping_reliable_collection(),
            None => {
                if !retain_state {
                    self.shared
                        .reliable
                        .stop_collection(&QueueKey::new(group, name));
                }
                false
            }
        }
    }

    /// Number of registered observations.
    #[must_use]
    pub fn observation_count(&self) -> usize {
        self.shared.registry.len()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("config", &self.shared.config)
            .field("groups", &self.registered_groups())
            .field("observations", &self.observation_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::Delivery;
    use std::sync::Mutex as StdMutex;

    const GROUP: &str = "group.test.shared";

    fn values(log: &StdMutex<Vec<Vec<i64>>>) -> Vec<Vec<i64>> {
        log.lock().unwrap().clone()
    }

    fn recorder() -> (Arc<StdMutex<Vec<Vec<i64>>>>, impl Fn(&Delivery) + Send + Sync + 'static) {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        (log, move |d: &Delivery| {
            sink.lock()
                .unwrap()
                .push(d.events().iter().filter_map(|e| e.payload.as_int()).collect());
        })
    }

    #[test]
    fn test_register_group_validates_and_defaults() {
        let hub = Hub::new();
        assert!(hub.register_group("not a group").unwrap_err().is_validation());

        assert!(hub.register_group("group.a").unwrap());
        assert!(hub.register_group("group.b").unwrap());
        assert_eq!(hub.default_group().as_deref(), Some("group.b"));

        assert!(!hub.register_group("group.a").unwrap());
        assert_eq!(hub.default_group().as_deref(), Some("group.a"));

        assert!(hub.deregister_group("group.a"));
        assert!(!hub.deregister_group("group.a"));
        assert_eq!(hub.default_group().as_deref(), Some("group.b"));
    }

    #[test]
    fn test_post_requires_registered_group() {
        let hub = Hub::new();
        assert!(hub.post(None, "n", 1).unwrap_err().is_missing_precondition());
        assert!(hub
            .post(Some(GROUP), "n", 1)
            .unwrap_err()
            .is_missing_precondition());
    }

    #[test]
    fn test_post_reaches_live_observation() {
        let hub = Hub::new();
        hub.register_group(GROUP).unwrap();
        let observer = Owner::new("observer");
        let (log, cb) = recorder();
        hub.observe_app_group(None, "n")
            .unwrap()
            .observer(&observer)
            .on_event(cb)
            .unwrap();

        hub.post(None, "n", 1).unwrap();
        hub.post(Some(GROUP), "n", 2).unwrap();
        hub.post(None, "other", 3).unwrap();

        assert_eq!(values(&log), vec![vec![1], vec![2]]);
        assert!(hub
            .store()
            .read_all(&QueueKey::new(GROUP, "n"))
            .unwrap()
            .is_empty());
        assert_eq!(
            hub.store().read_all(&QueueKey::new(GROUP, "other")).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_deregistered_group_ignores_signals() {
        let store: Arc<dyn DurableStore> = Arc::new(InMemoryDurableStore::new());
        let signal = Arc::new(LocalSignal::new());
        let poster = Hub::with_collaborators(HubConfig::default(), Arc::clone(&store), signal.clone()).unwrap();
        let listener = Hub::with_collaborators(HubConfig::default(), Arc::clone(&store), signal.clone()).unwrap();
        poster.register_group(GROUP).unwrap();
        listener.register_group(GROUP).unwrap();

        let observer = Owner::new("observer");
        let (log, cb) = recorder();
        listener
            .observe(Selector::app_group(GROUP, "n"))
            .observer(&observer)
            .on_event(cb)
            .unwrap();

        poster.post(None, "n", 1).unwrap();
        assert!(listener.deregister_group(GROUP));
        poster.post(None, "n", 2).unwrap();

        assert_eq!(values(&log), vec![vec![1]]);
        assert_eq!(signal.subscriber_count(GROUP), 1);
    }

    #[test]
    fn test_no_subscribers_rejected_when_not_permitted() {
        let config = HubConfig::default().with_permit_posts_without_subscribers(false);
        let hub = Hub::with_store(config, Arc::new(InMemoryDurableStore::new())).unwrap();
        hub.register_group(GROUP).unwrap();

        let err = hub.post(None, "n", 1).unwrap_err();
        assert!(matches!(
            err,
            WatchError::Delivery(DeliveryError::NoSubscribers { .. })
        ));
        assert!(hub.store().queue_names(GROUP).unwrap().is_empty());
    }

    #[test]
    fn test_store_outage_is_retryable() {
        let store = Arc::new(InMemoryDurableStore::new());
        let hub = Hub::with_store(HubConfig::default(), store.clone()).unwrap();
        hub.register_group(GROUP).unwrap();
        hub.post(None, "n", 1).unwrap();

        store.set_available(false);
        let err = hub.post(None, "n", 2).unwrap_err();
        assert!(err.is_retryable());

        store.set_available(true);
        assert_eq!(store.read_all(&QueueKey::new(GROUP, "n")).unwrap().len(), 1);
    }

    #[test]
    fn test_non_finite_payload_rejected_before_store() {
        let hub = Hub::new();
        hub.register_group(GROUP).unwrap();

        let err = hub.post(None, "n", f64::NAN).unwrap_err();
        assert!(matches!(
            err,
            WatchError::Delivery(DeliveryError::Serialization { .. })
        ));
        let nested = Payload::Array(vec![Payload::Float(f64::INFINITY)]);
        assert!(hub.post(None, "n", nested).unwrap_err().is_delivery());

        hub.post(None, "n", 5).unwrap();
        let entries = hub.store().read_all(&QueueKey::new(GROUP, "n")).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].payload, Payload::Int(5));
        assert_eq!(hub.reliable_stats().posts, 1);
    }

    #[test]
    fn test_post_serialize() {
        #[derive(Serialize)]
        struct Note {
            id: u32,
        }

        let hub = Hub::new();
        hub.register_group(GROUP).unwrap();
        hub.post_serialize(None, "note", &Note { id: 7 }).unwrap();

        let entries = hub.store().read_all(&QueueKey::new(GROUP, "note")).unwrap();
        assert_eq!(entries[0].payload.get("id"), Some(&Payload::Int(7)));
    }

    #[test]
    fn test_cleanup_on_every_post_evicts_orphans() {
        let config = HubConfig::default().with_cleanup_frequency(1);
        let hub = Hub::with_store(config, Arc::new(InMemoryDurableStore::new())).unwrap();
        hub.register_group(GROUP).unwrap();

        hub.post(None, "orphan", 1).unwrap();
        assert!(hub.store().queue_names(GROUP).unwrap().is_empty());
        assert_eq!(hub.reliable_stats().evicted_queues, 1);
    }

    #[test]
    fn test_matching_helpers() {
        let hub = Hub::new();
        let source = Owner::new("source");
        let selector = Selector::notification("n");
        let obs = hub.observe(selector.clone()).source(&source).on_event(|_| {}).unwrap();

        assert!(hub.pause_matching(None, Some(&source), &selector));
        assert!(obs.is_paused());
        assert!(hub.resume_matching(None, Some(&source), &selector));
        assert!(!obs.is_paused());
        assert!(hub.remove_matching(None, Some(&source), &selector));
        assert!(!hub.remove_matching(None, Some(&source), &selector));
        assert_eq!(hub.observation_count(), 0);
    }
}
