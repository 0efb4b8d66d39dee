//! Observations: the unit of subscription.
//!
//! An observation binds an observer and/or a source owner, a [`Selector`]
//! and a [`Callback`]. Producers call [`Observation::trigger`] once per
//! native event; the observation then either delivers the event or, while
//! paused, collates it for a single chronological flush on
//! [`Observation::resume`].
//!
//! # Locking
//!
//! Each observation's mutable state sits behind its own mutex. That lock may
//! be held while taking the registry or reliable-delivery locks, never the
//! other way round, and no callback ever runs while it is held.

/// Observation builder.
pub mod builder;
/// Callbacks and deliveries.
pub mod callback;
/// Event selectors.
pub mod selector;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use builder::ObservationBuilder;
pub use callback::{Callback, Delivery};
pub use selector::Selector;

use crate::dispatch::{DispatchTarget, Job};
use crate::event::{insert_chronological, DetectedEvent, EventMetadata};
use crate::hub::HubShared;
use crate::owner::{Owner, OwnerId, WeakOwner};
use crate::storage::{DurableEntry, QueueKey};

/// Unique identifier for an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObservationId(Uuid);

impl ObservationId {
    /// Create a new random observation id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ObservationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
pub(crate) struct ObservationState {
    pub(crate) registered: bool,
    pub(crate) paused: bool,
    pub(crate) collates: bool,
    pub(crate) remove_automatically: bool,
    pub(crate) collated: Option<Vec<DetectedEvent>>,
    pub(crate) last_event: Option<DetectedEvent>,
}

pub(crate) struct ObservationInner {
    pub(crate) id: ObservationId,
    pub(crate) observer: Option<WeakOwner>,
    pub(crate) source: Option<WeakOwner>,
    pub(crate) selector: Selector,
    pub(crate) target: DispatchTarget,
    pub(crate) callback: Callback,
    pub(crate) reliable: bool,
    pub(crate) hub: Arc<HubShared>,
    pub(crate) state: Mutex<ObservationState>,
}

/// Handle to a registered (or formerly registered) observation.
///
/// Clones share the same observation. Owners keep their observations
/// alive, so dropping a handle does not remove anything; use
/// [`Observation::remove`] or drop the owners.
#[derive(Clone)]
pub struct Observation {
    pub(crate) inner: Arc<ObservationInner>,
}

impl Observation {
    pub(crate) fn from_inner(inner: Arc<ObservationInner>) -> Self {
        Self { inner }
    }

    fn state(&self) -> MutexGuard<'_, ObservationState> {
        // State is consistent before any user code runs, so a poisoned lock
        // carries no half-applied update.
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// This observation's id.
    #[must_use]
    pub fn id(&self) -> ObservationId {
        self.inner.id
    }

    /// The observer owner, if one was given and it is still alive.
    #[must_use]
    pub fn observer(&self) -> Option<Owner> {
        self.inner.observer.as_ref().and_then(WeakOwner::upgrade)
    }

    /// Id of the observer owner, even after it was dropped.
    #[must_use]
    pub fn observer_id(&self) -> Option<OwnerId> {
        self.inner.observer.as_ref().map(WeakOwner::id)
    }

    /// The source owner, if one was given and it is still alive.
    #[must_use]
    pub fn source(&self) -> Option<Owner> {
        self.inner.source.as_ref().and_then(WeakOwner::upgrade)
    }

    /// Id of the source owner, even after it was dropped.
    #[must_use]
    pub fn source_id(&self) -> Option<OwnerId> {
        self.inner.source.as_ref().map(WeakOwner::id)
    }

    /// What this observation listens for.
    #[must_use]
    pub fn selector(&self) -> &Selector {
        &self.inner.selector
    }

    /// Where callbacks run.
    #[must_use]
    pub fn target(&self) -> &DispatchTarget {
        &self.inner.target
    }

    /// Whether app-group posts are kept durably while paused or absent.
    #[must_use]
    pub fn is_reliable(&self) -> bool {
        self.inner.reliable
    }

    /// False once the observation has been removed.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.state().registered
    }

    /// Whether delivery is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.state().paused
    }

    /// Whether events arriving while paused are buffered.
    #[must_use]
    pub fn collates(&self) -> bool {
        self.state().collates
    }

    /// Whether dropping an owner removes this observation.
    #[must_use]
    pub fn remove_automatically(&self) -> bool {
        self.state().remove_automatically
    }

    /// Number of events waiting in the collation buffer.
    #[must_use]
    pub fn collated_len(&self) -> usize {
        self.state().collated.as_ref().map_or(0, Vec::len)
    }

    /// The most recently delivered event (the newest entry after a flush).
    #[must_use]
    pub fn last_event(&self) -> Option<DetectedEvent> {
        self.state().last_event.clone()
    }

    /// Choose whether events arriving while paused are kept or dropped.
    ///
    /// Turning collation off discards anything already buffered. Reliable
    /// observations turn it back on whenever they are paused.
    pub fn set_collates(&self, collates: bool) {
        let mut state = self.state();
        state.collates = collates;
        if collates {
            if state.paused && state.collated.is_none() {
                state.collated = Some(Vec::new());
            }
        } else {
            state.collated = None;
        }
    }

    /// Choose whether dropping the observer or source owner removes this
    /// observation.
    pub fn set_remove_automatically(&self, remove: bool) {
        self.state().remove_automatically = remove;
    }

    /// Report one native event.
    ///
    /// `setup` fills in a fresh event stamped with the current time and the
    /// observation's source. With `sync` the callback runs on this thread
    /// even if the observation has a dispatch target. Does nothing once the
    /// observation is removed.
    pub fn trigger<F>(&self, sync: bool, setup: F)
    where
        F: FnOnce(&mut DetectedEvent),
    {
        if !self.is_registered() {
            return;
        }
        let mut event = DetectedEvent::now();
        event.source.clone_from(&self.inner.source);
        setup(&mut event);
        self.trigger_events(vec![event], sync);
    }

    pub(crate) fn trigger_events(&self, events: Vec<DetectedEvent>, sync: bool) {
        if events.is_empty() {
            return;
        }
        let state = self.state();
        self.accept(state, events, sync, false);
    }

    /// Deliver `events` as one collated callback, or buffer them while
    /// paused. Used for catch-up and flushes, with `state` held since the
    /// events were read.
    fn trigger_batch(&self, state: MutexGuard<'_, ObservationState>, events: Vec<DetectedEvent>) {
        self.accept(state, events, false, true);
    }

    fn accept(
        &self,
        mut state: MutexGuard<'_, ObservationState>,
        events: Vec<DetectedEvent>,
        sync: bool,
        batch: bool,
    ) {
        if events.is_empty() || !state.registered {
            return;
        }
        if state.paused {
            if state.collates {
                let buffer = state.collated.get_or_insert_with(Vec::new);
                for event in events {
                    insert_chronological(buffer, event);
                }
            } else {
                tracing::trace!(observation = %self.inner.id, dropped = events.len(), "paused without collation");
            }
            return;
        }

        if batch {
            let delivery = Delivery::batch(self.clone(), events);
            self.dispatch(state, delivery, sync);
        } else {
            let deliveries: Vec<Delivery> = events
                .into_iter()
                .map(|event| Delivery::single(self.clone(), event))
                .collect();
            self.dispatch(state, deliveries, sync);
        }
    }

    /// Hands each delivery to the target before `state` is released, so
    /// jobs from concurrent triggers and flushes are queued in the order
    /// they were decided. Inline jobs run after the lock is gone.
    fn dispatch(
        &self,
        state: MutexGuard<'_, ObservationState>,
        deliveries: impl IntoIterator<Item = Delivery>,
        sync: bool,
    ) {
        let inline: Vec<Job> = deliveries
            .into_iter()
            .filter_map(|delivery| {
                let observation = self.clone();
                let job: Job = Box::new(move || observation.invoke(&delivery));
                if sync {
                    Some(job)
                } else {
                    self.inner.target.schedule(job)
                }
            })
            .collect();
        drop(state);
        for job in inline {
            job();
        }
    }

    /// Runs the callback if the observation is still registered and its
    /// observer is still alive.
    fn invoke(&self, delivery: &Delivery) {
        // Upgrade before locking: releasing the last strong reference to an
        // owner removes its observations, which takes this lock.
        let observer = self.observer();
        if self.inner.observer.is_some() && observer.is_none() {
            return;
        }

        {
            let mut state = self.state();
            if !state.registered {
                return;
            }
            state.last_event = Some(delivery.event().clone());
        }

        match (&self.inner.callback, observer.as_ref()) {
            (Callback::Observer(f), Some(owner)) => f(owner, delivery),
            (Callback::Anonymous(f), _) => f(delivery),
            (Callback::Observer(_), None) => {}
        }
    }

    /// Stop delivering; subsequent events are collated if `collates` is set.
    ///
    /// Returns false if the observation was already removed.
    pub fn pause(&self) -> bool {
        let mut state = self.state();
        if !state.registered {
            return false;
        }
        state.paused = true;
        if self.inner.reliable {
            state.collates = true;
        }
        if state.collates && state.collated.is_none() {
            state.collated = Some(Vec::new());
        }
        true
    }

    /// Resume delivery, flushing everything collated while paused as one
    /// callback.
    ///
    /// Reliable observations also drain their durable queue; durable entries
    /// merge ahead of buffered ones with equal timestamps. Returns false if
    /// the observation was already removed.
    pub fn resume(&self) -> bool {
        let mut state = self.state();
        if !state.registered {
            return false;
        }

        let mut merged = match self.queue_key() {
            Some(key) if self.inner.reliable => {
                self.events_from_entries(&key.group, self.inner.hub.reliable.drain(&key))
            }
            _ => Vec::new(),
        };
        merged.extend(state.collated.take().unwrap_or_default());
        merged.sort_by_key(|e| e.timestamp);
        state.paused = false;

        if !merged.is_empty() {
            tracing::debug!(observation = %self.inner.id, events = merged.len(), "flushing collated events");
        }
        self.trigger_batch(state, merged);
        true
    }

    /// Remove the observation. A reliable observation's durable queue keeps
    /// accumulating for a later observation of the same key.
    ///
    /// Returns false if it was already removed.
    pub fn remove(&self) -> bool {
        self.remove_inner(false)
    }

    /// Remove the observation and, if it is reliable, discard its durable
    /// queue and withdraw the intent to collect it.
    ///
    /// Returns false if it was already removed.
    pub fn remove_stopping_reliable_collection(&self) -> bool {
        self.remove_inner(true)
    }

    fn remove_inner(&self, stop_reliable: bool) -> bool {
        {
            let mut state = self.state();
            if !state.registered {
                return false;
            }
            state.registered = false;
            state.collated = None;
        }

        let hub = &self.inner.hub;
        hub.registry.remove(self.inner.id);
        if stop_reliable && self.inner.reliable {
            if let Some(key) = self.queue_key() {
                hub.reliable.stop_collection(&key);
            }
        }

        // Drop order matters: the dissociated handles and upgraded owners go
        // out of scope here, with no lock held.
        for weak in [&self.inner.observer, &self.inner.source].into_iter().flatten() {
            if let Some(owner) = weak.upgrade() {
                let _released = owner.dissociate(self.inner.id);
            }
        }

        tracing::debug!(
            observation = %self.inner.id,
            selector = %self.inner.selector,
            stop_reliable,
            "observation removed"
        );
        true
    }

    /// Called by an owner being dropped.
    pub(crate) fn owner_dropped(&self, owner: OwnerId) {
        let remove = {
            let state = self.state();
            state.registered && state.remove_automatically
        };
        if remove {
            tracing::debug!(observation = %self.inner.id, %owner, "owner dropped");
            self.remove();
        }
    }

    /// Durable queue for reliable app-group observations.
    pub(crate) fn queue_key(&self) -> Option<QueueKey> {
        match &self.inner.selector {
            Selector::AppGroup { group, name } => Some(QueueKey::new(group.clone(), name.clone())),
            _ => None,
        }
    }

    /// True if a post for this observation's key should be drained now
    /// rather than left durable.
    pub(crate) fn is_accepting(&self) -> bool {
        let state = self.state();
        state.registered && (!state.paused || !self.inner.reliable)
    }

    pub(crate) fn events_from_entries(
        &self,
        group: &str,
        entries: Vec<DurableEntry>,
    ) -> Vec<DetectedEvent> {
        entries
            .into_iter()
            .map(|entry| {
                let mut event = DetectedEvent::at(entry.timestamp)
                    .with_payload(entry.payload)
                    .with_metadata(EventMetadata::AppGroup {
                        posted_group: group.to_string(),
                    });
                event.source.clone_from(&self.inner.source);
                event
            })
            .collect()
    }

    /// Deliver whatever accumulated durably before this observation existed.
    pub(crate) fn catch_up(&self) {
        let Some(key) = self.queue_key() else {
            return;
        };

        let state = self.state();
        if !state.registered {
            return;
        }
        let backlog = self.events_from_entries(&key.group, self.inner.hub.reliable.drain(&key));
        if !backlog.is_empty() {
            tracing::debug!(observation = %self.inner.id, queue = %key, events = backlog.len(), "catching up");
        }
        self.trigger_batch(state, backlog);
    }
}

impl PartialEq for Observation {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Observation {}

impl fmt::Debug for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observation")
            .field("id", &self.inner.id)
            .field("selector", &self.inner.selector)
            .field("observer", &self.observer_id())
            .field("source", &self.source_id())
            .field("reliable", &self.inner.reliable)
            .field("target", &self.inner.target)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ManualQueue;
    use crate::payload::Payload;
    use crate::Hub;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex as StdMutex;

    type Log = Arc<StdMutex<Vec<Vec<i64>>>>;

    fn recorder() -> (Log, Callback) {
        let log: Log = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let cb = Callback::anonymous(move |d: &Delivery| {
            let values = d.events().iter().filter_map(|e| e.payload.as_int()).collect();
            sink.lock().unwrap().push(values);
        });
        (log, cb)
    }

    fn at(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_unpaused_triggers_fire_in_order() {
        let hub = Hub::new();
        let source = Owner::new("source");
        let (log, cb) = recorder();
        let obs = hub.observe(Selector::notification("n")).source(&source).register(cb).unwrap();

        for v in 1..=3 {
            obs.trigger(false, |e| e.payload = Payload::Int(v));
        }

        assert_eq!(*log.lock().unwrap(), vec![vec![1], vec![2], vec![3]]);
        assert_eq!(obs.last_event().unwrap().payload, Payload::Int(3));
    }

    #[test]
    fn test_paused_collation_flushes_once_in_time_order() {
        let hub = Hub::new();
        let source = Owner::new("source");
        let (log, cb) = recorder();
        let obs = hub.observe(Selector::notification("n")).source(&source).register(cb).unwrap();
        obs.set_collates(true);

        assert!(obs.pause());
        obs.trigger(false, |e| {
            e.payload = Payload::Int(2);
            e.timestamp = at(20);
        });
        obs.trigger(false, |e| {
            e.payload = Payload::Int(1);
            e.timestamp = at(10);
        });
        assert_eq!(obs.collated_len(), 2);
        assert!(log.lock().unwrap().is_empty());

        assert!(obs.resume());
        assert_eq!(*log.lock().unwrap(), vec![vec![1, 2]]);
        assert_eq!(obs.collated_len(), 0);
        assert_eq!(obs.last_event().unwrap().timestamp, at(20));
    }

    #[test]
    fn test_paused_without_collation_drops() {
        let hub = Hub::new();
        let source = Owner::new("source");
        let (log, cb) = recorder();
        let obs = hub.observe(Selector::notification("n")).source(&source).register(cb).unwrap();

        assert!(!obs.collates());
        obs.pause();
        obs.trigger(false, |e| e.payload = Payload::Int(1));
        obs.resume();
        obs.trigger(false, |e| e.payload = Payload::Int(2));

        assert_eq!(*log.lock().unwrap(), vec![vec![2]]);
    }

    #[test]
    fn test_created_paused_collates_by_default() {
        let hub = Hub::new();
        let source = Owner::new("source");
        let (log, cb) = recorder();
        let obs = hub
            .observe(Selector::notification("n"))
            .source(&source)
            .paused(true)
            .register(cb)
            .unwrap();

        assert!(obs.collates());
        obs.trigger(false, |e| e.payload = Payload::Int(5));
        obs.resume();
        assert_eq!(*log.lock().unwrap(), vec![vec![5]]);
    }

    #[test]
    fn test_removed_observation_is_inert() {
        let hub = Hub::new();
        let source = Owner::new("source");
        let (log, cb) = recorder();
        let obs = hub.observe(Selector::notification("n")).source(&source).register(cb).unwrap();

        assert!(obs.remove());
        assert!(!obs.remove());
        assert!(!obs.pause());
        assert!(!obs.resume());
        obs.trigger(false, |e| e.payload = Payload::Int(1));
        assert!(log.lock().unwrap().is_empty());
        assert!(source.observations().is_empty());
    }

    #[test]
    fn test_queued_callback_skipped_after_remove() {
        let hub = Hub::new();
        let source = Owner::new("source");
        let queue = Arc::new(ManualQueue::new());
        let (log, cb) = recorder();
        let obs = hub
            .observe(Selector::notification("n"))
            .source(&source)
            .target(Arc::clone(&queue))
            .register(cb)
            .unwrap();

        obs.trigger(false, |e| e.payload = Payload::Int(1));
        assert_eq!(queue.len(), 1);
        obs.remove();
        queue.run_pending();

        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_sync_trigger_bypasses_target() {
        let hub = Hub::new();
        let source = Owner::new("source");
        let queue = Arc::new(ManualQueue::new());
        let (log, cb) = recorder();
        let obs = hub
            .observe(Selector::notification("n"))
            .source(&source)
            .target(Arc::clone(&queue))
            .register(cb)
            .unwrap();

        obs.trigger(true, |e| e.payload = Payload::Int(9));
        assert!(queue.is_empty());
        assert_eq!(*log.lock().unwrap(), vec![vec![9]]);
    }

    #[test]
    fn test_observer_callback_skipped_when_observer_gone() {
        let hub = Hub::new();
        let source = Owner::new("source");
        let observer = Owner::new("observer");
        let hits = Arc::new(StdMutex::new(0));
        let h = Arc::clone(&hits);
        let obs = hub
            .observe(Selector::notification("n"))
            .observer(&observer)
            .source(&source)
            .remove_automatically(false)
            .register(Callback::observer(move |_o: &Owner, _d: &Delivery| {
                *h.lock().unwrap() += 1;
            }))
            .unwrap();

        obs.trigger(false, |_| {});
        drop(observer);
        obs.trigger(false, |_| {});

        assert!(obs.is_registered());
        assert_eq!(*hits.lock().unwrap(), 1);
    }
}
