//! Builder for observations.

use std::sync::{Arc, Mutex};

use crate::dispatch::DispatchTarget;
use crate::error::{ValidationError, WatchError, WatchResult};
use crate::hub::Hub;
use crate::owner::{Owner, WeakOwner};
use crate::registry::RegistryEntry;

use super::callback::{Callback, Delivery};
use super::selector::Selector;
use super::{Observation, ObservationId, ObservationInner, ObservationState};

/// Builder for creating observations.
///
/// # Example
/// ```rust,ignore
/// let obs = hub
///     .observe(Selector::notification("A.changed"))
///     .source(&model)
///     .paused(true)
///     .on_event(|delivery| println!("{:?}", delivery.payload()))?;
/// ```
#[derive(Debug)]
#[must_use = "an observation is only created by `register`"]
pub struct ObservationBuilder<'h> {
    hub: &'h Hub,
    selector: Selector,
    observer: Option<WeakOwner>,
    source: Option<WeakOwner>,
    target: DispatchTarget,
    paused: bool,
    collates: Option<bool>,
    reliable: bool,
    remove_automatically: bool,
}

impl<'h> ObservationBuilder<'h> {
    pub(crate) fn new(hub: &'h Hub, selector: Selector) -> Self {
        Self {
            hub,
            selector,
            observer: None,
            source: None,
            target: DispatchTarget::Caller,
            paused: false,
            collates: None,
            reliable: false,
            remove_automatically: true,
        }
    }

    /// The owner whose lifetime bounds the observation and whom callbacks receive.
    pub fn observer(mut self, observer: &Owner) -> Self {
        self.observer = Some(observer.downgrade());
        self
    }

    /// Set the observer from a weak handle; registration fails if it is gone.
    pub fn weak_observer(mut self, observer: WeakOwner) -> Self {
        self.observer = Some(observer);
        self
    }

    /// The owner whose events are observed; triggered events carry it.
    pub fn source(mut self, source: &Owner) -> Self {
        self.source = Some(source.downgrade());
        self
    }

    /// Set the source from a weak handle; registration fails if it is gone.
    pub fn weak_source(mut self, source: WeakOwner) -> Self {
        self.source = Some(source);
        self
    }

    /// Where callbacks run (default: inline on the triggering thread).
    pub fn target(mut self, target: impl Into<DispatchTarget>) -> Self {
        self.target = target.into();
        self
    }

    /// Start paused. Unless `collates` is set explicitly, a paused start
    /// also collates.
    pub fn paused(mut self, paused: bool) -> Self {
        self.paused = paused;
        self
    }

    /// Buffer events that arrive while paused instead of dropping them.
    pub fn collates(mut self, collates: bool) -> Self {
        self.collates = Some(collates);
        self
    }

    /// Persist posts for this key while the observation is paused or absent.
    /// Only valid for app-group selectors.
    pub fn reliable(mut self, reliable: bool) -> Self {
        self.reliable = reliable;
        self
    }

    /// Remove the observation when the observer or source owner is dropped (default: true).
    pub fn remove_automatically(mut self, remove: bool) -> Self {
        self.remove_automatically = remove;
        self
    }

    /// Register with a callback that only receives the delivery.
    ///
    /// # Errors
    /// See [`ObservationBuilder::register`].
    pub fn on_event<F>(self, f: F) -> WatchResult<Observation>
    where
        F: Fn(&Delivery) + Send + Sync + 'static,
    {
        self.register(Callback::anonymous(f))
    }

    /// Register with a callback that also receives the observer owner.
    ///
    /// # Errors
    /// See [`ObservationBuilder::register`].
    pub fn on_observer_event<F>(self, f: F) -> WatchResult<Observation>
    where
        F: Fn(&Owner, &Delivery) + Send + Sync + 'static,
    {
        self.register(Callback::observer(f))
    }

    /// Validate and register the observation.
    ///
    /// # Errors
    /// - `Validation` for an empty selector, no owners, an observer callback
    ///   without an observer, a dropped owner, or `reliable` on a selector
    ///   that is not an app-group post
    /// - `MissingPrecondition` if an app-group selector names a group that
    ///   was never registered
    /// - `Duplicate` if the same (observer, source, selector) is registered
    pub fn register(self, callback: Callback) -> WatchResult<Observation> {
        self.selector.validate()?;

        if self.observer.is_none() && self.source.is_none() {
            return Err(ValidationError::MissingIdentity.into());
        }
        if callback.needs_observer() && self.observer.is_none() {
            return Err(ValidationError::ObserverCallbackWithoutObserver.into());
        }

        let observer = upgrade(self.observer.as_ref(), "observer")?;
        let source = upgrade(self.source.as_ref(), "source")?;

        if self.reliable && self.selector.group().is_none() {
            return Err(ValidationError::ReliableRequiresGroup {
                selector: self.selector.to_string(),
            }
            .into());
        }
        if let Some(group) = self.selector.group() {
            if !self.hub.is_group_registered(group) {
                return Err(WatchError::MissingPrecondition {
                    group: group.to_string(),
                });
            }
        }

        let collates = self.collates.unwrap_or(self.paused) || (self.reliable && self.paused);
        let shared = self.hub.shared();
        let inner = Arc::new(ObservationInner {
            id: ObservationId::new(),
            observer: self.observer,
            source: self.source,
            selector: self.selector,
            target: self.target,
            callback,
            reliable: self.reliable,
            hub: Arc::clone(shared),
            state: Mutex::new(ObservationState {
                registered: true,
                paused: self.paused,
                collates,
                remove_automatically: self.remove_automatically,
                collated: (self.paused && collates).then(Vec::new),
                last_event: None,
            }),
        });
        let observation = Observation::from_inner(inner);

        if !shared.registry.insert_unique(RegistryEntry::for_observation(&observation)) {
            return Err(WatchError::Duplicate {
                selector: observation.selector().clone(),
            });
        }

        for owner in [&observer, &source].into_iter().flatten() {
            owner.associate(&observation);
        }

        if let Some(key) = observation.queue_key() {
            if observation.is_reliable() {
                shared.reliable.mark_intent(&key);
                observation.catch_up();
            } else {
                shared.skip_pending(&key);
            }
        }

        tracing::debug!(
            observation = %observation.id(),
            selector = %observation.selector(),
            reliable = observation.is_reliable(),
            "observation registered"
        );
        Ok(observation)
    }
}

fn upgrade(weak: Option<&WeakOwner>, role: &'static str) -> WatchResult<Option<Owner>> {
    match weak {
        None => Ok(None),
        Some(w) => w
            .upgrade()
            .map(Some)
            .ok_or_else(|| ValidationError::OwnerGone { role }.into()),
    }
}
