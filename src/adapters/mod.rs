//! In-process event producers.
//!
//! Producers detect events and call [`Observation::trigger`] on every
//! observation that wants them. Two are provided: a named-notification
//! broadcaster and an observable property bag. App-group posts are produced
//! by [`Hub::post`](crate::Hub::post).

/// Named broadcast notifications.
pub mod notification;
/// Observable key/value properties.
pub mod property;

pub use notification::NotificationCenter;
pub use property::PropertySet;

use crate::event::DetectedEvent;
use crate::hub::Hub;
use crate::observation::{Observation, Selector};
use crate::registry::RegistryEntry;

/// Something that produces events for observations registered on a hub.
pub trait EventSource {
    /// The hub whose observations this source feeds.
    fn hub(&self) -> &Hub;

    /// Whether a registered observation should hear this source's event.
    fn wants(&self, entry: &RegistryEntryView<'_>) -> bool;

    /// Trigger every interested observation once. Returns how many were
    /// triggered.
    fn emit(&self, sync: bool, setup: &dyn Fn(&mut DetectedEvent)) -> usize {
        let targets = interested(self.hub(), |entry| self.wants(entry));
        for observation in &targets {
            observation.trigger(sync, |event| setup(event));
        }
        targets.len()
    }
}

/// Read-only view of a registered observation's identity.
#[derive(Debug, Clone, Copy)]
pub struct RegistryEntryView<'a> {
    entry: &'a RegistryEntry,
}

impl RegistryEntryView<'_> {
    #[must_use]
    pub fn selector(&self) -> &Selector {
        &self.entry.selector
    }

    #[must_use]
    pub fn observer(&self) -> Option<crate::owner::OwnerId> {
        self.entry.observer
    }

    #[must_use]
    pub fn source(&self) -> Option<crate::owner::OwnerId> {
        self.entry.source
    }

    #[must_use]
    pub fn is_reliable(&self) -> bool {
        self.entry.reliable
    }
}

pub(crate) fn interested<P>(hub: &Hub, pred: P) -> Vec<Observation>
where
    P: Fn(&RegistryEntryView<'_>) -> bool,
{
    hub.shared()
        .registry
        .find_all(|entry| pred(&RegistryEntryView { entry }))
}
