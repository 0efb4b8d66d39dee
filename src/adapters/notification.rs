//! Named broadcast notifications.
//!
//! Observers subscribe to a notification name, optionally restricted to
//! one sender by giving the sender as the observation's source.

use crate::event::{DetectedEvent, EventMetadata};
use crate::hub::Hub;
use crate::observation::{ObservationBuilder, Selector};
use crate::owner::{Owner, OwnerId};
use crate::payload::Payload;

use super::{EventSource, RegistryEntryView};

/// Broadcasts named notifications to the hub's notification observations.
#[derive(Debug, Clone)]
pub struct NotificationCenter {
    hub: Hub,
}

/// One notification being posted.
struct Posting<'a> {
    center: &'a NotificationCenter,
    name: &'a str,
    sender: Option<OwnerId>,
}

impl NotificationCenter {
    /// A notification center delivering through `hub`.
    #[must_use]
    pub fn new(hub: &Hub) -> Self {
        Self { hub: hub.clone() }
    }

    /// Start building an observation of `name`. Add `.source(&sender)` to
    /// hear only that sender.
    pub fn observe(&self, name: impl Into<String>) -> ObservationBuilder<'_> {
        self.hub.observe(Selector::notification(name))
    }

    /// Post `name` from `sender` with optional user info. The user info is
    /// also the event payload. Returns the number of observations
    /// triggered.
    pub fn post(&self, name: &str, sender: Option<&Owner>, user_info: Option<Payload>) -> usize {
        let posting = Posting {
            center: self,
            name,
            sender: sender.map(Owner::id),
        };
        let sender = sender.map(Owner::downgrade);
        let payload = user_info.clone().unwrap_or_default();

        posting.emit(false, &|event: &mut DetectedEvent| {
            if sender.is_some() {
                event.source.clone_from(&sender);
            }
            event.payload = payload.clone();
            event.metadata = EventMetadata::Notification {
                name: name.to_string(),
                user_info: user_info.clone(),
            };
        })
    }
}

impl EventSource for Posting<'_> {
    fn hub(&self) -> &Hub {
        &self.center.hub
    }

    fn wants(&self, entry: &RegistryEntryView<'_>) -> bool {
        entry.selector().name() == Some(self.name)
            && matches!(entry.selector(), Selector::Notification { .. })
            && entry.source().map_or(true, |s| Some(s) == self.sender)
    }
}
