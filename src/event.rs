//! Detected events: one snapshot per trigger.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::owner::{Owner, WeakOwner};
use crate::payload::Payload;

/// Kind of change reported by a key-value observation.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Setting,
    Insertion,
    Removal,
    Replacement,
}

/// Source-specific fields attached to a detected event.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventMetadata {
    #[default]
    None,

    /// A property (key path) changed.
    KeyValue {
        key_path: String,
        kind: ChangeKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old: Option<Payload>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new: Option<Payload>,
        /// True for the notification sent before the change is applied.
        #[serde(default)]
        prior: bool,
        #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
        indexes: BTreeSet<usize>,
    },

    /// A named broadcast notification was posted.
    Notification {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_info: Option<Payload>,
    },

    /// A post arrived through an app group.
    AppGroup {
        posted_group: String,
    },
}

/// One snapshot of a triggering event.
///
/// Producers fill this in from their setup closure before the observation
/// decides whether to deliver or buffer it.
#[derive(Debug, Clone)]
pub struct DetectedEvent {
    /// Object that produced the event, when there is one.
    pub source: Option<WeakOwner>,
    /// Owned payload snapshot.
    pub payload: Payload,
    /// When the underlying event happened (not when the callback runs).
    pub timestamp: DateTime<Utc>,
    /// Mechanism-specific detail.
    pub metadata: EventMetadata,
}

impl DetectedEvent {
    /// A blank event stamped with the current time.
    #[must_use]
    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    /// A blank event stamped with `timestamp`.
    #[must_use]
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            source: None,
            payload: Payload::Null,
            timestamp,
            metadata: EventMetadata::None,
        }
    }

    /// Replace the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<Payload>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Attribute the event to `source`.
    #[must_use]
    pub fn with_source(mut self, source: &Owner) -> Self {
        self.source = Some(source.downgrade());
        self
    }

    /// Replace the mechanism-specific metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Upgrade the source reference if the producing owner is still alive.
    #[must_use]
    pub fn source_owner(&self) -> Option<Owner> {
        self.source.as_ref().and_then(WeakOwner::upgrade)
    }
}

impl Default for DetectedEvent {
    fn default() -> Self {
        Self::now()
    }
}

/// Insert `event` after every entry with a timestamp at or before its own,
/// keeping the buffer non-decreasing by timestamp and FIFO among ties.
pub(crate) fn insert_chronological(buffer: &mut Vec<DetectedEvent>, event: DetectedEvent) {
    let at = buffer.partition_point(|e| e.timestamp <= event.timestamp);
    buffer.insert(at, event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64, payload: i64) -> DetectedEvent {
        DetectedEvent::at(Utc.timestamp_opt(secs, 0).unwrap()).with_payload(payload)
    }

    #[test]
    fn test_insert_keeps_fifo_for_equal_timestamps() {
        let mut buf = Vec::new();
        insert_chronological(&mut buf, at(10, 1));
        insert_chronological(&mut buf, at(10, 2));
        insert_chronological(&mut buf, at(10, 3));

        let payloads: Vec<_> = buf.iter().filter_map(|e| e.payload.as_int()).collect();
        assert_eq!(payloads, vec![1, 2, 3]);
    }

    #[test]
    fn test_insert_places_older_event_before_newer() {
        let mut buf = Vec::new();
        insert_chronological(&mut buf, at(20, 2));
        insert_chronological(&mut buf, at(30, 3));
        insert_chronological(&mut buf, at(10, 1));

        let payloads: Vec<_> = buf.iter().filter_map(|e| e.payload.as_int()).collect();
        assert_eq!(payloads, vec![1, 2, 3]);
    }

    #[test]
    fn test_source_owner_upgrade() {
        let owner = Owner::new("src");
        let ev = DetectedEvent::now().with_source(&owner);
        assert_eq!(ev.source_owner().map(|o| o.id()), Some(owner.id()));

        drop(owner);
        assert!(ev.source_owner().is_none());
    }

    #[test]
    fn test_metadata_serde_is_tagged() {
        let meta = EventMetadata::Notification {
            name: "A.changed".to_string(),
            user_info: None,
        };
        let encoded = serde_json::to_value(&meta).unwrap();
        assert_eq!(encoded["type"], "notification");
        assert_eq!(encoded["name"], "A.changed");
    }
}
