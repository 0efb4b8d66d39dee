//! Observation callbacks and what they receive.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::event::{DetectedEvent, EventMetadata};
use crate::owner::Owner;
use crate::payload::Payload;

use super::Observation;

type ObserverFn = dyn Fn(&Owner, &Delivery) + Send + Sync;
type AnonymousFn = dyn Fn(&Delivery) + Send + Sync;

/// The function an observation calls.
///
/// Exactly one form per observation. The observer form receives the live
/// observer owner and is skipped once that owner is gone.
#[derive(Clone)]
pub enum Callback {
    /// Called with the observer owner.
    Observer(Arc<ObserverFn>),
    /// Called with the delivery only.
    Anonymous(Arc<AnonymousFn>),
}

impl Callback {
    pub fn observer<F>(f: F) -> Self
    where
        F: Fn(&Owner, &Delivery) + Send + Sync + 'static,
    {
        Self::Observer(Arc::new(f))
    }

    pub fn anonymous<F>(f: F) -> Self
    where
        F: Fn(&Delivery) + Send + Sync + 'static,
    {
        Self::Anonymous(Arc::new(f))
    }

    #[must_use]
    pub const fn needs_observer(&self) -> bool {
        matches!(self, Self::Observer(_))
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Observer(_) => write!(f, "Callback::Observer"),
            Self::Anonymous(_) => write!(f, "Callback::Anonymous"),
        }
    }
}

/// One callback invocation.
///
/// `event` is the triggering event, or the newest one when this delivery
/// flushes a backlog. `collated` is set only for flushes and holds the whole
/// backlog in chronological order, ending with `event`.
#[derive(Debug, Clone)]
pub struct Delivery {
    observation: Observation,
    event: DetectedEvent,
    collated: Option<Vec<DetectedEvent>>,
}

impl Delivery {
    pub(crate) fn single(observation: Observation, event: DetectedEvent) -> Self {
        Self {
            observation,
            event,
            collated: None,
        }
    }

    /// Returns None for an empty batch.
    pub(crate) fn batch(observation: Observation, events: Vec<DetectedEvent>) -> Option<Self> {
        let event = events.last()?.clone();
        Some(Self {
            observation,
            event,
            collated: Some(events),
        })
    }

    /// The observation being delivered to.
    #[must_use]
    pub fn observation(&self) -> &Observation {
        &self.observation
    }

    #[must_use]
    pub fn event(&self) -> &DetectedEvent {
        &self.event
    }

    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.event.payload
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.event.timestamp
    }

    #[must_use]
    pub fn metadata(&self) -> &EventMetadata {
        &self.event.metadata
    }

    /// The producing owner, if it is still alive.
    #[must_use]
    pub fn source(&self) -> Option<Owner> {
        self.event.source_owner()
    }

    /// The flushed backlog, when this delivery is a flush.
    #[must_use]
    pub fn collated(&self) -> Option<&[DetectedEvent]> {
        self.collated.as_deref()
    }

    #[must_use]
    pub fn is_collated(&self) -> bool {
        self.collated.is_some()
    }

    /// Every event this delivery covers: the backlog for a flush, otherwise
    /// just the single event.
    #[must_use]
    pub fn events(&self) -> &[DetectedEvent] {
        self.collated
            .as_deref()
            .unwrap_or(std::slice::from_ref(&self.event))
    }
}
