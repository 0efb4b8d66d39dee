//! # watchpost - pausable, collating observations
//!
//! watchpost is an observer/subscription library. An observation binds an
//! observer and/or a source to an event selector and a callback; it can be
//! paused, collects ("collates") every event that arrives while paused, and
//! flushes the backlog to one callback in chronological order on resume.
//! App-group posts go through a durable store first, so a reliable
//! observation also catches up on posts made while its process was not
//! running.
//!
//! ## Core Concepts
//!
//! - **Hub**: explicit process-wide context (registry, groups, store)
//! - **Owner**: RAII handle for an object that observes or is observed
//! - **Observation**: one subscription; `trigger`, `pause`, `resume`, `remove`
//! - **Reliable observation**: app-group observation backed by a durable queue
//!
//! ## Usage
//!
//! ```rust,ignore
//! use watchpost::{Hub, NotificationCenter, Owner};
//!
//! let hub = Hub::new();
//! let center = NotificationCenter::new(&hub);
//! let view = Owner::new("view");
//!
//! let obs = center
//!     .observe("A.changed")
//!     .observer(&view)
//!     .on_event(|delivery| println!("{:?}", delivery.events()))?;
//!
//! obs.pause();
//! center.post("A.changed", None, Some(2.into()));
//! center.post("A.changed", None, Some(3.into()));
//! obs.resume(); // one callback with both events
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod error;
pub mod event;
pub mod owner;
pub mod payload;

// Observation core
pub mod dispatch;
pub mod observation;
mod registry;

// Reliable delivery and context
pub mod config;
pub mod hub;
pub mod reliable;
pub mod storage;

// Producers
pub mod adapters;

// Re-export primary types at crate root for convenience
pub use adapters::{EventSource, NotificationCenter, PropertySet};
pub use config::HubConfig;
pub use dispatch::{DispatchTarget, Executor, Job, ManualQueue, SerialQueue};
pub use error::{DeliveryError, ValidationError, WatchError, WatchResult};
pub use event::{ChangeKind, DetectedEvent, EventMetadata};
pub use hub::Hub;
pub use observation::{Callback, Delivery, Observation, ObservationBuilder, ObservationId, Selector};
pub use owner::{Owner, OwnerId, WeakOwner};
pub use payload::Payload;
pub use reliable::{GroupSignal, LocalSignal, ReliableStats, SignalHandler, SignalSubscription};
pub use storage::{DurableEntry, DurableStore, InMemoryDurableStore, QueueKey, StorageError};
