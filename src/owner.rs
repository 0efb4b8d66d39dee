//! Owner handles: the lifetime anchors observations are bound to.
//!
//! An [`Owner`] stands for an application object that observes or is
//! observed. Observations hold only weak references to their owners, while
//! each owner keeps its associated observations alive. When the last clone
//! of an owner is dropped, every observation bound to it with
//! `remove_automatically` set is removed.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::observation::{Observation, ObservationId};

/// Stable identity of an owner, usable as a registry key without keeping
/// the owner alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(Uuid);

impl OwnerId {
    /// Create a new random owner id.
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

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct OwnerInner {
    id: OwnerId,
    label: String,
    context: Option<Box<dyn Any + Send + Sync>>,
    observations: Mutex<Vec<Observation>>,
}

impl Drop for OwnerInner {
    fn drop(&mut self) {
        let observations = std::mem::take(
            self.observations
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for observation in observations {
            observation.owner_dropped(self.id);
        }
    }
}

/// Strong handle to an owner. Clones share identity.
#[derive(Clone)]
pub struct Owner {
    inner: Arc<OwnerInner>,
}

impl Owner {
    /// Create an owner with a diagnostic label.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self::build(label.into(), None)
    }

    /// Create an owner carrying a context value that observer callbacks can
    /// read back with [`Owner::context`].
    #[must_use]
    pub fn with_context<T: Any + Send + Sync>(label: impl Into<String>, context: T) -> Self {
        Self::build(label.into(), Some(Box::new(context)))
    }

    fn build(label: String, context: Option<Box<dyn Any + Send + Sync>>) -> Self {
        Self {
            inner: Arc::new(OwnerInner {
                id: OwnerId::new(),
                label,
                context,
                observations: Mutex::new(Vec::new()),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> OwnerId {
        self.inner.id
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Borrow the context value if it has type `T`.
    #[must_use]
    pub fn context<T: Any>(&self) -> Option<&T> {
        self.inner.context.as_ref().and_then(|c| c.downcast_ref::<T>())
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakOwner {
        WeakOwner {
            id: self.inner.id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Observations currently bound to this owner.
    #[must_use]
    pub fn observations(&self) -> Vec<Observation> {
        self.inner
            .observations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn associate(&self, observation: &Observation) {
        let mut list = self
            .inner
            .observations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !list.iter().any(|o| o.id() == observation.id()) {
            list.push(observation.clone());
        }
    }

    pub(crate) fn dissociate(&self, id: ObservationId) -> Option<Observation> {
        let mut list = self
            .inner
            .observations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let pos = list.iter().position(|o| o.id() == id)?;
        Some(list.swap_remove(pos))
    }
}

impl PartialEq for Owner {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Owner {}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owner")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .finish_non_exhaustive()
    }
}

/// Weak handle to an owner; never keeps it alive.
#[derive(Clone)]
pub struct WeakOwner {
    id: OwnerId,
    inner: Weak<OwnerInner>,
}

impl WeakOwner {
    #[must_use]
    pub const fn id(&self) -> OwnerId {
        self.id
    }

    /// Upgrade to a strong handle if the owner is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Owner> {
        self.inner.upgrade().map(|inner| Owner { inner })
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl PartialEq for WeakOwner {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for WeakOwner {}

impl fmt::Debug for WeakOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakOwner")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}
