//! Cross-process "something was posted" signal.
//!
//! A signal carries only the group identifier; subscribers read the posts
//! themselves from the durable store.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Called with the group identifier whenever that group is signalled.
pub type SignalHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Token returned by [`GroupSignal::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalSubscription(u64);

/// Broadcast mechanism between every participant of a group.
pub trait GroupSignal: Send + Sync {
    /// Wake every subscriber of `group`.
    fn post_signal(&self, group: &str);

    /// Start calling `handler` for signals on `group`.
    fn subscribe(&self, group: &str, handler: SignalHandler) -> SignalSubscription;

    /// Stop calling the handler registered under `subscription`.
    fn unsubscribe(&self, group: &str, subscription: SignalSubscription);
}

/// In-process signal. Handlers run on the posting thread.
///
/// Share one instance between hubs to model several processes attached to
/// the same group.
#[derive(Default)]
pub struct LocalSignal {
    handlers: Mutex<HashMap<String, Vec<(SignalSubscription, SignalHandler)>>>,
    next_id: AtomicU64,
}

impl LocalSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions for `group`.
    #[must_use]
    pub fn subscriber_count(&self, group: &str) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(group)
            .map_or(0, Vec::len)
    }
}

impl GroupSignal for LocalSignal {
    fn post_signal(&self, group: &str) {
        // Snapshot, then call without the lock: handlers may subscribe.
        let handlers: Vec<SignalHandler> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(group)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        for handler in handlers {
            handler(group);
        }
    }

    fn subscribe(&self, group: &str, handler: SignalHandler) -> SignalSubscription {
        let subscription = SignalSubscription(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(group.to_string())
            .or_default()
            .push((subscription, handler));
        subscription
    }

    fn unsubscribe(&self, group: &str, subscription: SignalSubscription) {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = handlers.get_mut(group) {
            list.retain(|(id, _)| *id != subscription);
            if list.is_empty() {
                handlers.remove(group);
            }
        }
    }
}

impl fmt::Debug for LocalSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let groups: Vec<String> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("LocalSignal").field("groups", &groups).finish()
    }
}
