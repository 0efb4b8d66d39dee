//! Error types for watchpost.
//!
//! All errors are strongly typed using thiserror. Rejected requests (a
//! duplicate registration, an unregistered group, a payload the durable
//! store cannot hold) are ordinary values that callers check inline; the
//! library never panics on them.

use thiserror::Error;

use crate::observation::Selector;
use crate::storage::StorageError;

/// Validation errors raised while building an observation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("An observation needs an observer, a source, or both")]
    MissingIdentity,

    #[error("An observer callback requires an observer owner")]
    ObserverCallbackWithoutObserver,

    #[error("Owner '{role}' was already dropped")]
    OwnerGone {
        role: &'static str,
    },

    #[error("Selector cannot be empty: {what}")]
    EmptySelector {
        what: &'static str,
    },

    #[error("Reliable delivery is only available for app group selectors, not {selector}")]
    ReliableRequiresGroup {
        selector: String,
    },

    #[error("Invalid group identifier '{identifier}'")]
    InvalidGroupIdentifier {
        identifier: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Errors reported to the posting side of reliable delivery.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Payload cannot be stored: {message}")]
    Serialization {
        message: String,
    },

    #[error("Durable store unavailable: {0}")]
    StorageUnavailable(#[from] StorageError),

    #[error("No subscribers for {group}/{name}")]
    NoSubscribers {
        group: String,
        name: String,
    },
}

/// Top-level error type for watchpost.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("An observation for {selector} is already registered for these owners")]
    Duplicate {
        selector: Selector,
    },

    #[error("Group '{group}' has not been registered")]
    MissingPrecondition {
        group: String,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl WatchError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if an identical observation already exists.
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    /// Returns true if a group registration was missing.
    #[must_use]
    pub const fn is_missing_precondition(&self) -> bool {
        matches!(self, Self::MissingPrecondition { .. })
    }

    /// Returns true if this is a reliable-delivery failure.
    #[must_use]
    pub const fn is_delivery(&self) -> bool {
        matches!(self, Self::Delivery(_))
    }

    /// Returns true if retrying the same call could succeed.
    ///
    /// Only a store outage is transient; everything else is a property of
    /// the request itself.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Delivery(DeliveryError::StorageUnavailable(_)))
    }
}

impl From<StorageError> for WatchError {
    fn from(err: StorageError) -> Self {
        Self::Delivery(DeliveryError::StorageUnavailable(err))
    }
}

/// Result type alias for watchpost operations.
pub type WatchResult<T> = Result<T, WatchError>;
