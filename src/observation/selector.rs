//! Event selectors: the immutable "what" of an observation.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// What an observation listens for.
///
/// Two observations with the same owners and equal selectors are the same
/// subscription; key-path selectors compare as sets.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Selector {
    /// One or more key paths on the source's property set.
    KeyPaths { key_paths: BTreeSet<String> },

    /// A named broadcast notification.
    Notification { name: String },

    /// A named post within an app group.
    AppGroup { group: String, name: String },
}

impl Selector {
    #[must_use]
    pub fn key_path(key_path: impl Into<String>) -> Self {
        Self::key_paths([key_path.into()])
    }

    #[must_use]
    pub fn key_paths<I, S>(key_paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::KeyPaths {
            key_paths: key_paths.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn notification(name: impl Into<String>) -> Self {
        Self::Notification { name: name.into() }
    }

    #[must_use]
    pub fn app_group(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AppGroup {
            group: group.into(),
            name: name.into(),
        }
    }

    /// The app group this selector belongs to, if any.
    #[must_use]
    pub fn group(&self) -> Option<&str> {
        match self {
            Self::AppGroup { group, .. } => Some(group),
            _ => None,
        }
    }

    /// The notification or post name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Notification { name } | Self::AppGroup { name, .. } => Some(name),
            Self::KeyPaths { .. } => None,
        }
    }

    /// True if this selector watches `key_path`.
    #[must_use]
    pub fn watches_key_path(&self, key_path: &str) -> bool {
        matches!(self, Self::KeyPaths { key_paths } if key_paths.contains(key_path))
    }

    pub(crate) fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::KeyPaths { key_paths } => {
                if key_paths.is_empty() || key_paths.iter().any(|k| k.trim().is_empty()) {
                    return Err(ValidationError::EmptySelector { what: "key path" });
                }
            }
            Self::Notification { name } => {
                if name.trim().is_empty() {
                    return Err(ValidationError::EmptySelector { what: "notification name" });
                }
            }
            Self::AppGroup { group, name } => {
                if group.trim().is_empty() {
                    return Err(ValidationError::EmptySelector { what: "group" });
                }
                if name.trim().is_empty() {
                    return Err(ValidationError::EmptySelector { what: "post name" });
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyPaths { key_paths } => {
                let joined: Vec<&str> = key_paths.iter().map(String::as_str).collect();
                write!(f, "key paths [{}]", joined.join(", "))
            }
            Self::Notification { name } => write!(f, "notification '{name}'"),
            Self::AppGroup { group, name } => write!(f, "app group post '{group}/{name}'"),
        }
    }
}
