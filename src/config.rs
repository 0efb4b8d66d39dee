//! Hub configuration.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ValidationError, WatchError, WatchResult};

/// Default accepted group identifiers: dot-separated alphanumeric labels
/// (hyphens and underscores allowed inside a label).
pub const DEFAULT_GROUP_PATTERN: &str = r"^[A-Za-z0-9]+(?:[-_][A-Za-z0-9]+)*(?:\.[A-Za-z0-9]+(?:[-_][A-Za-z0-9]+)*)*$";

const MAX_GROUP_LEN: usize = 255;

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// How often a post also garbage-collects its group: 0 never, 1 on
    /// every post, N on a random one in N posts.
    pub cleanup_frequency: u32,
    /// When false, posting to a key with no reliable intent and no live
    /// observation fails with `NoSubscribers` instead of being stored.
    pub permit_posts_without_subscribers: bool,
    /// Regular expression a group identifier must match.
    pub group_pattern: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            cleanup_frequency: 0,
            permit_posts_without_subscribers: true,
            group_pattern: DEFAULT_GROUP_PATTERN.to_string(),
        }
    }
}

impl HubConfig {
    #[must_use]
    pub const fn with_cleanup_frequency(mut self, frequency: u32) -> Self {
        self.cleanup_frequency = frequency;
        self
    }

    #[must_use]
    pub const fn with_permit_posts_without_subscribers(mut self, permit: bool) -> Self {
        self.permit_posts_without_subscribers = permit;
        self
    }

    /// Check the configuration.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `group_pattern` is not a valid regular
    /// expression.
    pub fn validate(self) -> WatchResult<Self> {
        self.compile_group_pattern()?;
        Ok(self)
    }

    pub(crate) fn compile_group_pattern(&self) -> WatchResult<GroupPattern> {
        let regex = Regex::new(&self.group_pattern).map_err(|e| {
            WatchError::from(ValidationError::InvalidConfig {
                reason: format!("invalid group_pattern '{}': {e}", self.group_pattern),
            })
        })?;
        Ok(GroupPattern { regex })
    }
}

/// Compiled group identifier check.
#[derive(Debug, Clone)]
pub(crate) struct GroupPattern {
    regex: Regex,
}

impl GroupPattern {
    pub(crate) fn check(&self, group: &str) -> Result<(), ValidationError> {
        if group.len() > MAX_GROUP_LEN || !self.regex.is_match(group) {
            return Err(ValidationError::InvalidGroupIdentifier {
                identifier: group.to_string(),
            });
        }
        Ok(())
    }
}
