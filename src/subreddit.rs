// 🏷️ Subreddit names and followed records
//
// A name is validated once, at the edge, and carried as a `SubredditName`
// from then on. Stores and the admission pipeline never see raw input.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Longest name accepted, in characters
pub const MAX_NAME_LEN: usize = 180;

// ============================================================================
// VALIDATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("subreddit name is empty")]
    Empty,

    #[error("subreddit name is {length} characters, limit is {}", MAX_NAME_LEN)]
    TooLong { length: usize },
}

// ============================================================================
// SUBREDDIT NAME
// ============================================================================

/// A trimmed, non-empty subreddit name of at most 180 characters.
///
/// Case is preserved: `rust` and `Rust` are different names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubredditName(String);

impl SubredditName {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return Err(ValidationError::Empty);
        }

        // Django-style max_length counts characters, not bytes
        let length = trimmed.chars().count();
        if length > MAX_NAME_LEN {
            return Err(ValidationError::TooLong { length });
        }

        Ok(SubredditName(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for SubredditName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubredditName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SubredditName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        SubredditName::parse(&value)
    }
}

impl From<SubredditName> for String {
    fn from(name: SubredditName) -> Self {
        name.0
    }
}

// ============================================================================
// FOLLOWED SUBREDDIT
// ============================================================================

/// One subreddit currently being tracked.
///
/// `followed_at` is stamped at creation and never changes; it decides
/// eviction order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowedSubreddit {
    pub name: SubredditName,
    pub followed_at: DateTime<Utc>,
}

impl FollowedSubreddit {
    pub fn new(name: SubredditName) -> Self {
        Self::at(name, Utc::now())
    }

    pub fn at(name: SubredditName, followed_at: DateTime<Utc>) -> Self {
        FollowedSubreddit { name, followed_at }
    }
}

// ============================================================================
// TESTS
// ============================================================================
