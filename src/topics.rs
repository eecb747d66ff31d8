//! Topic pattern matching
//!
//! Topics are flat names: `[a-zA-Z0-9_-]+`, e.g. `upload` or `alerts_prod`.
//!
//! A pattern is a topic name with an optional single trailing wildcard:
//! - `upload` matches only `upload`
//! - `up*` matches `up`, `upload`, `uploads`, ...
//! - `*` matches every topic (this is also the name of the anonymous user)
//!
//! Matching is case-sensitive. No embedded wildcards, no regex semantics.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Valid characters for a topic name
fn is_valid_topic_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("topic pattern cannot be empty")]
    Empty,

    #[error("wildcard '*' can only appear at the end of a pattern")]
    EmbeddedWildcard,

    #[error("invalid character '{0}' in topic pattern: must match [a-zA-Z0-9_-]")]
    InvalidChar(char),
}

/// A validated topic pattern: a literal prefix plus an optional trailing wildcard
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPattern {
    /// The literal part before the wildcard (or the full name if no wildcard)
    prefix: String,
    /// Whether this pattern ends with a wildcard
    is_wildcard: bool,
}

impl TopicPattern {
    /// Parse and validate a topic pattern
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }

        let (prefix, is_wildcard) = match pattern.strip_suffix('*') {
            Some(prefix) => (prefix, true),
            None => (pattern, false),
        };

        for c in prefix.chars() {
            if c == '*' {
                return Err(PatternError::EmbeddedWildcard);
            }
            if !is_valid_topic_char(c) {
                return Err(PatternError::InvalidChar(c));
            }
        }

        Ok(Self {
            prefix: prefix.to_string(),
            is_wildcard,
        })
    }

    /// Check if this pattern matches a topic
    ///
    /// Exact string equality for literal patterns; prefix comparison for
    /// wildcard patterns. The bare prefix itself matches its own wildcard,
    /// so `up*` matches `up`.
    pub fn matches(&self, topic: &str) -> bool {
        if self.is_wildcard {
            topic.starts_with(&self.prefix)
        } else {
            topic == self.prefix
        }
    }

    /// Length of the literal prefix this pattern shares with a matching topic
    ///
    /// Used as the specificity score during permission resolution: an exact
    /// pattern covers the whole topic, a wildcard only its prefix. Only
    /// meaningful when `matches(topic)` is true.
    pub fn literal_overlap(&self, topic: &str) -> usize {
        if self.is_wildcard {
            self.prefix.len()
        } else {
            topic.len()
        }
    }

    /// Get the literal prefix (without the wildcard)
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Check if this is a wildcard pattern
    pub fn is_wildcard(&self) -> bool {
        self.is_wildcard
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_wildcard {
            write!(f, "{}*", self.prefix)
        } else {
            write!(f, "{}", self.prefix)
        }
    }
}

impl FromStr for TopicPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for TopicPattern {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TopicPattern {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TopicPattern::parse(&s).map_err(serde::de::Error::custom)
    }
}
