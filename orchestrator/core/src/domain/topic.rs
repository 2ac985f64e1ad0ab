// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Topics & Topic Patterns
//!
//! A [`Topic`] names one totally-ordered log in the event store. A
//! [`TopicPattern`] is an anchored, case-insensitive glob (`*` matches any run
//! of characters) used both for event subscriptions (`workflow`, `*`) and for
//! agent routing interests against message type names (`TASK_*`).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Well-known topics written by the coordination core.
pub mod topics {
    pub const DELIVERY: &str = "delivery";
    pub const STATUS: &str = "status";
    pub const WORKFLOW: &str = "workflow";
    pub const PHASE: &str = "phase";
    pub const AGENTS: &str = "agents";
    pub const ALERTS: &str = "alerts";
}

/// Name of an event-store topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicPatternError {
    #[error("topic pattern cannot be empty")]
    Empty,

    #[error("invalid topic pattern {pattern:?}: {reason}")]
    Invalid { pattern: String, reason: String },
}

/// Compiled glob pattern over topic or message-type names.
#[derive(Clone)]
pub struct TopicPattern {
    source: String,
    /// `None` for the bare `*` pattern
    regex: Option<Regex>,
}

impl TopicPattern {
    pub fn new(pattern: impl Into<String>) -> Result<Self, TopicPatternError> {
        let source = pattern.into();
        if source.trim().is_empty() {
            return Err(TopicPatternError::Empty);
        }
        if source == "*" {
            return Ok(Self::any());
        }

        let body = source
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");

        let regex = Regex::new(&format!("(?i)^{body}$")).map_err(|e| TopicPatternError::Invalid {
            pattern: source.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            source,
            regex: Some(regex),
        })
    }

    /// Pattern matching every topic
    pub fn any() -> Self {
        Self {
            source: "*".to_string(),
            regex: None,
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.as_ref().map_or(true, |r| r.is_match(name))
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TopicPattern").field(&self.source).finish()
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl PartialEq for TopicPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for TopicPattern {}

impl std::str::FromStr for TopicPattern {
    type Err = TopicPatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TopicPattern {
    type Error = TopicPatternError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl Serialize for TopicPattern {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for TopicPattern {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_and_wildcard_matching() {
        let exact = TopicPattern::new("workflow").unwrap();
        assert!(exact.matches("workflow"));
        assert!(exact.matches("WORKFLOW"));
        assert!(!exact.matches("workflow-extra"));

        let prefix = TopicPattern::new("TASK_*").unwrap();
        assert!(prefix.matches("TASK_ASSIGNMENT"));
        assert!(prefix.matches("task_completion"));
        assert!(!prefix.matches("REVIEW_REQUEST"));

        assert!(TopicPattern::any().matches("anything-at-all"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let pattern = TopicPattern::new("a.b").unwrap();
        assert!(pattern.matches("a.b"));
        assert!(!pattern.matches("axb"));
    }

    #[test]
    fn test_empty_pattern_rejected() {
        assert_eq!(TopicPattern::new("  ").unwrap_err(), TopicPatternError::Empty);
    }
}
