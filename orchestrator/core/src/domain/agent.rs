// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Identity & Registration
//!
//! - [`AgentId`] — validated, human-readable participant name.
//! - [`AgentRegistration`] — what the routing registry knows about an agent:
//!   its capabilities and the message-type patterns it is interested in.
//!
//! Agent identifiers double as snapshot file stems for the status
//! synchronizer, so they are restricted to a filesystem-safe alphabet.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::topic::TopicPattern;

/// Destination words that can never be used as agent names.
pub const RESERVED_AGENT_NAMES: &[&str] = &["broadcast", "topic"];

/// Unique, stable name of a participating agent (e.g. `red-agent`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentId(String);

impl AgentId {
    /// Create a new AgentId with validation
    ///
    /// # Validation Rules
    /// - 1-128 characters
    /// - ASCII alphanumeric plus `-`, `_` and `.`
    /// - Not one of [`RESERVED_AGENT_NAMES`]
    pub fn new(id: impl Into<String>) -> Result<Self, AgentIdError> {
        let id = id.into();
        if id.is_empty() || id.len() > 128 {
            return Err(AgentIdError::InvalidLength(id));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(AgentIdError::InvalidCharacters(id));
        }
        if RESERVED_AGENT_NAMES.contains(&id.to_ascii_lowercase().as_str()) {
            return Err(AgentIdError::Reserved(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AgentId {
    type Error = AgentIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AgentId> for String {
    fn from(id: AgentId) -> Self {
        id.0
    }
}

impl std::str::FromStr for AgentId {
    type Err = AgentIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentIdError {
    #[error("agent id must be 1-128 characters, got {0:?}")]
    InvalidLength(String),

    #[error("agent id {0:?} may only contain ASCII alphanumerics, '-', '_' and '.'")]
    InvalidCharacters(String),

    #[error("agent id {0:?} is a reserved destination name")]
    Reserved(String),
}

/// Registry entry for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub id: AgentId,

    /// Free-form capability tags (e.g. `test-writer`, `reviewer`)
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Message-type patterns this agent receives for `topic` destinations
    #[serde(default)]
    pub interests: Vec<TopicPattern>,

    pub registered_at: DateTime<Utc>,
}

impl AgentRegistration {
    pub fn new(id: AgentId, capabilities: Vec<String>) -> Self {
        Self {
            id,
            capabilities,
            interests: Vec::new(),
            registered_at: Utc::now(),
        }
    }

    pub fn with_interests(mut self, interests: Vec<TopicPattern>) -> Self {
        self.interests = interests;
        self
    }

    /// Whether any interest pattern matches the given message type name
    pub fn is_interested_in(&self, type_name: &str) -> bool {
        self.interests.iter().any(|p| p.matches(type_name))
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_id_validation() {
        assert!(AgentId::new("red-agent").is_ok());
        assert!(AgentId::new("agent_01.v2").is_ok());
        assert!(matches!(AgentId::new(""), Err(AgentIdError::InvalidLength(_))));
        assert!(matches!(
            AgentId::new("bad/agent"),
            Err(AgentIdError::InvalidCharacters(_))
        ));
        assert!(matches!(AgentId::new("broadcast"), Err(AgentIdError::Reserved(_))));
        assert!(matches!(AgentId::new("Topic"), Err(AgentIdError::Reserved(_))));
    }

    #[test]
    fn test_agent_id_serde_rejects_invalid() {
        let ok: AgentId = serde_json::from_str("\"green-agent\"").unwrap();
        assert_eq!(ok.as_str(), "green-agent");
        assert!(serde_json::from_str::<AgentId>("\"broadcast\"").is_err());
    }

    #[test]
    fn test_registration_interest_matching() {
        let registration = AgentRegistration::new(AgentId::new("reviewer").unwrap(), vec![])
            .with_interests(vec![TopicPattern::new("REVIEW_*").unwrap()]);

        assert!(registration.is_interested_in("REVIEW_REQUEST"));
        assert!(!registration.is_interested_in("TASK_ASSIGNMENT"));
    }
}
