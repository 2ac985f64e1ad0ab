// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Status Snapshots
//!
//! A [`StatusSnapshot`] is the coordinator's read-only copy of the status
//! document an agent owns. Two synthetic forms exist besides parsed ones:
//!
//! - [`StatusSnapshot::unknown`]: the document is missing or unreadable.
//! - [`StatusSnapshot::parse_failure`]: the document exists but is invalid;
//!   the raw parser error is kept on the snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::agent::AgentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Idle,
    Busy,
    Blocked,
    Error,
    /// No readable snapshot
    Unknown,
}

impl AgentState {
    /// Parse the status enum of a snapshot document. `unknown` is a cache
    /// state, not something an agent may declare.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "idle" => Some(Self::Idle),
            "busy" => Some(Self::Busy),
            "blocked" => Some(Self::Blocked),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Blocked => "blocked",
            Self::Error => "error",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// One line of an agent's communication log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunicationEntry {
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    pub peer: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub agent_id: AgentId,
    pub agent_type: Option<String>,
    /// Timestamp the agent wrote into its document
    pub last_updated: Option<DateTime<Utc>>,
    pub state: AgentState,
    pub current_task: Option<String>,
    /// Percent complete, 0-100
    pub progress: Option<u8>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub waiting_for: Vec<String>,
    #[serde(default)]
    pub available_for: Vec<String>,
    #[serde(default)]
    pub next_actions: Vec<String>,
    /// Most recent entries, oldest first
    #[serde(default)]
    pub recent_messages: Vec<CommunicationEntry>,
    pub parse_error: Option<String>,
    /// When the synchronizer produced this copy
    pub observed_at: DateTime<Utc>,
}

impl StatusSnapshot {
    pub fn new(agent_id: AgentId, state: AgentState) -> Self {
        Self {
            agent_id,
            agent_type: None,
            last_updated: None,
            state,
            current_task: None,
            progress: None,
            dependencies: Vec::new(),
            waiting_for: Vec::new(),
            available_for: Vec::new(),
            next_actions: Vec::new(),
            recent_messages: Vec::new(),
            parse_error: None,
            observed_at: Utc::now(),
        }
    }

    pub fn unknown(agent_id: AgentId) -> Self {
        Self::new(agent_id, AgentState::Unknown)
    }

    pub fn parse_failure(agent_id: AgentId, error: impl Into<String>) -> Self {
        let mut snapshot = Self::new(agent_id, AgentState::Error);
        snapshot.parse_error = Some(error.into());
        snapshot
    }

    /// Equality ignoring `observed_at`
    pub fn same_content(&self, other: &StatusSnapshot) -> bool {
        let mut other = other.clone();
        other.observed_at = self.observed_at;
        *self == other
    }

    /// Keep only the newest `limit` log entries, ordered oldest first.
    pub fn truncate_log(&mut self, limit: usize) {
        self.recent_messages.sort_by_key(|e| e.timestamp);
        if self.recent_messages.len() > limit {
            let excess = self.recent_messages.len() - limit;
            self.recent_messages.drain(..excess);
        }
    }

    pub fn is_available(&self) -> bool {
        self.state == AgentState::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(minute: u32, summary: &str) -> CommunicationEntry {
        CommunicationEntry {
            timestamp: Utc.with_ymd_and_hms(2026, 10, 18, 12, minute, 0).unwrap(),
            direction: Direction::Outbound,
            peer: "green-agent".to_string(),
            summary: summary.to_string(),
        }
    }

    #[test]
    fn test_truncate_keeps_newest() {
        let mut snapshot = StatusSnapshot::new(AgentId::new("red-agent").unwrap(), AgentState::Busy);
        snapshot.recent_messages = vec![entry(3, "c"), entry(1, "a"), entry(2, "b")];

        snapshot.truncate_log(2);

        let summaries: Vec<_> = snapshot.recent_messages.iter().map(|e| e.summary.as_str()).collect();
        assert_eq!(summaries, vec!["b", "c"]);
    }

    #[test]
    fn test_same_content_ignores_observation_time() {
        let a = StatusSnapshot::new(AgentId::new("red-agent").unwrap(), AgentState::Idle);
        let mut b = a.clone();
        b.observed_at = a.observed_at + chrono::Duration::seconds(5);
        assert!(a.same_content(&b));

        b.state = AgentState::Busy;
        assert!(!a.same_content(&b));
    }

    #[test]
    fn test_unknown_is_not_a_declarable_state() {
        assert_eq!(AgentState::parse("Busy"), Some(AgentState::Busy));
        assert_eq!(AgentState::parse("unknown"), None);
    }
}
