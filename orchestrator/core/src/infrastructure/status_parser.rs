// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// Status Snapshot Parser - Agent-owned Markdown Status Documents
//
// Each agent maintains one markdown document describing itself:
//
// ```markdown
// # Agent Status
//
// ## Header
// - **Agent Type**: test-writer
// - **Agent ID**: red-agent
// - **Last Updated**: 2026-10-18T12:00:00Z
// - **Status**: busy
//
// ## Current Activity
// - **Task**: write failing test for the tokenizer
// - **Progress**: 40%
// - **Dependencies**: fixtures, green-agent
//
// ## Communication Log
// - 2026-10-18T11:58:00Z | outbound | green-agent | proposed interface
//
// ## Collaboration
// - **Waiting For**: green-agent
// - **Available For**: review
// - **Next Actions**: commit test, request review
// ```
//
// Sections may appear in any order and unknown sections are ignored. Only
// the status field is mandatory. List values are comma separated; `none`
// or `-` means empty.

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;

use crate::domain::agent::AgentId;
use crate::domain::status::{AgentState, CommunicationEntry, Direction, StatusSnapshot};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotParseError {
    #[error("status field is missing")]
    MissingStatus,

    #[error("invalid status {0:?}, expected idle, busy, blocked or error")]
    InvalidStatus(String),

    #[error("invalid timestamp in {field}: {value:?}")]
    InvalidTimestamp { field: String, value: String },

    #[error("invalid progress {0:?}, expected 0-100%")]
    InvalidProgress(String),

    #[error("invalid communication log entry on line {line}: {reason}")]
    InvalidLogEntry { line: usize, reason: String },

    #[error("document belongs to agent {found}, expected {expected}")]
    AgentMismatch { expected: String, found: String },

    #[error("section {0:?} appears more than once")]
    DuplicateSection(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Header,
    CurrentActivity,
    CommunicationLog,
    Collaboration,
    Other,
}

impl Section {
    fn from_title(title: &str) -> Self {
        match title.trim().to_ascii_lowercase().as_str() {
            "header" => Self::Header,
            "current activity" => Self::CurrentActivity,
            "communication log" => Self::CommunicationLog,
            "collaboration" => Self::Collaboration,
            _ => Self::Other,
        }
    }
}

pub struct StatusParser {
    log_limit: usize,
}

impl StatusParser {
    pub fn new(log_limit: usize) -> Self {
        Self { log_limit }
    }

    /// Parse the document of `agent_id`. The agent id inside the document is
    /// optional but must match when present.
    pub fn parse(&self, agent_id: &AgentId, raw: &str) -> Result<StatusSnapshot, SnapshotParseError> {
        let mut snapshot = StatusSnapshot::new(agent_id.clone(), AgentState::Unknown);
        let mut status: Option<AgentState> = None;
        let mut section = Section::Other;
        let mut seen_sections = Vec::new();

        for (index, line) in raw.lines().enumerate() {
            let line = line.trim();

            if let Some(title) = line.strip_prefix("## ") {
                section = Section::from_title(title);
                if section != Section::Other {
                    if seen_sections.contains(&section) {
                        return Err(SnapshotParseError::DuplicateSection(title.trim().to_string()));
                    }
                    seen_sections.push(section);
                }
                continue;
            }

            let Some(item) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) else {
                continue;
            };

            if section == Section::CommunicationLog {
                snapshot.recent_messages.push(parse_log_entry(index + 1, item)?);
                continue;
            }

            let Some((key, value)) = split_field(item) else {
                continue;
            };

            match (section, key.as_str()) {
                (Section::Header, "agent type") => snapshot.agent_type = non_empty(value),
                (Section::Header, "agent id") => {
                    if !value.is_empty() && value != agent_id.as_str() {
                        return Err(SnapshotParseError::AgentMismatch {
                            expected: agent_id.to_string(),
                            found: value.to_string(),
                        });
                    }
                }
                (Section::Header, "last updated") => {
                    snapshot.last_updated = Some(parse_timestamp("Last Updated", value)?);
                }
                (Section::Header, "status") => {
                    status = Some(
                        AgentState::parse(value)
                            .ok_or_else(|| SnapshotParseError::InvalidStatus(value.to_string()))?,
                    );
                }
                (Section::CurrentActivity, "task") => snapshot.current_task = non_empty(value),
                (Section::CurrentActivity, "progress") => {
                    snapshot.progress = parse_progress(value)?;
                }
                (Section::CurrentActivity, "dependencies") => snapshot.dependencies = parse_list(value),
                (Section::Collaboration, "waiting for") => snapshot.waiting_for = parse_list(value),
                (Section::Collaboration, "available for") => snapshot.available_for = parse_list(value),
                (Section::Collaboration, "next actions") => snapshot.next_actions = parse_list(value),
                _ => {}
            }
        }

        snapshot.state = status.ok_or(SnapshotParseError::MissingStatus)?;
        snapshot.truncate_log(self.log_limit);
        Ok(snapshot)
    }
}

/// `**Key**: value` → (lowercased key, value)
fn split_field(item: &str) -> Option<(String, &str)> {
    let rest = item.strip_prefix("**")?;
    let (key, rest) = rest.split_once("**")?;
    let value = rest.trim_start().strip_prefix(':')?;
    Some((key.trim().trim_end_matches(':').to_ascii_lowercase(), value.trim()))
}

fn non_empty(value: &str) -> Option<String> {
    if is_none_marker(value) {
        None
    } else {
        Some(value.to_string())
    }
}

fn is_none_marker(value: &str) -> bool {
    value.is_empty() || value == "-" || value.eq_ignore_ascii_case("none")
}

fn parse_list(value: &str) -> Vec<String> {
    if is_none_marker(value) {
        return Vec::new();
    }
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_progress(value: &str) -> Result<Option<u8>, SnapshotParseError> {
    if is_none_marker(value) {
        return Ok(None);
    }
    let number = value.trim_end_matches('%').trim();
    match number.parse::<u8>() {
        Ok(p) if p <= 100 => Ok(Some(p)),
        _ => Err(SnapshotParseError::InvalidProgress(value.to_string())),
    }
}

fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>, SnapshotParseError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|_| SnapshotParseError::InvalidTimestamp {
            field: field.to_string(),
            value: value.to_string(),
        })
}

/// `timestamp | direction | peer | summary`
fn parse_log_entry(line: usize, item: &str) -> Result<CommunicationEntry, SnapshotParseError> {
    let invalid = |reason: &str| SnapshotParseError::InvalidLogEntry {
        line,
        reason: reason.to_string(),
    };

    let mut parts = item.splitn(4, '|').map(str::trim);
    let (Some(ts), Some(direction), Some(peer), Some(summary)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid("expected `timestamp | direction | peer | summary`"));
    };

    let direction = match direction.to_ascii_lowercase().as_str() {
        "inbound" | "in" | "received" => Direction::Inbound,
        "outbound" | "out" | "sent" => Direction::Outbound,
        _ => return Err(invalid("direction must be inbound or outbound")),
    };

    Ok(CommunicationEntry {
        timestamp: parse_timestamp("Communication Log", ts)?,
        direction,
        peer: peer.to_string(),
        summary: summary.to_string(),
    })
}
