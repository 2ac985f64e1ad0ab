// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Delivery Domain Types
//!
//! A [`DeliveryRecord`] tracks one message's progress to one resolved target.
//! Records live in the delivery manager's arena, keyed by [`DeliveryKey`],
//! until they reach a terminal [`DeliveryOutcome`].
//!
//! [`MessageTransport`] is the seam to whatever actually carries bytes to an
//! agent. Transports acknowledge by message id; a receiver that sees the same
//! id twice must acknowledge without acting on it again.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::agent::AgentId;
use crate::domain::message::{AgentMessage, CorrelationId, MessageId, MessageType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    /// Named agent destination
    Direct,
    /// Receivers selected by interest patterns
    Pattern,
    /// Broadcast to every registered agent except the sender
    Fanout,
}

/// One concrete receiver produced by routing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedTarget {
    pub agent_id: AgentId,
    pub mode: RoutingMode,
    /// Registry snapshot the target was resolved against
    pub registry_version: u64,
}

impl ResolvedTarget {
    pub fn direct(agent_id: AgentId, registry_version: u64) -> Self {
        Self {
            agent_id,
            mode: RoutingMode::Direct,
            registry_version,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryKey {
    pub message_id: MessageId,
    pub target: AgentId,
}

impl fmt::Display for DeliveryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.message_id, self.target)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeliveryState {
    /// Waiting behind earlier messages of the same (source, target) lane
    Queued,
    Attempting,
    AwaitingRetry { next_attempt_at: DateTime<Utc> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub key: DeliveryKey,
    pub source: AgentId,
    pub message_type: MessageType,
    pub correlation_id: Option<CorrelationId>,
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub state: DeliveryState,
    pub created_at: DateTime<Utc>,
}

impl DeliveryRecord {
    pub fn new(message: &AgentMessage, target: &AgentId) -> Self {
        Self {
            key: DeliveryKey {
                message_id: message.id,
                target: target.clone(),
            },
            source: message.source.clone(),
            message_type: message.message_type,
            correlation_id: message.correlation_id.clone(),
            attempts: 0,
            last_attempt_at: None,
            last_error: None,
            state: DeliveryState::Queued,
            created_at: Utc::now(),
        }
    }
}

/// Terminal result of one delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    /// TTL elapsed before an attempt succeeded
    Expired { attempts: u32 },
    /// Retries exhausted or the receiver rejected the message permanently
    DeadLettered { attempts: u32, last_error: String },
    Cancelled { attempts: u32 },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Delivered { attempts }
            | Self::Expired { attempts }
            | Self::DeadLettered { attempts, .. }
            | Self::Cancelled { attempts } => *attempts,
        }
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delivered { attempts } => write!(f, "delivered after {attempts} attempt(s)"),
            Self::Expired { attempts } => write!(f, "expired after {attempts} attempt(s)"),
            Self::DeadLettered { attempts, last_error } => {
                write!(f, "dead-lettered after {attempts} attempt(s): {last_error}")
            }
            Self::Cancelled { attempts } => write!(f, "cancelled after {attempts} attempt(s)"),
        }
    }
}

/// A message parked after its delivery terminally failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub message: AgentMessage,
    pub target: AgentId,
    pub attempts: u32,
    pub last_error: String,
    pub dead_lettered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub message_id: MessageId,
    pub receiver: AgentId,
    /// The receiver had already seen this message id
    pub duplicate: bool,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("agent {0} is unreachable")]
    Unreachable(AgentId),

    #[error("agent {agent} rejected the message: {reason}")]
    Rejected { agent: AgentId, reason: String },

    #[error("transport error: {0}")]
    Io(String),
}

impl TransportError {
    /// Rejections are permanent; everything else may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Hand `message` to `target` and wait for its acknowledgment. The caller
    /// bounds the wait with its own ack timeout.
    async fn send(
        &self,
        target: &ResolvedTarget,
        message: &AgentMessage,
    ) -> Result<Acknowledgement, TransportError>;
}
