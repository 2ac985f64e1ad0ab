// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Messages (wire schema v1.0)
//!
//! [`AgentMessage`] is the unit every participant exchanges. It is immutable
//! once sent; builders consume `self` so a message is fully formed before it
//! reaches the router.
//!
//! ## Wire format
//!
//! ```json
//! {
//!   "id": "7f0c…",
//!   "version": "1.0",
//!   "timestamp": "2026-10-18T12:00:00Z",
//!   "source": "red-agent",
//!   "destination": "green-agent",
//!   "correlationId": "req-42",
//!   "type": "TASK_ASSIGNMENT",
//!   "priority": "high",
//!   "payload": { "task": "make the failing test pass" },
//!   "requiresAck": true,
//!   "ttl": 30000,
//!   "retryPolicy": { "maxAttempts": 5, "baseDelayMs": 1000, "multiplier": 2.0 }
//! }
//! ```
//!
//! `destination` is an agent id, `"broadcast"` or `"topic"`. `ttl` is in
//! milliseconds. `retryPolicy` may also carry `maxDelayMs` and a per-attempt
//! `ackTimeoutMs`. Unknown `version` values are rejected, never guessed at.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::agent::AgentId;

/// The only schema version this build speaks.
pub const MESSAGE_SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Links a response to the request that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Closed set of message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    TaskAssignment,
    TaskCompletion,
    CoordinationRequest,
    CoordinationResponse,
    PhaseTransitionStart,
    PhaseTransitionComplete,
    ReviewRequest,
    ClarificationRequest,
    StatusUpdate,
    WorkflowEvent,
}

impl MessageType {
    /// Wire name, also the string routing interests are matched against
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskAssignment => "TASK_ASSIGNMENT",
            Self::TaskCompletion => "TASK_COMPLETION",
            Self::CoordinationRequest => "COORDINATION_REQUEST",
            Self::CoordinationResponse => "COORDINATION_RESPONSE",
            Self::PhaseTransitionStart => "PHASE_TRANSITION_START",
            Self::PhaseTransitionComplete => "PHASE_TRANSITION_COMPLETE",
            Self::ReviewRequest => "REVIEW_REQUEST",
            Self::ClarificationRequest => "CLARIFICATION_REQUEST",
            Self::StatusUpdate => "STATUS_UPDATE",
            Self::WorkflowEvent => "WORKFLOW_EVENT",
        }
    }

    /// Message kinds that answer an earlier request
    pub fn is_response(&self) -> bool {
        matches!(self, Self::CoordinationResponse | Self::TaskCompletion)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Logical destination of a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Destination {
    /// Exactly one registered agent
    Agent(AgentId),
    /// Every registered agent except the sender
    Broadcast,
    /// Every agent whose interest patterns match the message type
    Topic,
}

impl Destination {
    pub fn agent(&self) -> Option<&AgentId> {
        match self {
            Self::Agent(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Agent(id) => write!(f, "{id}"),
            Self::Broadcast => f.write_str("broadcast"),
            Self::Topic => f.write_str("topic"),
        }
    }
}

impl From<AgentId> for Destination {
    fn from(id: AgentId) -> Self {
        Self::Agent(id)
    }
}

impl TryFrom<String> for Destination {
    type Error = MessageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_ascii_lowercase().as_str() {
            "broadcast" => Ok(Self::Broadcast),
            "topic" => Ok(Self::Topic),
            _ => AgentId::new(value)
                .map(Self::Agent)
                .map_err(|e| MessageError::InvalidDestination(e.to_string())),
        }
    }
}

impl From<Destination> for String {
    fn from(destination: Destination) -> Self {
        destination.to_string()
    }
}

/// Retry shape for one message: `base_delay * multiplier^(n-1)` before
/// attempt `n + 1`, at most `max_attempts` attempts in total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay", rename = "baseDelayMs", with = "duration_ms")]
    pub base_delay: Duration,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(
        default,
        rename = "maxDelayMs",
        with = "optional_duration_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_delay: Option<Duration>,

    /// Per-attempt acknowledgment timeout; the configured one when absent
    #[serde(
        default,
        rename = "ackTimeoutMs",
        with = "optional_duration_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub ack_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            multiplier: default_multiplier(),
            max_delay: None,
            ack_timeout: None,
        }
    }
}

/// Upper bound on a single backoff, whatever the policy asks for.
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Largest multiplier a policy may carry.
pub const MAX_BACKOFF_MULTIPLIER: f64 = 100.0;

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            multiplier,
            max_delay: None,
            ack_timeout: None,
        }
    }

    /// Backoff to wait after `failed_attempts` consecutive failures, never
    /// more than `max_delay` or [`MAX_BACKOFF`].
    pub fn backoff_after(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(32) as i32;
        let multiplier = if self.multiplier.is_finite() {
            self.multiplier.max(1.0)
        } else {
            MAX_BACKOFF_MULTIPLIER
        };
        let seconds = self.base_delay.as_secs_f64() * multiplier.powi(exponent);
        let cap = self.max_delay.map_or(MAX_BACKOFF, |cap| cap.min(MAX_BACKOFF));
        Duration::try_from_secs_f64(seconds).map_or(cap, |delay| delay.min(cap))
    }

    /// Range checks shared by wire ingress and configuration.
    pub fn check(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("maxAttempts must be at least 1".to_string());
        }
        if !self.multiplier.is_finite()
            || !(1.0..=MAX_BACKOFF_MULTIPLIER).contains(&self.multiplier)
        {
            return Err(format!(
                "multiplier must be between 1.0 and {}, got {}",
                MAX_BACKOFF_MULTIPLIER, self.multiplier
            ));
        }
        if self.ack_timeout.is_some_and(|t| t.is_zero()) {
            return Err("ackTimeoutMs must be positive".to_string());
        }
        Ok(())
    }

    pub fn has_attempts_left(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts.max(1)
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_multiplier() -> f64 {
    2.0
}

/// An immutable message between two participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMessage {
    pub id: MessageId,
    pub version: String,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
    pub source: AgentId,
    pub destination: Destination,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub priority: Priority,
    pub payload: serde_json::Value,
    pub requires_ack: bool,
    #[serde(default, with = "optional_duration_ms", skip_serializing_if = "Option::is_none")]
    pub ttl: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
}

impl AgentMessage {
    pub fn new(
        source: AgentId,
        destination: impl Into<Destination>,
        message_type: MessageType,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: MessageId::new(),
            version: MESSAGE_SCHEMA_VERSION.to_string(),
            created_at: Utc::now(),
            source,
            destination: destination.into(),
            reply_to: None,
            correlation_id: None,
            message_type,
            priority: Priority::Normal,
            payload,
            requires_ack: false,
            ttl: None,
            retry_policy: None,
        }
    }

    /// Build a response addressed back to the request's source, carrying the
    /// request's correlation id.
    pub fn reply_to(
        request: &AgentMessage,
        source: AgentId,
        message_type: MessageType,
        payload: serde_json::Value,
    ) -> Self {
        let mut reply = Self::new(source, request.source.clone(), message_type, payload);
        reply.reply_to = Some(request.id);
        reply.correlation_id = request.correlation_id.clone();
        reply.priority = request.priority;
        reply
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Mark the message as acknowledged; generates a correlation id when
    /// none was set.
    pub fn requiring_ack(mut self) -> Self {
        self.requires_ack = true;
        if self.correlation_id.is_none() {
            self.correlation_id = Some(CorrelationId::generate());
        }
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Time left before the TTL elapses at `now`. `None` when the message
    /// has no TTL or one too large to ever elapse.
    pub fn ttl_remaining_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        let ttl = chrono::Duration::from_std(self.ttl?).ok()?;
        let deadline = self.created_at.checked_add_signed(ttl)?;
        Some((deadline - now).to_std().unwrap_or(Duration::ZERO))
    }

    pub fn ttl_remaining(&self) -> Option<Duration> {
        self.ttl_remaining_at(Utc::now())
    }

    /// Whether the TTL has elapsed at `now`; a zero TTL is always expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.ttl_remaining_at(now).is_some_and(|left| left.is_zero())
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Structural checks applied at ingress.
    pub fn validate(&self) -> Result<(), MessageError> {
        if self.version != MESSAGE_SCHEMA_VERSION {
            return Err(MessageError::UnsupportedVersion(self.version.clone()));
        }
        if self.requires_ack && self.correlation_id.is_none() {
            return Err(MessageError::MissingCorrelationId(self.id));
        }
        if let Some(policy) = &self.retry_policy {
            policy.check().map_err(MessageError::InvalidRetryPolicy)?;
        }
        Ok(())
    }

    /// Decode a wire-format message. The version is checked before the rest
    /// of the document so a future schema fails as `UnsupportedVersion`
    /// rather than as a field error.
    pub fn from_wire(raw: &str) -> Result<Self, MessageError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| MessageError::Malformed(e.to_string()))?;

        match value.get("version").and_then(|v| v.as_str()) {
            Some(MESSAGE_SCHEMA_VERSION) => {}
            Some(other) => return Err(MessageError::UnsupportedVersion(other.to_string())),
            None => return Err(MessageError::Malformed("missing field `version`".to_string())),
        }

        let message: AgentMessage =
            serde_json::from_value(value).map_err(|e| MessageError::Malformed(e.to_string()))?;
        message.validate()?;
        Ok(message)
    }

    pub fn to_wire(&self) -> Result<String, MessageError> {
        serde_json::to_string(self).map_err(|e| MessageError::Malformed(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MessageError {
    #[error("unsupported message schema version {0:?}")]
    UnsupportedVersion(String),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    #[error("message {0} requires an ack but carries no correlation id")]
    MissingCorrelationId(MessageId),

    #[error("invalid retry policy: {0}")]
    InvalidRetryPolicy(String),
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod optional_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
