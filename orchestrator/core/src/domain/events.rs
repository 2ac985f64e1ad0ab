// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Coordination Events
//!
//! Facts recorded in the event store. Only terminal outcomes and real state
//! changes are events; retry attempts and other in-component transients are
//! logged, never appended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentId;
use crate::domain::message::{AgentMessage, CorrelationId, MessageId, MessageType};
use crate::domain::phase::TddPhase;
use crate::domain::status::AgentState;
use crate::domain::topic::Topic;
use crate::domain::workflow::{WorkflowDefinitionId, WorkflowInstanceId};

/// One appended event. Immutable; `offset` is gap-free per topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub offset: u64,
    pub topic: Topic,
    pub timestamp: DateTime<Utc>,
    pub emitted_by: String,
    pub payload: CoordinationEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinationEvent {
    // ---- delivery ---------------------------------------------------------
    Delivered {
        message_id: MessageId,
        message_type: MessageType,
        source: AgentId,
        target: AgentId,
        correlation_id: Option<CorrelationId>,
        attempts: u32,
    },
    /// Retries exhausted; the message is in the dead-letter queue. The full
    /// message is kept so an operator can replay it from the log.
    DeliveryFailed {
        message: Box<AgentMessage>,
        target: AgentId,
        attempts: u32,
        last_error: String,
    },
    Expired {
        message_id: MessageId,
        message_type: MessageType,
        source: AgentId,
        target: AgentId,
        correlation_id: Option<CorrelationId>,
        attempts: u32,
    },
    DeliveryCancelled {
        message_id: MessageId,
        source: AgentId,
        target: AgentId,
        correlation_id: Option<CorrelationId>,
        attempts: u32,
    },

    // ---- registry ---------------------------------------------------------
    AgentRegistered {
        agent_id: AgentId,
        capabilities: Vec<String>,
        registry_version: u64,
    },
    AgentDeregistered {
        agent_id: AgentId,
        registry_version: u64,
    },

    // ---- status -----------------------------------------------------------
    StatusChanged {
        agent_id: AgentId,
        previous: Option<AgentState>,
        current: AgentState,
        current_task: Option<String>,
        parse_error: Option<String>,
    },

    // ---- workflow ---------------------------------------------------------
    WorkflowStarted {
        instance_id: WorkflowInstanceId,
        definition_id: WorkflowDefinitionId,
        step_count: usize,
    },
    StepAssigned {
        instance_id: WorkflowInstanceId,
        step_index: usize,
        step_name: String,
        agent_id: AgentId,
        correlation_id: CorrelationId,
    },
    StepCompleted {
        instance_id: WorkflowInstanceId,
        step_index: usize,
        step_name: String,
    },
    StepFailed {
        instance_id: WorkflowInstanceId,
        step_index: usize,
        step_name: String,
        reason: String,
    },
    CompensationIssued {
        instance_id: WorkflowInstanceId,
        step_index: usize,
        step_name: String,
        agent_id: AgentId,
    },
    WorkflowCompleted {
        instance_id: WorkflowInstanceId,
    },
    WorkflowFailed {
        instance_id: WorkflowInstanceId,
        reason: String,
        cancelled: bool,
    },
    WorkflowRolledBack {
        instance_id: WorkflowInstanceId,
        compensated_steps: usize,
    },
    PhaseTransitioned {
        instance_id: WorkflowInstanceId,
        from: TddPhase,
        to: TddPhase,
    },

    // ---- operator alerts --------------------------------------------------
    AlertRaised {
        kind: AlertKind,
        detail: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Dead-letters within the alert window reached the threshold
    SustainedDeadLettering,
    /// A message was routed while no agent was registered at all
    RoutingTableEmpty,
}

impl CoordinationEvent {
    /// Short snake_case name, used for logs and metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Delivered { .. } => "delivered",
            Self::DeliveryFailed { .. } => "delivery_failed",
            Self::Expired { .. } => "expired",
            Self::DeliveryCancelled { .. } => "delivery_cancelled",
            Self::AgentRegistered { .. } => "agent_registered",
            Self::AgentDeregistered { .. } => "agent_deregistered",
            Self::StatusChanged { .. } => "status_changed",
            Self::WorkflowStarted { .. } => "workflow_started",
            Self::StepAssigned { .. } => "step_assigned",
            Self::StepCompleted { .. } => "step_completed",
            Self::StepFailed { .. } => "step_failed",
            Self::CompensationIssued { .. } => "compensation_issued",
            Self::WorkflowCompleted { .. } => "workflow_completed",
            Self::WorkflowFailed { .. } => "workflow_failed",
            Self::WorkflowRolledBack { .. } => "workflow_rolled_back",
            Self::PhaseTransitioned { .. } => "phase_transitioned",
            Self::AlertRaised { .. } => "alert_raised",
        }
    }

    /// Correlation id of the delivery this event reports on, if any
    pub fn delivery_correlation(&self) -> Option<&CorrelationId> {
        match self {
            Self::Delivered { correlation_id, .. }
            | Self::Expired { correlation_id, .. }
            | Self::DeliveryCancelled { correlation_id, .. } => correlation_id.as_ref(),
            Self::DeliveryFailed { message, .. } => message.correlation_id.as_ref(),
            _ => None,
        }
    }
}
