// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Workflow Domain Model
//!
//! Workflows are ordered lists of steps, each assigned to one agent. A
//! [`WorkflowInstance`] is the aggregate that walks those steps:
//!
//! ```text
//! PENDING ──start──▶ RUNNING ──step completed──▶ RUNNING (next step)
//!                       │                           │
//!                       │                           └─last step──▶ COMPLETED
//!                       ├─step failed / timeout──▶ FAILED ──rollback──▶ ROLLED_BACK
//!                       └─cancel──────────────────▶ FAILED
//! ```
//!
//! # Design Principles
//!
//! 1. **Immutability:** Definitions are immutable once validated
//! 2. **Strict ordering:** Exactly one step is in flight per instance
//! 3. **Compensation list:** Completed steps are appended in order; rollback
//!    walks that list in reverse
//! 4. **Self-Validating:** Constructors and transitions enforce invariants

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::agent::AgentId;
use crate::domain::message::CorrelationId;
use crate::domain::phase::TddPhase;

// ============================================================================
// Value Objects: Identifiers
// ============================================================================

/// Name-based identifier of a workflow definition (DNS label format)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkflowDefinitionId(String);

impl WorkflowDefinitionId {
    /// # Validation Rules
    /// - 1-63 characters
    /// - lowercase alphanumeric + hyphens
    /// - starts and ends with an alphanumeric
    pub fn new(name: impl Into<String>) -> Result<Self, WorkflowError> {
        let name = name.into();
        if name.is_empty() || name.len() > 63 {
            return Err(WorkflowError::InvalidDefinitionId(
                "Name must be 1-63 characters".to_string(),
            ));
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(WorkflowError::InvalidDefinitionId(
                "Name must be lowercase alphanumeric + hyphens".to_string(),
            ));
        }

        let edge_ok = |c: Option<char>| c.map(|c| c.is_ascii_alphanumeric()).unwrap_or(false);
        if !edge_ok(name.chars().next()) || !edge_ok(name.chars().last()) {
            return Err(WorkflowError::InvalidDefinitionId(
                "Name must start and end with alphanumeric".to_string(),
            ));
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkflowDefinitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for WorkflowDefinitionId {
    type Error = WorkflowError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<WorkflowDefinitionId> for String {
    fn from(id: WorkflowDefinitionId) -> Self {
        id.0
    }
}

/// Unique identifier for a running (or finished) workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowInstanceId(pub Uuid);

impl WorkflowInstanceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkflowInstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkflowInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Aggregate: WorkflowDefinition
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub name: String,

    /// Agent the step's task is assigned to
    pub agent: AgentId,

    /// Task payload sent in the assignment message
    #[serde(default)]
    pub task: serde_json::Value,

    /// Payload of the compensating message sent on rollback
    #[serde(default)]
    pub compensation: Option<serde_json::Value>,

    /// Overrides the coordinator's default step timeout
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,

    #[serde(default)]
    pub phase: Option<TddPhase>,
}

impl WorkflowStep {
    pub fn new(name: impl Into<String>, agent: AgentId, task: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            agent,
            task,
            compensation: None,
            timeout: None,
            phase: None,
        }
    }

    pub fn with_compensation(mut self, compensation: serde_json::Value) -> Self {
        self.compensation = Some(compensation);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn in_phase(mut self, phase: TddPhase) -> Self {
        self.phase = Some(phase);
        self
    }
}

/// Workflow definition
///
/// # Invariants
/// - At least one step
/// - Step names are unique
/// - Phase-tagged steps follow the red → green → refactor cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: WorkflowDefinitionId,
    pub description: Option<String>,
    pub steps: Vec<WorkflowStep>,
    /// Walk completed steps in reverse with compensating messages on failure
    pub rollback_on_failure: bool,
    pub created_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    pub fn new(
        id: WorkflowDefinitionId,
        steps: Vec<WorkflowStep>,
        rollback_on_failure: bool,
    ) -> Result<Self, WorkflowError> {
        let definition = Self {
            id,
            description: None,
            steps,
            rollback_on_failure,
            created_at: Utc::now(),
        };
        definition.validate()?;
        Ok(definition)
    }

    /// Check the invariants listed on the type. Definitions built field by
    /// field or deserialized are checked here before they are registered.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.steps.is_empty() {
            return Err(WorkflowError::NoSteps);
        }

        let mut seen = std::collections::HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                return Err(WorkflowError::InvalidStep("step name cannot be empty".to_string()));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(WorkflowError::DuplicateStep(step.name.clone()));
            }
        }

        let mut last_phase: Option<TddPhase> = None;
        for step in &self.steps {
            if let Some(phase) = step.phase {
                match last_phase {
                    None if phase != TddPhase::Red => {
                        return Err(WorkflowError::IllegalPhaseTransition {
                            from: None,
                            to: phase,
                            step: step.name.clone(),
                        });
                    }
                    Some(from) if !from.can_transition_to(phase) => {
                        return Err(WorkflowError::IllegalPhaseTransition {
                            from: Some(from),
                            to: phase,
                            step: step.name.clone(),
                        });
                    }
                    _ => {}
                }
                last_phase = Some(phase);
            }
        }

        Ok(())
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The canonical red/green/refactor cycle with rollback enabled.
    pub fn tdd_cycle(
        id: WorkflowDefinitionId,
        feature: &str,
        red: AgentId,
        green: AgentId,
        refactor: AgentId,
    ) -> Result<Self, WorkflowError> {
        let steps = vec![
            WorkflowStep::new(
                "write-failing-test",
                red,
                serde_json::json!({ "feature": feature, "goal": "write a failing test" }),
            )
            .with_compensation(serde_json::json!({ "feature": feature, "undo": "remove the failing test" }))
            .in_phase(TddPhase::Red),
            WorkflowStep::new(
                "make-test-pass",
                green,
                serde_json::json!({ "feature": feature, "goal": "make the failing test pass" }),
            )
            .with_compensation(serde_json::json!({ "feature": feature, "undo": "revert the implementation" }))
            .in_phase(TddPhase::Green),
            WorkflowStep::new(
                "refactor",
                refactor,
                serde_json::json!({ "feature": feature, "goal": "refactor with tests green" }),
            )
            .in_phase(TddPhase::Refactor),
        ];

        Self::new(id, steps, true)
    }

    pub fn step(&self, index: usize) -> Option<&WorkflowStep> {
        self.steps.get(index)
    }
}

// ============================================================================
// Aggregate Root: WorkflowInstance
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    RolledBack,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Assigned {
        correlation_id: CorrelationId,
        assigned_at: DateTime<Utc>,
    },
    Completed {
        completed_at: DateTime<Utc>,
    },
    Failed {
        reason: String,
        failed_at: DateTime<Utc>,
    },
    Compensated {
        compensated_at: DateTime<Utc>,
    },
    Cancelled,
}

/// Result of completing the current step
#[derive(Debug, Clone, PartialEq)]
pub enum StepAdvance {
    /// The step at `index` has been assigned
    Next { index: usize, correlation_id: CorrelationId },
    /// That was the last step; the instance is completed
    Finished,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: WorkflowInstanceId,
    pub definition_id: WorkflowDefinitionId,
    pub current_step_index: usize,
    pub step_states: Vec<StepState>,
    pub status: WorkflowStatus,
    pub input: serde_json::Value,
    /// Indices of completed steps in completion order (the compensation list)
    pub completed_steps: Vec<usize>,
    pub failure_reason: Option<String>,
    pub cancelled: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl WorkflowInstance {
    pub fn new(definition: &WorkflowDefinition, input: serde_json::Value) -> Self {
        Self {
            id: WorkflowInstanceId::new(),
            definition_id: definition.id.clone(),
            current_step_index: 0,
            step_states: vec![StepState::Pending; definition.steps.len()],
            status: WorkflowStatus::Pending,
            input,
            completed_steps: Vec::new(),
            failure_reason: None,
            cancelled: false,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    /// Correlation id of the assignment for `step_index`
    pub fn correlation_for(&self, step_index: usize) -> CorrelationId {
        CorrelationId::new(format!("wf:{}:{}", self.id, step_index))
    }

    /// Correlation id of the step currently awaiting completion
    pub fn current_correlation(&self) -> Option<&CorrelationId> {
        match self.step_states.get(self.current_step_index) {
            Some(StepState::Assigned { correlation_id, .. }) => Some(correlation_id),
            _ => None,
        }
    }

    /// PENDING → RUNNING, assigning the first step.
    pub fn start(&mut self) -> Result<CorrelationId, WorkflowError> {
        if self.status != WorkflowStatus::Pending {
            return Err(WorkflowError::InvalidTransition {
                from: self.status,
                action: "start",
            });
        }
        if self.step_states.is_empty() {
            return Err(WorkflowError::NoSteps);
        }
        self.status = WorkflowStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(self.assign(0))
    }

    fn assign(&mut self, index: usize) -> CorrelationId {
        let correlation_id = self.correlation_for(index);
        self.current_step_index = index;
        self.step_states[index] = StepState::Assigned {
            correlation_id: correlation_id.clone(),
            assigned_at: Utc::now(),
        };
        correlation_id
    }

    fn check_current(&self, correlation_id: &CorrelationId) -> Result<(), WorkflowError> {
        if self.status != WorkflowStatus::Running {
            return Err(WorkflowError::InvalidTransition {
                from: self.status,
                action: "advance",
            });
        }
        match self.current_correlation() {
            Some(current) if current == correlation_id => Ok(()),
            _ => Err(WorkflowError::StaleCorrelation(correlation_id.clone())),
        }
    }

    /// Mark the current step completed and assign the next one, if any.
    pub fn complete_step(&mut self, correlation_id: &CorrelationId) -> Result<StepAdvance, WorkflowError> {
        self.check_current(correlation_id)?;

        let index = self.current_step_index;
        self.step_states[index] = StepState::Completed {
            completed_at: Utc::now(),
        };
        self.completed_steps.push(index);

        let next = index + 1;
        if next < self.step_states.len() {
            let correlation_id = self.assign(next);
            Ok(StepAdvance::Next {
                index: next,
                correlation_id,
            })
        } else {
            self.status = WorkflowStatus::Completed;
            self.ended_at = Some(Utc::now());
            Ok(StepAdvance::Finished)
        }
    }

    /// RUNNING → FAILED. Returns the steps to compensate, most recent first
    /// (empty when `rollback` is false).
    pub fn fail_step(
        &mut self,
        correlation_id: &CorrelationId,
        reason: impl Into<String>,
        rollback: bool,
    ) -> Result<Vec<usize>, WorkflowError> {
        self.check_current(correlation_id)?;

        let reason = reason.into();
        let index = self.current_step_index;
        self.step_states[index] = StepState::Failed {
            reason: reason.clone(),
            failed_at: Utc::now(),
        };
        self.status = WorkflowStatus::Failed;
        self.failure_reason = Some(reason);
        self.ended_at = Some(Utc::now());

        if rollback {
            Ok(self.completed_steps.iter().rev().copied().collect())
        } else {
            Ok(Vec::new())
        }
    }

    pub fn mark_compensated(&mut self, step_index: usize) {
        if let Some(state) = self.step_states.get_mut(step_index) {
            *state = StepState::Compensated {
                compensated_at: Utc::now(),
            };
        }
    }

    /// FAILED → ROLLED_BACK
    pub fn finish_rollback(&mut self) -> Result<(), WorkflowError> {
        if self.status != WorkflowStatus::Failed || self.cancelled {
            return Err(WorkflowError::InvalidTransition {
                from: self.status,
                action: "rollback",
            });
        }
        self.status = WorkflowStatus::RolledBack;
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    /// Any non-terminal state → FAILED. Not retryable, never compensated.
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), WorkflowError> {
        if self.status.is_terminal() {
            return Err(WorkflowError::InvalidTransition {
                from: self.status,
                action: "cancel",
            });
        }
        if self.status == WorkflowStatus::Running {
            self.step_states[self.current_step_index] = StepState::Cancelled;
        }
        self.status = WorkflowStatus::Failed;
        self.cancelled = true;
        self.failure_reason = Some(reason.into());
        self.ended_at = Some(Utc::now());
        Ok(())
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkflowError {
    #[error("invalid workflow definition id: {0}")]
    InvalidDefinitionId(String),

    #[error("workflow must have at least one step")]
    NoSteps,

    #[error("invalid step: {0}")]
    InvalidStep(String),

    #[error("duplicate step name: {0}")]
    DuplicateStep(String),

    #[error("illegal phase transition {from:?} -> {to} at step {step}")]
    IllegalPhaseTransition {
        from: Option<TddPhase>,
        to: TddPhase,
        step: String,
    },

    #[error("cannot {action} a workflow in state {from:?}")]
    InvalidTransition {
        from: WorkflowStatus,
        action: &'static str,
    },

    #[error("correlation id {0} does not match the current step")]
    StaleCorrelation(CorrelationId),

    #[error("workflow definition not found: {0}")]
    DefinitionNotFound(String),

    #[error("workflow instance not found: {0}")]
    InstanceNotFound(WorkflowInstanceId),
}
