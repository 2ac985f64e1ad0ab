// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Workflow Coordinator
//!
//! Sequences multi-step, multi-agent workflows.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Drive [`WorkflowInstance`] state machines with messages
//! - **Collaborators:** [`Dispatcher`] for assignments and compensations,
//!   [`EventStore`] for workflow facts, the workflow repositories for audit
//!
//! # State Machine
//!
//! ```text
//! PENDING ──start──▶ RUNNING ──step completed──▶ RUNNING (next step)
//!                       │                           │
//!                       │                      last step ──▶ COMPLETED
//!                       │
//!                       ├── step failed / timed out ──▶ FAILED ──rollback──▶ ROLLED_BACK
//!                       └── cancelled ──▶ FAILED
//! ```
//!
//! Each assignment carries the correlation id `wf:<instance>:<step>`. The
//! assignment index maps those ids to instances; whichever signal removes an
//! entry first (completion, failure, timeout, delivery failure) owns that
//! step's outcome. Each instance's state sits behind its own async mutex, so
//! steps of one instance are strictly ordered while independent instances
//! advance concurrently.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::dispatch::Dispatcher;
use crate::domain::agent::AgentId;
use crate::domain::events::{CoordinationEvent, EventRecord};
use crate::domain::message::{AgentMessage, CorrelationId, MessageId, MessageType};
use crate::domain::phase::TddPhase;
use crate::domain::repository::{
    RepositoryError, WorkflowDefinitionRepository, WorkflowInstanceRepository,
};
use crate::domain::topic::topics;
use crate::domain::workflow::{
    StepAdvance, WorkflowDefinition, WorkflowDefinitionId, WorkflowError, WorkflowInstance,
    WorkflowInstanceId,
};
use crate::infrastructure::event_store::{EventHandler, EventStore};
use crate::infrastructure::workflow_parser::WorkflowParser;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Clone)]
struct LiveInstance {
    definition: Arc<WorkflowDefinition>,
    state: Arc<Mutex<WorkflowInstance>>,
}

/// An outstanding step assignment
struct Assignment {
    instance_id: WorkflowInstanceId,
    message_id: MessageId,
    timer: CancellationToken,
}

struct Inner {
    coordinator_id: AgentId,
    dispatcher: Dispatcher,
    events: EventStore,
    definitions: Arc<dyn WorkflowDefinitionRepository>,
    instances: Arc<dyn WorkflowInstanceRepository>,
    default_step_timeout: Duration,
    live: DashMap<WorkflowInstanceId, LiveInstance>,
    assignments: DashMap<CorrelationId, Assignment>,
}

#[derive(Clone)]
pub struct WorkflowCoordinator {
    inner: Arc<Inner>,
}

impl WorkflowCoordinator {
    pub fn new(
        coordinator_id: AgentId,
        dispatcher: Dispatcher,
        events: EventStore,
        definitions: Arc<dyn WorkflowDefinitionRepository>,
        instances: Arc<dyn WorkflowInstanceRepository>,
        default_step_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                coordinator_id,
                dispatcher,
                events,
                definitions,
                instances,
                default_step_timeout,
                live: DashMap::new(),
                assignments: DashMap::new(),
            }),
        }
    }

    /// Agent id the coordinator sends assignments as
    pub fn coordinator_id(&self) -> &AgentId {
        &self.inner.coordinator_id
    }

    pub async fn register_definition(&self, definition: WorkflowDefinition) -> Result<(), CoordinatorError> {
        definition.validate()?;
        info!(workflow = %definition.id, steps = definition.steps.len(), "Registering workflow definition");
        self.inner.definitions.save(&definition).await?;
        Ok(())
    }

    /// Register every valid manifest in `dir`; returns how many were loaded.
    pub async fn load_definitions(&self, dir: &Path) -> anyhow::Result<usize> {
        let definitions = WorkflowParser::load_dir(dir)?;
        let count = definitions.len();
        for definition in definitions {
            self.register_definition(definition).await?;
        }
        Ok(count)
    }

    pub async fn definitions(&self) -> Result<Vec<WorkflowDefinition>, CoordinatorError> {
        Ok(self.inner.definitions.list_all().await?)
    }

    /// Create an instance of `definition_id` and assign its first step.
    pub async fn start(
        &self,
        definition_id: &WorkflowDefinitionId,
        input: serde_json::Value,
    ) -> Result<WorkflowInstanceId, CoordinatorError> {
        let definition = self
            .inner
            .definitions
            .find_by_id(definition_id)
            .await?
            .ok_or_else(|| WorkflowError::DefinitionNotFound(definition_id.to_string()))?;
        let definition = Arc::new(definition);

        let mut instance = WorkflowInstance::new(&definition, input);
        let instance_id = instance.id;
        let correlation_id = instance.start()?;

        let live = LiveInstance {
            definition: definition.clone(),
            state: Arc::new(Mutex::new(instance.clone())),
        };
        let mut state = live.state.lock().await;
        self.inner.live.insert(instance_id, live.clone());

        info!(
            instance_id = %instance_id,
            workflow = %definition.id,
            steps = definition.steps.len(),
            "Workflow started"
        );
        self.emit(
            topics::WORKFLOW,
            CoordinationEvent::WorkflowStarted {
                instance_id,
                definition_id: definition.id.clone(),
                step_count: definition.steps.len(),
            },
        );

        self.assign(&mut state, &definition, 0, correlation_id);
        self.persist(&state).await?;
        Ok(instance_id)
    }

    /// Feed a message addressed to the coordinator. Returns true when it
    /// settled a step.
    pub async fn handle_message(&self, message: &AgentMessage) -> Result<bool, CoordinatorError> {
        if message.message_type != MessageType::TaskCompletion {
            debug!(message_id = %message.id, message_type = %message.message_type, "Coordinator ignoring message");
            return Ok(false);
        }
        let Some(correlation_id) = &message.correlation_id else {
            debug!(message_id = %message.id, "Task completion without correlation id");
            return Ok(false);
        };

        let success = message
            .payload
            .get("success")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        if success {
            self.complete_step(correlation_id).await
        } else {
            let reason = message
                .payload
                .get("error")
                .or_else(|| message.payload.get("reason"))
                .and_then(|v| v.as_str())
                .unwrap_or("step reported failure")
                .to_string();
            self.fail_step(correlation_id, reason).await
        }
    }

    pub async fn complete_step(&self, correlation_id: &CorrelationId) -> Result<bool, CoordinatorError> {
        let Some(live) = self.take_assignment(correlation_id) else {
            debug!(correlation_id = %correlation_id, "No outstanding assignment for completion");
            return Ok(false);
        };

        let mut state = live.state.lock().await;
        let step_index = state.current_step_index;
        let advance = match state.complete_step(correlation_id) {
            Ok(advance) => advance,
            Err(e) => {
                debug!(correlation_id = %correlation_id, "Ignoring completion: {}", e);
                return Ok(false);
            }
        };

        let step_name = step_name(&live.definition, step_index);
        info!(instance_id = %state.id, step = %step_name, "Workflow step completed");
        self.emit(
            topics::WORKFLOW,
            CoordinationEvent::StepCompleted {
                instance_id: state.id,
                step_index,
                step_name,
            },
        );

        match advance {
            StepAdvance::Next { index, correlation_id } => {
                self.assign(&mut state, &live.definition, index, correlation_id);
            }
            StepAdvance::Finished => {
                info!(instance_id = %state.id, "Workflow completed");
                metrics::counter!("quorum_workflows_total", "outcome" => "completed").increment(1);
                self.emit(topics::WORKFLOW, CoordinationEvent::WorkflowCompleted { instance_id: state.id });
            }
        }

        self.persist(&state).await?;
        Ok(true)
    }

    /// Fail the step behind `correlation_id`: explicit failure, timeout or
    /// undeliverable assignment.
    pub async fn fail_step(
        &self,
        correlation_id: &CorrelationId,
        reason: impl Into<String>,
    ) -> Result<bool, CoordinatorError> {
        let Some(live) = self.take_assignment(correlation_id) else {
            return Ok(false);
        };

        let mut state = live.state.lock().await;
        let settled = self.fail_locked(&mut state, &live.definition, correlation_id, reason.into());
        self.persist(&state).await?;
        Ok(settled)
    }

    /// Cancel a non-terminal instance. Ends in FAILED, never compensated.
    pub async fn cancel(
        &self,
        instance_id: WorkflowInstanceId,
        reason: impl Into<String>,
    ) -> Result<(), CoordinatorError> {
        let live = self
            .inner
            .live
            .get(&instance_id)
            .map(|entry| entry.value().clone())
            .ok_or(WorkflowError::InstanceNotFound(instance_id))?;

        let mut state = live.state.lock().await;
        let current = state.current_correlation().cloned();
        let reason = reason.into();
        state.cancel(reason.clone())?;

        if let Some(correlation_id) = current {
            if let Some((_, assignment)) = self.inner.assignments.remove(&correlation_id) {
                assignment.timer.cancel();
                self.inner.dispatcher.delivery().cancel(assignment.message_id);
            }
        }

        warn!(instance_id = %instance_id, "Workflow cancelled: {}", reason);
        metrics::counter!("quorum_workflows_total", "outcome" => "cancelled").increment(1);
        self.emit(
            topics::WORKFLOW,
            CoordinationEvent::WorkflowFailed {
                instance_id,
                reason,
                cancelled: true,
            },
        );
        self.persist(&state).await?;
        Ok(())
    }

    pub async fn get(&self, instance_id: WorkflowInstanceId) -> Result<Option<WorkflowInstance>, CoordinatorError> {
        let live = self.inner.live.get(&instance_id).map(|entry| entry.value().clone());
        match live {
            Some(live) => Ok(Some(live.state.lock().await.clone())),
            None => Ok(self.inner.instances.find_by_id(instance_id).await?),
        }
    }

    pub async fn list(&self) -> Result<Vec<WorkflowInstance>, CoordinatorError> {
        Ok(self.inner.instances.list_all().await?)
    }

    /// Drop terminal instances that ended before `older_than`.
    pub async fn purge_finished(&self, older_than: DateTime<Utc>) -> Result<usize, CoordinatorError> {
        Ok(self.inner.instances.purge_finished(older_than).await?)
    }

    // ------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------

    fn take_assignment(&self, correlation_id: &CorrelationId) -> Option<LiveInstance> {
        let (_, assignment) = self.inner.assignments.remove(correlation_id)?;
        assignment.timer.cancel();
        self.inner
            .live
            .get(&assignment.instance_id)
            .map(|entry| entry.value().clone())
    }

    /// Send the assignment for `index` (already marked assigned on `state`)
    /// and arm its timeout. A dispatch failure fails the step on the spot.
    fn assign(
        &self,
        state: &mut WorkflowInstance,
        definition: &WorkflowDefinition,
        index: usize,
        correlation_id: CorrelationId,
    ) {
        let Some(step) = definition.step(index) else {
            return;
        };

        if let Some(to) = step.phase {
            if let Some(from) = previous_phase(definition, index) {
                if from != to {
                    self.emit_phase(state.id, from, to);
                }
            }
        }

        let message = AgentMessage::new(
            self.inner.coordinator_id.clone(),
            step.agent.clone(),
            MessageType::TaskAssignment,
            json!({
                "workflow": definition.id,
                "instance": state.id,
                "step": step.name,
                "step_index": index,
                "phase": step.phase,
                "task": step.task,
                "input": state.input,
            }),
        )
        .with_correlation_id(correlation_id.clone())
        .requiring_ack();

        let timer = CancellationToken::new();
        self.inner.assignments.insert(
            correlation_id.clone(),
            Assignment {
                instance_id: state.id,
                message_id: message.id,
                timer: timer.clone(),
            },
        );

        if let Err(e) = self.inner.dispatcher.dispatch(message) {
            self.inner.assignments.remove(&correlation_id);
            let reason = format!("assignment of step '{}' could not be dispatched: {}", step.name, e);
            self.fail_locked(state, definition, &correlation_id, reason);
            return;
        }

        info!(
            instance_id = %state.id,
            step = %step.name,
            agent_id = %step.agent,
            correlation_id = %correlation_id,
            "Workflow step assigned"
        );
        self.emit(
            topics::WORKFLOW,
            CoordinationEvent::StepAssigned {
                instance_id: state.id,
                step_index: index,
                step_name: step.name.clone(),
                agent_id: step.agent.clone(),
                correlation_id: correlation_id.clone(),
            },
        );

        let timeout = step.timeout.unwrap_or(self.inner.default_step_timeout);
        self.arm_timer(correlation_id, timeout, timer);
    }

    fn arm_timer(&self, correlation_id: CorrelationId, timeout: Duration, timer: CancellationToken) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    let reason = format!("no completion within {:?}", timeout);
                    if let Err(e) = coordinator.fail_step(&correlation_id, reason).await {
                        warn!(correlation_id = %correlation_id, "Failed to record step timeout: {}", e);
                    }
                }
            }
        });
    }

    /// RUNNING → FAILED, then compensation when the definition asks for it.
    fn fail_locked(
        &self,
        state: &mut WorkflowInstance,
        definition: &WorkflowDefinition,
        correlation_id: &CorrelationId,
        reason: String,
    ) -> bool {
        let step_index = state.current_step_index;
        let to_compensate = match state.fail_step(correlation_id, reason.clone(), definition.rollback_on_failure) {
            Ok(steps) => steps,
            Err(e) => {
                debug!(correlation_id = %correlation_id, "Ignoring step failure: {}", e);
                return false;
            }
        };

        warn!(
            instance_id = %state.id,
            step = %step_name(definition, step_index),
            "Workflow step failed: {}",
            reason
        );
        self.emit(
            topics::WORKFLOW,
            CoordinationEvent::StepFailed {
                instance_id: state.id,
                step_index,
                step_name: step_name(definition, step_index),
                reason: reason.clone(),
            },
        );

        if !definition.rollback_on_failure {
            metrics::counter!("quorum_workflows_total", "outcome" => "failed").increment(1);
            self.emit(
                topics::WORKFLOW,
                CoordinationEvent::WorkflowFailed {
                    instance_id: state.id,
                    reason,
                    cancelled: false,
                },
            );
            return true;
        }

        let mut compensated = 0;
        for index in to_compensate {
            if self.compensate(state, definition, index) {
                state.mark_compensated(index);
                compensated += 1;
            }
        }

        if let Err(e) = state.finish_rollback() {
            warn!(instance_id = %state.id, "Rollback could not complete: {}", e);
            return true;
        }
        info!(instance_id = %state.id, compensated, "Workflow rolled back");
        metrics::counter!("quorum_workflows_total", "outcome" => "rolled_back").increment(1);
        self.emit(
            topics::WORKFLOW,
            CoordinationEvent::WorkflowRolledBack {
                instance_id: state.id,
                compensated_steps: compensated,
            },
        );
        true
    }

    fn compensate(&self, state: &WorkflowInstance, definition: &WorkflowDefinition, index: usize) -> bool {
        let Some(step) = definition.step(index) else {
            return false;
        };

        let message = AgentMessage::new(
            self.inner.coordinator_id.clone(),
            step.agent.clone(),
            MessageType::TaskAssignment,
            json!({
                "action": "compensate",
                "workflow": definition.id,
                "instance": state.id,
                "step": step.name,
                "step_index": index,
                "compensation": step.compensation,
            }),
        );

        match self.inner.dispatcher.dispatch(message) {
            Ok(_) => {
                info!(instance_id = %state.id, step = %step.name, agent_id = %step.agent, "Compensation issued");
                self.emit(
                    topics::WORKFLOW,
                    CoordinationEvent::CompensationIssued {
                        instance_id: state.id,
                        step_index: index,
                        step_name: step.name.clone(),
                        agent_id: step.agent.clone(),
                    },
                );
                true
            }
            Err(e) => {
                warn!(instance_id = %state.id, step = %step.name, "Compensation could not be dispatched: {}", e);
                false
            }
        }
    }

    async fn persist(&self, state: &WorkflowInstance) -> Result<(), CoordinatorError> {
        self.inner.instances.save(state).await?;
        if state.status.is_terminal() {
            self.inner.live.remove(&state.id);
        }
        Ok(())
    }

    fn emit_phase(&self, instance_id: WorkflowInstanceId, from: TddPhase, to: TddPhase) {
        info!(instance_id = %instance_id, from = %from, to = %to, "Phase transition");
        self.emit(topics::PHASE, CoordinationEvent::PhaseTransitioned { instance_id, from, to });
    }

    fn emit(&self, topic: &str, event: CoordinationEvent) {
        self.inner.events.append(topic, event);
    }
}

fn step_name(definition: &WorkflowDefinition, index: usize) -> String {
    definition
        .step(index)
        .map(|step| step.name.clone())
        .unwrap_or_else(|| index.to_string())
}

/// Phase of the last tagged step before `index`
fn previous_phase(definition: &WorkflowDefinition, index: usize) -> Option<TddPhase> {
    definition.steps[..index].iter().rev().find_map(|step| step.phase)
}

/// Subscribed to the `delivery` topic: an assignment that was dead-lettered
/// or expired fails its step.
#[async_trait]
impl EventHandler for WorkflowCoordinator {
    async fn handle(&self, record: &EventRecord) -> anyhow::Result<()> {
        let (correlation_id, reason) = match &record.payload {
            CoordinationEvent::DeliveryFailed { message, last_error, .. }
                if message.message_type == MessageType::TaskAssignment =>
            {
                match &message.correlation_id {
                    Some(cid) => (cid, format!("assignment undeliverable: {}", last_error)),
                    None => return Ok(()),
                }
            }
            CoordinationEvent::Expired {
                message_type: MessageType::TaskAssignment,
                correlation_id: Some(cid),
                ..
            } => (cid, "assignment expired before delivery".to_string()),
            _ => return Ok(()),
        };

        if self.inner.assignments.contains_key(correlation_id) {
            self.fail_step(correlation_id, reason).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::delivery::{DeliveryManager, DeliverySettings};
    use crate::application::router::MessageRouter;
    use crate::domain::agent::AgentRegistration;
    use crate::domain::workflow::{WorkflowStatus, WorkflowStep};
    use crate::infrastructure::repositories::{
        InMemoryWorkflowDefinitionRepository, InMemoryWorkflowInstanceRepository,
    };
    use crate::infrastructure::transport::InMemoryTransport;

    fn agent(name: &str) -> AgentId {
        AgentId::new(name).unwrap()
    }

    fn setup(agents: &[&str]) -> (WorkflowCoordinator, Arc<InMemoryTransport>) {
        let events = EventStore::with_defaults();
        let router = Arc::new(MessageRouter::new(events.clone()));
        for name in agents {
            router.register_agent(AgentRegistration::new(agent(name), vec![]));
        }
        let transport = Arc::new(InMemoryTransport::default());
        let delivery = DeliveryManager::new(transport.clone(), events.clone(), DeliverySettings::default());
        let coordinator = WorkflowCoordinator::new(
            agent("workflow-coordinator"),
            Dispatcher::new(router, delivery),
            events,
            Arc::new(InMemoryWorkflowDefinitionRepository::new()),
            Arc::new(InMemoryWorkflowInstanceRepository::new()),
            Duration::from_secs(60),
        );
        (coordinator, transport)
    }

    fn completion(assignment: &AgentMessage, success: bool) -> AgentMessage {
        AgentMessage::reply_to(
            assignment,
            assignment.destination.agent().cloned().unwrap(),
            MessageType::TaskCompletion,
            json!({ "success": success }),
        )
    }

    #[tokio::test]
    async fn test_tdd_cycle_runs_to_completion() {
        let (coordinator, transport) = setup(&["red-agent", "green-agent", "refactor-agent"]);
        let mut mailboxes = vec![
            transport.open_mailbox(agent("red-agent")),
            transport.open_mailbox(agent("green-agent")),
            transport.open_mailbox(agent("refactor-agent")),
        ];

        let definition = WorkflowDefinition::tdd_cycle(
            WorkflowDefinitionId::new("tokenizer").unwrap(),
            "tokenizer",
            agent("red-agent"),
            agent("green-agent"),
            agent("refactor-agent"),
        )
        .unwrap();
        coordinator.register_definition(definition).await.unwrap();

        let id = coordinator
            .start(&WorkflowDefinitionId::new("tokenizer").unwrap(), json!({}))
            .await
            .unwrap();

        for mailbox in mailboxes.iter_mut() {
            let assignment = mailbox.recv().await.unwrap();
            assert_eq!(assignment.message_type, MessageType::TaskAssignment);
            assert!(coordinator.handle_message(&completion(&assignment, true)).await.unwrap());
        }

        let instance = coordinator.get(id).await.unwrap().unwrap();
        assert_eq!(instance.status, WorkflowStatus::Completed);
        assert_eq!(instance.completed_steps, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_step_timeout_fails_without_rollback() {
        let (coordinator, transport) = setup(&["worker"]);
        let _mailbox = transport.open_mailbox(agent("worker"));

        let definition = WorkflowDefinition::new(
            WorkflowDefinitionId::new("slow").unwrap(),
            vec![WorkflowStep::new("only", agent("worker"), json!({}))
                .with_timeout(Duration::from_millis(30))],
            false,
        )
        .unwrap();
        let definition_id = definition.id.clone();
        coordinator.register_definition(definition).await.unwrap();
        let id = coordinator.start(&definition_id, json!({})).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        let instance = coordinator.get(id).await.unwrap().unwrap();
        assert_eq!(instance.status, WorkflowStatus::Failed);
        assert!(!instance.cancelled);
    }

    #[tokio::test]
    async fn test_unknown_step_agent_fails_immediately() {
        let (coordinator, _transport) = setup(&[]);
        let definition = WorkflowDefinition::new(
            WorkflowDefinitionId::new("orphan").unwrap(),
            vec![WorkflowStep::new("only", agent("nobody"), json!({}))],
            true,
        )
        .unwrap();
        let definition_id = definition.id.clone();
        coordinator.register_definition(definition).await.unwrap();

        let id = coordinator.start(&definition_id, json!({})).await.unwrap();
        let instance = coordinator.get(id).await.unwrap().unwrap();
        // nothing completed, so rollback has nothing to compensate
        assert_eq!(instance.status, WorkflowStatus::RolledBack);
    }

    #[tokio::test]
    async fn test_cancel_moves_to_failed_and_ignores_late_completion() {
        let (coordinator, transport) = setup(&["worker"]);
        let mut mailbox = transport.open_mailbox(agent("worker"));

        let definition = WorkflowDefinition::new(
            WorkflowDefinitionId::new("cancellable").unwrap(),
            vec![WorkflowStep::new("only", agent("worker"), json!({}))],
            true,
        )
        .unwrap();
        let definition_id = definition.id.clone();
        coordinator.register_definition(definition).await.unwrap();
        let id = coordinator.start(&definition_id, json!({})).await.unwrap();
        let assignment = mailbox.recv().await.unwrap();

        coordinator.cancel(id, "operator request").await.unwrap();
        assert!(!coordinator.handle_message(&completion(&assignment, true)).await.unwrap());

        let instance = coordinator.get(id).await.unwrap().unwrap();
        assert_eq!(instance.status, WorkflowStatus::Failed);
        assert!(instance.cancelled);
        assert!(coordinator.cancel(id, "again").await.is_err());
    }

    #[tokio::test]
    async fn test_start_unknown_definition() {
        let (coordinator, _transport) = setup(&[]);
        let err = coordinator
            .start(&WorkflowDefinitionId::new("missing").unwrap(), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Workflow(WorkflowError::DefinitionNotFound(_))));
    }

    #[tokio::test]
    async fn test_definition_without_steps_never_registered() {
        let (coordinator, _transport) = setup(&[]);
        let mut definition = WorkflowDefinition::new(
            WorkflowDefinitionId::new("hollow").unwrap(),
            vec![WorkflowStep::new("only", agent("worker"), json!({}))],
            false,
        )
        .unwrap();
        definition.steps.clear();

        let err = coordinator.register_definition(definition).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Workflow(WorkflowError::NoSteps)));
        assert!(coordinator.definitions().await.unwrap().is_empty());

        let decoded: WorkflowDefinition = serde_json::from_value(json!({
            "id": "hollow",
            "description": null,
            "steps": [],
            "rollback_on_failure": false,
            "created_at": "2026-10-18T12:00:00Z"
        }))
        .unwrap();
        assert!(coordinator.register_definition(decoded).await.is_err());
    }
}
