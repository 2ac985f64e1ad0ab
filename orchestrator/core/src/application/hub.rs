// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Coordination Hub
//!
//! Composition root of the coordination core: builds every component from a
//! [`CoordinatorConfigManifest`], wires their event subscriptions and owns
//! the background tasks.
//!
//! Ingress order for a submitted message:
//!
//! 1. A response whose correlation id has a local waiter resolves it.
//! 2. A message addressed to the workflow coordinator is handed to it.
//! 3. Everything else is routed and delivered.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::correlation::{CorrelationError, CorrelationTracker};
use crate::application::delivery::{DeliveryManager, DeliverySettings};
use crate::application::dispatch::{DispatchError, Dispatched, Dispatcher};
use crate::application::router::MessageRouter;
use crate::application::status_sync::StatusSynchronizer;
use crate::application::workflow_coordinator::{CoordinatorError, WorkflowCoordinator};
use crate::domain::agent::{AgentId, AgentRegistration};
use crate::domain::config::{ConfigError, CoordinatorConfigManifest};
use crate::domain::delivery::MessageTransport;
use crate::domain::message::{AgentMessage, Destination, MessageError, MessageId};
use crate::domain::topic::{topics, TopicPattern};
use crate::infrastructure::event_journal::JournalWriter;
use crate::infrastructure::event_store::{
    spawn_subscription, EventStore, EventStoreError, EventStorePruner, EventSubscription,
    RetentionPolicy,
};
use crate::infrastructure::repositories::{
    InMemoryWorkflowDefinitionRepository, InMemoryWorkflowInstanceRepository,
};

#[derive(Debug, Error)]
pub enum HubError {
    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error("request {0} carries no correlation id")]
    MissingCorrelationId(MessageId),

    #[error("request {0} resolved to no targets")]
    NoTargets(MessageId),
}

/// What happened to a submitted message
pub enum Submitted {
    /// Consumed by a local correlation waiter
    Resolved,
    /// Handed to the workflow coordinator; `settled` when it advanced a step
    Coordinator { settled: bool },
    Dispatched(Dispatched),
}

pub struct CoordinationHub {
    config: CoordinatorConfigManifest,
    coordinator_id: AgentId,
    events: EventStore,
    router: Arc<MessageRouter>,
    delivery: DeliveryManager,
    dispatcher: Dispatcher,
    correlation: CorrelationTracker,
    status: StatusSynchronizer,
    coordinator: WorkflowCoordinator,
    shutdown_token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CoordinationHub {
    /// Build every component and register the configured agents. Nothing is
    /// spawned until [`CoordinationHub::start`].
    pub fn new(
        config: CoordinatorConfigManifest,
        transport: Arc<dyn MessageTransport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let spec = &config.spec;
        let coordinator_id = config.coordinator_agent_id()?;

        let events = EventStore::new(RetentionPolicy::from(&spec.event_store), spec.node.id.clone());
        let router = Arc::new(MessageRouter::new(events.clone()));
        let delivery = DeliveryManager::new(
            transport,
            events.clone(),
            DeliverySettings::from(&spec.delivery),
        );
        let dispatcher = Dispatcher::new(router.clone(), delivery.clone());
        let status = StatusSynchronizer::from_config(events.clone(), &spec.status);
        let coordinator = WorkflowCoordinator::new(
            coordinator_id.clone(),
            dispatcher.clone(),
            events.clone(),
            Arc::new(InMemoryWorkflowDefinitionRepository::new()),
            Arc::new(InMemoryWorkflowInstanceRepository::new()),
            spec.workflows.default_step_timeout,
        );

        for agent in &spec.agents {
            router.register_agent(agent.to_registration()?);
        }

        Ok(Self {
            config,
            coordinator_id,
            events,
            router,
            delivery,
            dispatcher,
            correlation: CorrelationTracker::new(),
            status,
            coordinator,
            shutdown_token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn subscriptions and background tasks, load workflow manifests.
    pub async fn start(&self) -> anyhow::Result<()> {
        let spec = &self.config.spec;
        let token = self.shutdown_token.clone();
        let mut handles = Vec::new();

        // Both subscriptions start at offset 0 so registrations made in
        // `new` are seen.
        handles.push(spawn_subscription(
            "status-eviction",
            self.events.subscribe(TopicPattern::new(topics::AGENTS)?, 0)?,
            Arc::new(self.status.clone()),
            token.clone(),
        ));
        handles.push(spawn_subscription(
            "workflow-delivery",
            self.events.subscribe(TopicPattern::new(topics::DELIVERY)?, 0)?,
            Arc::new(self.coordinator.clone()),
            token.clone(),
        ));

        if let Some(path) = &spec.event_store.journal_path {
            let writer = JournalWriter::open(path.clone()).await?;
            handles.push(spawn_subscription(
                "journal",
                self.events.subscribe(TopicPattern::any(), 0)?,
                Arc::new(writer),
                token.clone(),
            ));
        }

        handles.push(
            EventStorePruner::new(self.events.clone(), spec.event_store.prune_interval, token.clone()).start(),
        );

        if let Some(directory) = &spec.status.directory {
            handles.push(self.status.watch_directory(
                directory.clone(),
                spec.status.poll_interval,
                spec.status.debounce,
                token.clone(),
            ));
        }

        if let Some(directory) = &spec.workflows.directory {
            let loaded = self.coordinator.load_definitions(directory).await?;
            info!(directory = %directory.display(), loaded, "Workflow definitions loaded");
        }

        self.tasks.lock().extend(handles);
        info!(
            node = %spec.node.id,
            coordinator = %self.coordinator_id,
            agents = self.router.snapshot().len(),
            "Coordination hub started"
        );
        Ok(())
    }

    /// Accept one message from a participant.
    pub async fn submit(&self, message: AgentMessage) -> Result<Submitted, HubError> {
        message.validate()?;

        if message.message_type.is_response() {
            if let Some(correlation_id) = message.correlation_id.clone() {
                if self.correlation.is_pending(&correlation_id)
                    && self.correlation.resolve(&correlation_id, message.clone())
                {
                    return Ok(Submitted::Resolved);
                }
            }
        }

        if message.destination == Destination::Agent(self.coordinator_id.clone()) {
            let settled = self.coordinator.handle_message(&message).await?;
            return Ok(Submitted::Coordinator { settled });
        }

        Ok(Submitted::Dispatched(self.dispatcher.dispatch(message)?))
    }

    /// Decode a wire message and submit it.
    pub async fn ingest_wire(&self, raw: &str) -> Result<Submitted, HubError> {
        let message = AgentMessage::from_wire(raw)?;
        debug!(message_id = %message.id, source = %message.source, "Ingested wire message");
        self.submit(message).await
    }

    /// Send `message` and wait up to `timeout` for its correlated response.
    /// Fails early with the delivery outcome when no target could be reached.
    pub async fn request(&self, message: AgentMessage, timeout: Duration) -> Result<AgentMessage, HubError> {
        let message_id = message.id;
        let correlation_id = message
            .correlation_id
            .clone()
            .ok_or(HubError::MissingCorrelationId(message_id))?;

        // Registered before dispatch so a fast response cannot slip past.
        let waiter = self.correlation.expect(correlation_id.clone())?;
        let dispatched = self.dispatcher.dispatch(message)?;
        if dispatched.targets.is_empty() {
            return Err(HubError::NoTargets(message_id));
        }

        let correlation = self.correlation.clone();
        tokio::spawn(async move {
            let outcomes = dispatched.outcomes().await;
            if outcomes.iter().any(|(_, outcome)| outcome.is_delivered()) {
                return;
            }
            if let Some((target, outcome)) = outcomes.into_iter().next() {
                warn!(correlation_id = %correlation_id, target = %target, "Request not delivered: {}", outcome);
                correlation.fail(&correlation_id, outcome);
            }
        });

        Ok(waiter.wait(timeout).await?)
    }

    pub fn register_agent(&self, registration: AgentRegistration) -> u64 {
        self.router.register_agent(registration)
    }

    pub fn deregister_agent(&self, agent_id: &AgentId) -> Result<u64, HubError> {
        let version = self
            .router
            .deregister_agent(agent_id)
            .map_err(|e| HubError::Dispatch(DispatchError::Routing(e)))?;
        self.delivery.release_target(agent_id);
        Ok(version)
    }

    /// Read-only replayable feed for external collaborators
    pub fn subscribe(&self, pattern: TopicPattern, from: u64) -> Result<EventSubscription, EventStoreError> {
        self.events.subscribe(pattern, from)
    }

    pub fn config(&self) -> &CoordinatorConfigManifest {
        &self.config
    }

    pub fn coordinator_id(&self) -> &AgentId {
        &self.coordinator_id
    }

    pub fn events(&self) -> &EventStore {
        &self.events
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    pub fn delivery(&self) -> &DeliveryManager {
        &self.delivery
    }

    pub fn correlation(&self) -> &CorrelationTracker {
        &self.correlation
    }

    pub fn status(&self) -> &StatusSynchronizer {
        &self.status
    }

    pub fn coordinator(&self) -> &WorkflowCoordinator {
        &self.coordinator
    }

    /// Stop background tasks, cancel in-flight deliveries and close the
    /// event store.
    pub async fn shutdown(&self) {
        info!("Shutting down coordination hub");
        self.shutdown_token.cancel();
        self.delivery.cancel_all();

        let handles: Vec<_> = self.tasks.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }
        self.events.close();
    }
}
