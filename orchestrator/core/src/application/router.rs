// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Message Router
//!
//! Resolves a message's logical destination against the agent registry.
//!
//! The registry is a versioned, immutable [`RegistrySnapshot`] behind an
//! `Arc`. Routing clones the `Arc` under a short read lock and resolves
//! against that snapshot, so a concurrent registration never changes the
//! result of a routing call mid-way. Registration changes build a new
//! snapshot and swap it in; a separate writer lock serializes writers.
//!
//! | Destination | Mode | Targets |
//! |-------------|------|---------|
//! | agent id | `Direct` | exactly that agent, or `UnknownAgent` |
//! | `broadcast` | `Fanout` | every registered agent except the sender |
//! | `topic` | `Pattern` | every agent whose interests match the message type |

use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::domain::agent::{AgentId, AgentRegistration};
use crate::domain::delivery::{ResolvedTarget, RoutingMode};
use crate::domain::events::{AlertKind, CoordinationEvent};
use crate::domain::message::{AgentMessage, Destination};
use crate::domain::topic::topics;
use crate::infrastructure::event_store::EventStore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("unknown agent: {0}")]
    UnknownAgent(AgentId),
}

/// Immutable view of the registry at one version
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    pub version: u64,
    pub agents: BTreeMap<AgentId, AgentRegistration>,
}

impl RegistrySnapshot {
    pub fn get(&self, id: &AgentId) -> Option<&AgentRegistration> {
        self.agents.get(id)
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Resolve `message` against this snapshot.
    pub fn resolve(&self, message: &AgentMessage) -> Result<Vec<ResolvedTarget>, RoutingError> {
        let target = |agent_id: &AgentId, mode| ResolvedTarget {
            agent_id: agent_id.clone(),
            mode,
            registry_version: self.version,
        };

        match &message.destination {
            Destination::Agent(id) => self
                .agents
                .get(id)
                .map(|registration| vec![target(&registration.id, RoutingMode::Direct)])
                .ok_or_else(|| RoutingError::UnknownAgent(id.clone())),
            Destination::Broadcast => Ok(self
                .agents
                .keys()
                .filter(|id| **id != message.source)
                .map(|id| target(id, RoutingMode::Fanout))
                .collect()),
            Destination::Topic => {
                let type_name = message.message_type.as_str();
                Ok(self
                    .agents
                    .values()
                    .filter(|registration| registration.is_interested_in(type_name))
                    .map(|registration| target(&registration.id, RoutingMode::Pattern))
                    .collect())
            }
        }
    }
}

pub struct MessageRouter {
    registry: RwLock<Arc<RegistrySnapshot>>,
    writer: Mutex<()>,
    events: EventStore,
    empty_alert_raised: AtomicBool,
}

impl MessageRouter {
    pub fn new(events: EventStore) -> Self {
        Self {
            registry: RwLock::new(Arc::new(RegistrySnapshot::default())),
            writer: Mutex::new(()),
            events,
            empty_alert_raised: AtomicBool::new(false),
        }
    }

    /// Current registry snapshot
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.registry.read().clone()
    }

    /// Register (or re-register) an agent; returns the new registry version.
    pub fn register_agent(&self, registration: AgentRegistration) -> u64 {
        let _writer = self.writer.lock();
        let current = self.snapshot();

        let mut next = RegistrySnapshot {
            version: current.version + 1,
            agents: current.agents.clone(),
        };
        let agent_id = registration.id.clone();
        let capabilities = registration.capabilities.clone();
        next.agents.insert(agent_id.clone(), registration);
        let version = next.version;
        *self.registry.write() = Arc::new(next);
        self.empty_alert_raised.store(false, Ordering::SeqCst);

        info!(agent_id = %agent_id, registry_version = version, "Agent registered");
        self.events.append(
            topics::AGENTS,
            CoordinationEvent::AgentRegistered {
                agent_id,
                capabilities,
                registry_version: version,
            },
        );
        version
    }

    pub fn deregister_agent(&self, agent_id: &AgentId) -> Result<u64, RoutingError> {
        let _writer = self.writer.lock();
        let current = self.snapshot();
        if !current.agents.contains_key(agent_id) {
            return Err(RoutingError::UnknownAgent(agent_id.clone()));
        }

        let mut next = RegistrySnapshot {
            version: current.version + 1,
            agents: current.agents.clone(),
        };
        next.agents.remove(agent_id);
        let version = next.version;
        *self.registry.write() = Arc::new(next);

        info!(agent_id = %agent_id, registry_version = version, "Agent deregistered");
        self.events.append(
            topics::AGENTS,
            CoordinationEvent::AgentDeregistered {
                agent_id: agent_id.clone(),
                registry_version: version,
            },
        );
        Ok(version)
    }

    /// Resolve `message` to its delivery targets. No side effects beyond the
    /// registry read, except the one-shot alert for an empty registry.
    pub fn route(&self, message: &AgentMessage) -> Result<Vec<ResolvedTarget>, RoutingError> {
        let snapshot = self.snapshot();

        if snapshot.is_empty() && !self.empty_alert_raised.swap(true, Ordering::SeqCst) {
            error!(message_id = %message.id, "Routing table is empty, no agent can receive messages");
            self.events.append(
                topics::ALERTS,
                CoordinationEvent::AlertRaised {
                    kind: AlertKind::RoutingTableEmpty,
                    detail: format!("message {} routed while no agent is registered", message.id),
                },
            );
        }

        let targets = snapshot.resolve(message)?;
        debug!(
            message_id = %message.id,
            destination = %message.destination,
            targets = targets.len(),
            registry_version = snapshot.version,
            "Routed message"
        );
        metrics::counter!("quorum_messages_routed_total", "destination" => destination_label(&message.destination))
            .increment(1);
        Ok(targets)
    }
}

fn destination_label(destination: &Destination) -> &'static str {
    match destination {
        Destination::Agent(_) => "direct",
        Destination::Broadcast => "broadcast",
        Destination::Topic => "topic",
    }
}
