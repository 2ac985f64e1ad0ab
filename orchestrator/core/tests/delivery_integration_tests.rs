// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end delivery behaviour through the dispatcher:
//! - per (source, target) ordering
//! - duplicate suppression when an acknowledgment is lost
//! - TTL expiry before the first attempt
//! - broadcast fan-out

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use quorum_core::application::delivery::{DeliveryManager, DeliverySettings};
use quorum_core::application::dispatch::Dispatcher;
use quorum_core::application::router::MessageRouter;
use quorum_core::domain::agent::{AgentId, AgentRegistration};
use quorum_core::domain::delivery::{
    Acknowledgement, DeliveryOutcome, MessageTransport, ResolvedTarget, TransportError,
};
use quorum_core::domain::events::CoordinationEvent;
use quorum_core::domain::message::{AgentMessage, Destination, MessageId, MessageType, RetryPolicy};
use quorum_core::domain::topic::{topics, Topic};
use quorum_core::infrastructure::event_store::EventStore;
use quorum_core::infrastructure::transport::InMemoryTransport;

fn agent(name: &str) -> AgentId {
    AgentId::new(name).unwrap()
}

fn dispatcher_with(
    agents: &[&str],
    transport: Arc<dyn MessageTransport>,
) -> (Dispatcher, EventStore) {
    let events = EventStore::with_defaults();
    let router = Arc::new(MessageRouter::new(events.clone()));
    for name in agents {
        router.register_agent(AgentRegistration::new(agent(name), vec![]));
    }
    let delivery = DeliveryManager::new(transport, events.clone(), DeliverySettings::default());
    (Dispatcher::new(router, delivery), events)
}

/// Delivers every message but reports the first acknowledgment of each
/// message id as lost.
struct LossyAckTransport {
    inner: InMemoryTransport,
    lost: Mutex<HashSet<MessageId>>,
    sends: Mutex<u32>,
}

impl LossyAckTransport {
    fn new(inner: InMemoryTransport) -> Self {
        Self {
            inner,
            lost: Mutex::new(HashSet::new()),
            sends: Mutex::new(0),
        }
    }
}

#[async_trait]
impl MessageTransport for LossyAckTransport {
    async fn send(
        &self,
        target: &ResolvedTarget,
        message: &AgentMessage,
    ) -> Result<Acknowledgement, TransportError> {
        *self.sends.lock() += 1;
        let ack = self.inner.send(target, message).await?;
        if self.lost.lock().insert(message.id) {
            return Err(TransportError::Io("acknowledgment lost".to_string()));
        }
        Ok(ack)
    }
}

#[tokio::test]
async fn test_messages_arrive_in_submission_order() {
    let transport = Arc::new(InMemoryTransport::default());
    let mut mailbox = transport.open_mailbox(agent("green-agent"));
    let (dispatcher, _events) = dispatcher_with(&["red-agent", "green-agent"], transport.clone());

    let mut tickets = Vec::new();
    for seq in 0..50 {
        let message = AgentMessage::new(
            agent("red-agent"),
            agent("green-agent"),
            MessageType::StatusUpdate,
            json!({ "seq": seq }),
        );
        tickets.extend(dispatcher.dispatch(message).unwrap().tickets);
    }

    for seq in 0..50 {
        let received = mailbox.recv().await.unwrap();
        assert_eq!(received.payload["seq"], seq);
    }
    for ticket in tickets {
        assert!(ticket.outcome().await.is_delivered());
    }
}

#[tokio::test]
async fn test_lost_acknowledgment_does_not_duplicate() {
    let inner = InMemoryTransport::default();
    let mut mailbox = inner.open_mailbox(agent("green-agent"));
    let transport = Arc::new(LossyAckTransport::new(inner));
    let (dispatcher, _events) = dispatcher_with(&["red-agent", "green-agent"], transport.clone());

    let message = AgentMessage::new(
        agent("red-agent"),
        agent("green-agent"),
        MessageType::ReviewRequest,
        json!({ "file": "tokenizer.rs" }),
    )
    .with_retry_policy(RetryPolicy::new(3, Duration::from_millis(10), 2.0));
    let message_id = message.id;

    let dispatched = dispatcher.dispatch(message).unwrap();
    let outcomes = dispatched.outcomes().await;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].1, DeliveryOutcome::Delivered { attempts: 2 });
    assert_eq!(*transport.sends.lock(), 2);

    let received = mailbox.recv().await.unwrap();
    assert_eq!(received.id, message_id);
    assert!(mailbox.try_recv().is_none());
}

#[tokio::test]
async fn test_zero_ttl_expires_without_attempt() {
    let transport = Arc::new(InMemoryTransport::default());
    let mut mailbox = transport.open_mailbox(agent("green-agent"));
    let (dispatcher, events) = dispatcher_with(&["red-agent", "green-agent"], transport.clone());

    let message = AgentMessage::new(
        agent("red-agent"),
        agent("green-agent"),
        MessageType::ClarificationRequest,
        json!({}),
    )
    .with_ttl(Duration::ZERO);

    let dispatched = dispatcher.dispatch(message).unwrap();
    let outcomes = dispatched.outcomes().await;
    assert_eq!(outcomes[0].1, DeliveryOutcome::Expired { attempts: 0 });
    assert!(mailbox.try_recv().is_none());

    let recorded = events.read(&Topic::new(topics::DELIVERY), 0, 10).unwrap();
    assert_eq!(recorded.len(), 1);
    assert!(matches!(
        recorded[0].payload,
        CoordinationEvent::Expired { attempts: 0, .. }
    ));
}

#[tokio::test]
async fn test_broadcast_reaches_every_other_agent_once() {
    let names = ["red-agent", "green-agent", "refactor-agent", "reviewer", "planner"];
    let transport = Arc::new(InMemoryTransport::default());
    let mut mailboxes: Vec<_> = names
        .iter()
        .map(|name| transport.open_mailbox(agent(name)))
        .collect();
    let (dispatcher, _events) = dispatcher_with(&names, transport.clone());

    let message = AgentMessage::new(
        agent("planner"),
        Destination::Broadcast,
        MessageType::WorkflowEvent,
        json!({ "event": "sprint started" }),
    );
    let dispatched = dispatcher.dispatch(message).unwrap();
    assert_eq!(dispatched.targets.len(), names.len() - 1);
    assert!(dispatched.targets.iter().all(|t| t.agent_id != agent("planner")));

    let outcomes = dispatched.outcomes().await;
    assert!(outcomes.iter().all(|(_, outcome)| outcome.is_delivered()));

    for mailbox in mailboxes.iter_mut() {
        if mailbox.agent_id() == &agent("planner") {
            assert!(mailbox.try_recv().is_none());
            continue;
        }
        let received = mailbox.recv().await.unwrap();
        assert_eq!(received.payload["event"], "sprint started");
        assert!(mailbox.try_recv().is_none());
    }
}
