// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Workflow sequencing driven through the coordination hub, with agents
//! answering from their mailboxes the way a real fleet would.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use quorum_core::domain::agent::AgentId;
use quorum_core::domain::config::CoordinatorConfigManifest;
use quorum_core::domain::events::CoordinationEvent;
use quorum_core::domain::message::{AgentMessage, MessageType};
use quorum_core::domain::phase::TddPhase;
use quorum_core::domain::topic::{topics, Topic, TopicPattern};
use quorum_core::domain::workflow::{WorkflowDefinition, WorkflowDefinitionId, WorkflowStatus, WorkflowStep};
use quorum_core::infrastructure::transport::{InMemoryTransport, Mailbox};
use quorum_core::{CoordinationHub, Submitted};

const CONFIG: &str = r#"
apiVersion: quorum.dev/v1
kind: CoordinatorConfig
metadata:
  name: workflow-tests
spec:
  node:
    id: test-node
  delivery:
    retry:
      max_attempts: 2
      base_delay: 10ms
    ack_timeout: 200ms
  agents:
    - id: schema-agent
    - id: api-agent
    - id: docs-agent
"#;

fn agent(name: &str) -> AgentId {
    AgentId::new(name).unwrap()
}

async fn hub() -> (Arc<CoordinationHub>, Arc<InMemoryTransport>) {
    let config = CoordinatorConfigManifest::from_yaml_str(CONFIG).unwrap();
    let transport = Arc::new(InMemoryTransport::default());
    let hub = Arc::new(CoordinationHub::new(config, transport.clone()).unwrap());
    hub.start().await.unwrap();
    (hub, transport)
}

async fn next_message(mailbox: &mut Mailbox) -> AgentMessage {
    tokio::time::timeout(Duration::from_secs(2), mailbox.recv())
        .await
        .expect("mailbox stayed empty")
        .expect("mailbox closed")
}

fn answer(hub: &CoordinationHub, assignment: &AgentMessage, success: bool) -> AgentMessage {
    let reply = AgentMessage::reply_to(
        assignment,
        assignment.destination.agent().cloned().unwrap(),
        MessageType::TaskCompletion,
        if success {
            json!({ "success": true })
        } else {
            json!({ "success": false, "error": "migration conflicts with api" })
        },
    );
    assert_eq!(reply.destination.agent(), Some(hub.coordinator_id()));
    reply
}

fn workflow_events(hub: &CoordinationHub) -> Vec<CoordinationEvent> {
    hub.events()
        .read(&Topic::new(topics::WORKFLOW), 0, 1000)
        .unwrap()
        .iter()
        .map(|record| record.payload.clone())
        .collect()
}

#[tokio::test]
async fn test_failed_step_compensates_completed_steps_once() {
    let (hub, transport) = hub().await;
    let mut schema = transport.open_mailbox(agent("schema-agent"));
    let mut api = transport.open_mailbox(agent("api-agent"));
    let mut docs = transport.open_mailbox(agent("docs-agent"));

    let definition = WorkflowDefinition::new(
        WorkflowDefinitionId::new("add-endpoint").unwrap(),
        vec![
            WorkflowStep::new("migrate-schema", agent("schema-agent"), json!({ "table": "users" }))
                .with_compensation(json!({ "revert": "users" })),
            WorkflowStep::new("implement-api", agent("api-agent"), json!({ "route": "/users" })),
            WorkflowStep::new("write-docs", agent("docs-agent"), json!({})),
        ],
        true,
    )
    .unwrap();
    let definition_id = definition.id.clone();
    hub.coordinator().register_definition(definition).await.unwrap();

    let instance_id = hub.coordinator().start(&definition_id, json!({ "ticket": 42 })).await.unwrap();

    let first = next_message(&mut schema).await;
    assert_eq!(first.payload["step"], "migrate-schema");
    assert_eq!(first.payload["input"]["ticket"], 42);
    assert!(matches!(
        hub.submit(answer(&hub, &first, true)).await.unwrap(),
        Submitted::Coordinator { settled: true }
    ));

    let second = next_message(&mut api).await;
    assert_eq!(second.payload["step"], "implement-api");
    hub.submit(answer(&hub, &second, false)).await.unwrap();

    let compensation = next_message(&mut schema).await;
    assert_eq!(compensation.payload["action"], "compensate");
    assert_eq!(compensation.payload["compensation"]["revert"], "users");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(schema.try_recv().is_none(), "compensation sent more than once");
    assert!(docs.try_recv().is_none(), "step after the failure was assigned");

    let instance = hub.coordinator().get(instance_id).await.unwrap().unwrap();
    assert_eq!(instance.status, WorkflowStatus::RolledBack);
    assert_eq!(instance.failure_reason.as_deref(), Some("migration conflicts with api"));

    let events = workflow_events(&hub);
    let compensations = events
        .iter()
        .filter(|e| matches!(e, CoordinationEvent::CompensationIssued { .. }))
        .count();
    assert_eq!(compensations, 1);
    assert!(events
        .iter()
        .all(|e| !matches!(e, CoordinationEvent::StepAssigned { step_index: 2, .. })));
    assert!(matches!(
        events.last(),
        Some(CoordinationEvent::WorkflowRolledBack { compensated_steps: 1, .. })
    ));

    // a late success for the failed step changes nothing
    assert!(matches!(
        hub.submit(answer(&hub, &second, true)).await.unwrap(),
        Submitted::Coordinator { settled: false }
    ));

    hub.shutdown().await;
}

#[tokio::test]
async fn test_tdd_cycle_emits_phase_transitions() {
    let (hub, transport) = hub().await;
    let mut phase_feed = hub.subscribe(TopicPattern::new(topics::PHASE).unwrap(), 0).unwrap();
    let mut mailboxes = vec![
        transport.open_mailbox(agent("schema-agent")),
        transport.open_mailbox(agent("api-agent")),
        transport.open_mailbox(agent("docs-agent")),
    ];

    let definition = WorkflowDefinition::tdd_cycle(
        WorkflowDefinitionId::new("login-cycle").unwrap(),
        "login",
        agent("schema-agent"),
        agent("api-agent"),
        agent("docs-agent"),
    )
    .unwrap();
    let definition_id = definition.id.clone();
    hub.coordinator().register_definition(definition).await.unwrap();
    let instance_id = hub.coordinator().start(&definition_id, json!({})).await.unwrap();

    for mailbox in mailboxes.iter_mut() {
        let assignment = next_message(mailbox).await;
        hub.submit(answer(&hub, &assignment, true)).await.unwrap();
    }

    let instance = hub.coordinator().get(instance_id).await.unwrap().unwrap();
    assert_eq!(instance.status, WorkflowStatus::Completed);

    let mut transitions = Vec::new();
    while let Some(record) = phase_feed.try_next().unwrap() {
        if let CoordinationEvent::PhaseTransitioned { from, to, .. } = &record.payload {
            transitions.push((*from, *to));
        }
    }
    assert_eq!(
        transitions,
        vec![(TddPhase::Red, TddPhase::Green), (TddPhase::Green, TddPhase::Refactor)]
    );

    hub.shutdown().await;
}

#[tokio::test]
async fn test_undeliverable_assignment_fails_workflow() {
    let (hub, _transport) = hub().await;
    // docs-agent is registered but never opens a mailbox

    let definition = WorkflowDefinition::new(
        WorkflowDefinitionId::new("docs-only").unwrap(),
        vec![WorkflowStep::new("write-docs", agent("docs-agent"), json!({}))],
        false,
    )
    .unwrap();
    let definition_id = definition.id.clone();
    hub.coordinator().register_definition(definition).await.unwrap();
    let instance_id = hub.coordinator().start(&definition_id, json!({})).await.unwrap();

    let mut status = None;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let instance = hub.coordinator().get(instance_id).await.unwrap().unwrap();
        if instance.status.is_terminal() {
            status = Some(instance.status);
            break;
        }
    }
    assert_eq!(status, Some(WorkflowStatus::Failed));

    hub.shutdown().await;
}
