// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde_json::json;
use std::time::Duration;

use quorum_core::application::correlation::{CorrelationError, CorrelationTracker};
use quorum_core::domain::agent::AgentId;
use quorum_core::domain::delivery::DeliveryOutcome;
use quorum_core::domain::message::{AgentMessage, CorrelationId, MessageType};

fn agent(name: &str) -> AgentId {
    AgentId::new(name).unwrap()
}

fn response(correlation_id: &str, answer: &str) -> AgentMessage {
    AgentMessage::new(
        agent("green-agent"),
        agent("red-agent"),
        MessageType::CoordinationResponse,
        json!({ "answer": answer }),
    )
    .with_correlation_id(CorrelationId::new(correlation_id))
}

#[tokio::test]
async fn test_each_request_resolves_exactly_once() {
    let tracker = CorrelationTracker::new();
    let cid = CorrelationId::new("req-1");
    let waiter = tracker.expect(cid.clone()).unwrap();

    let (first, second) = tokio::join!(
        async { tracker.resolve(&cid, response("req-1", "first")) },
        async { tracker.resolve(&cid, response("req-1", "second")) },
    );
    assert!(first ^ second, "exactly one response must win");

    let received = waiter.wait(Duration::from_secs(1)).await.unwrap();
    let expected = if first { "first" } else { "second" };
    assert_eq!(received.payload["answer"], expected);
    assert!(!tracker.is_pending(&cid));
}

#[tokio::test]
async fn test_late_response_after_timeout_is_ignored() {
    let tracker = CorrelationTracker::new();
    let cid = CorrelationId::new("req-late");

    let err = tracker
        .await_response(cid.clone(), Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(matches!(err, CorrelationError::Timeout { .. }));
    assert!(!tracker.resolve(&cid, response("req-late", "too late")));

    // the id may be reused once the first wait is over
    let waiter = tracker.expect(cid.clone()).unwrap();
    assert!(tracker.resolve(&cid, response("req-late", "retry")));
    assert_eq!(
        waiter.wait(Duration::from_secs(1)).await.unwrap().payload["answer"],
        "retry"
    );
}

#[tokio::test]
async fn test_duplicate_expectation_rejected() {
    let tracker = CorrelationTracker::new();
    let cid = CorrelationId::new("req-dup");
    let _waiter = tracker.expect(cid.clone()).unwrap();

    assert!(matches!(
        tracker.expect(cid.clone()),
        Err(CorrelationError::DuplicateCorrelation(_))
    ));
    assert_eq!(tracker.list_pending().len(), 1);
}

#[tokio::test]
async fn test_undeliverable_request_fails_waiter() {
    let tracker = CorrelationTracker::new();
    let cid = CorrelationId::new("req-dead");
    let waiter = tracker.expect(cid.clone()).unwrap();

    let outcome = DeliveryOutcome::DeadLettered {
        attempts: 3,
        last_error: "agent green-agent is unreachable".to_string(),
    };
    assert!(tracker.fail(&cid, outcome.clone()));

    match waiter.wait(Duration::from_secs(1)).await {
        Err(CorrelationError::Undeliverable { outcome: got, .. }) => assert_eq!(got, outcome),
        other => panic!("expected undeliverable, got {:?}", other),
    }
}
