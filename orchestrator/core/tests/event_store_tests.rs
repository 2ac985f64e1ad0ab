// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Event store offsets, replay and retention as seen by subscribers.

use std::time::Duration;

use quorum_core::domain::agent::AgentId;
use quorum_core::domain::events::CoordinationEvent;
use quorum_core::domain::topic::{Topic, TopicPattern};
use quorum_core::infrastructure::event_store::{EventStore, EventStoreError, RetentionPolicy};

fn registered(name: &str, version: u64) -> CoordinationEvent {
    CoordinationEvent::AgentRegistered {
        agent_id: AgentId::new(name).unwrap(),
        capabilities: vec![],
        registry_version: version,
    }
}

#[test]
fn test_offsets_are_gap_free_per_topic() {
    let store = EventStore::with_defaults();

    for i in 0..10u64 {
        assert_eq!(store.append("agents", registered("red-agent", i)), i);
        if i % 2 == 0 {
            assert_eq!(store.append("alerts", registered("green-agent", i)), i / 2);
        }
    }

    assert_eq!(store.head(&Topic::new("agents")), 10);
    assert_eq!(store.head(&Topic::new("alerts")), 5);
    assert_eq!(store.head(&Topic::new("unused")), 0);
}

#[tokio::test]
async fn test_replay_from_offset_matches_read() {
    let store = EventStore::with_defaults();
    for i in 0..8 {
        store.append("agents", registered("red-agent", i));
    }

    let mut subscription = store
        .subscribe(TopicPattern::new("agents").unwrap(), 3)
        .unwrap();
    let mut replayed = Vec::new();
    while let Some(record) = subscription.try_next().unwrap() {
        replayed.push(record.offset);
    }
    assert_eq!(replayed, vec![3, 4, 5, 6, 7]);

    let read: Vec<u64> = store
        .read(&Topic::new("agents"), 3, 100)
        .unwrap()
        .iter()
        .map(|r| r.offset)
        .collect();
    assert_eq!(read, replayed);

    // live events follow the replayed ones
    store.append("agents", registered("red-agent", 8));
    let next = tokio::time::timeout(Duration::from_secs(1), subscription.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next.offset, 8);
}

#[tokio::test]
async fn test_subscribers_observe_identical_order() {
    let store = EventStore::with_defaults();
    let pattern = TopicPattern::new("agents").unwrap();
    let mut first = store.subscribe_live(pattern.clone());
    let mut second = store.subscribe_live(pattern);

    for i in 0..20 {
        store.append("agents", registered("red-agent", i));
    }

    for expected in 0..20u64 {
        assert_eq!(first.next().await.unwrap().offset, expected);
        assert_eq!(second.next().await.unwrap().offset, expected);
    }
}

#[test]
fn test_pruned_offset_is_reported() {
    let store = EventStore::new(
        RetentionPolicy {
            max_events_per_topic: 3,
            max_age: Duration::from_secs(3600),
        },
        "test-node",
    );
    for i in 0..6 {
        store.append("agents", registered("red-agent", i));
    }

    let topic = Topic::new("agents");
    assert_eq!(store.floor(&topic), 3);
    assert!(matches!(
        store.read(&topic, 1, 10),
        Err(EventStoreError::OffsetTooOld { requested: 1, floor: 3, .. })
    ));
    assert!(store.subscribe(TopicPattern::new("agents").unwrap(), 0).is_err());

    let retained = store.read(&topic, 3, 10).unwrap();
    assert_eq!(retained.len(), 3);
    assert_eq!(retained[0].emitted_by, "test-node");
}

#[tokio::test]
async fn test_closed_store_ends_subscriptions() {
    let store = EventStore::with_defaults();
    let mut subscription = store.subscribe_live(TopicPattern::any());
    store.close();

    let result = tokio::time::timeout(Duration::from_secs(1), subscription.next())
        .await
        .unwrap();
    assert!(matches!(result, Err(EventStoreError::Closed)));
}
