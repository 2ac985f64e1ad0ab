// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// Event Store Implementation - Append-only Per-Topic Log with Replay
//
// Every topic is an independent, gap-free sequence of offsets starting at 0.
// Subscribers hold their own cursors, so replay from any retained offset is
// just a subscription with an older starting point. Writers never wait on
// subscribers: appends take a short write lock and bump a watch channel that
// wakes idle subscriptions.
//
// Retention is bounded by count (enforced on append) and by age (enforced on
// append and by the background pruner). A cursor that falls below a topic's
// retention floor yields `OffsetTooOld`; the consumer must resynchronize from
// a snapshot and resume from the head.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::config::EventStoreConfig;
use crate::domain::events::{CoordinationEvent, EventRecord};
use crate::domain::topic::{Topic, TopicPattern};

#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub max_events_per_topic: usize,
    pub max_age: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_events_per_topic: 10_000,
            max_age: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl From<&EventStoreConfig> for RetentionPolicy {
    fn from(config: &EventStoreConfig) -> Self {
        Self {
            max_events_per_topic: config.max_events_per_topic.max(1),
            max_age: config.max_age,
        }
    }
}

struct StoredEvent {
    /// Store-wide append sequence; orders events across topics
    seq: u64,
    record: Arc<EventRecord>,
}

#[derive(Default)]
struct TopicLog {
    next_offset: u64,
    events: VecDeque<StoredEvent>,
}

impl TopicLog {
    /// Lowest retained offset (equals `next_offset` when everything was pruned)
    fn floor(&self) -> u64 {
        self.events
            .front()
            .map(|e| e.record.offset)
            .unwrap_or(self.next_offset)
    }

    fn prune(&mut self, policy: &RetentionPolicy, now: DateTime<Utc>) -> usize {
        let mut pruned = 0;
        while self.events.len() > policy.max_events_per_topic {
            self.events.pop_front();
            pruned += 1;
        }
        if let Ok(max_age) = chrono::Duration::from_std(policy.max_age) {
            let cutoff = now - max_age;
            while self
                .events
                .front()
                .is_some_and(|e| e.record.timestamp < cutoff)
            {
                self.events.pop_front();
                pruned += 1;
            }
        }
        pruned
    }

    /// Event at `offset`, or None when `offset` is at or past the head
    fn get(&self, offset: u64) -> Option<&StoredEvent> {
        let index = offset.checked_sub(self.floor())?;
        self.events.get(index as usize)
    }
}

#[derive(Default)]
struct StoreState {
    topics: HashMap<Topic, TopicLog>,
    seq: u64,
}

struct Inner {
    state: RwLock<StoreState>,
    retention: RetentionPolicy,
    emitted_by: String,
    notify: watch::Sender<u64>,
    closed: AtomicBool,
}

/// Append-only, per-topic ordered event log
#[derive(Clone)]
pub struct EventStore {
    inner: Arc<Inner>,
}

impl EventStore {
    /// `emitted_by` is recorded on events appended through [`EventStore::append`]
    pub fn new(retention: RetentionPolicy, emitted_by: impl Into<String>) -> Self {
        let (notify, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(StoreState::default()),
                retention,
                emitted_by: emitted_by.into(),
                notify,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RetentionPolicy::default(), "quorum")
    }

    /// Append `payload` to `topic`, returning its offset.
    pub fn append(&self, topic: impl Into<Topic>, payload: CoordinationEvent) -> u64 {
        let emitted_by = self.inner.emitted_by.clone();
        self.append_as(topic, emitted_by, payload)
    }

    pub fn append_as(
        &self,
        topic: impl Into<Topic>,
        emitted_by: impl Into<String>,
        payload: CoordinationEvent,
    ) -> u64 {
        let topic = topic.into();
        let kind = payload.kind();
        let now = Utc::now();

        let (offset, seq) = {
            let mut state = self.inner.state.write();
            state.seq += 1;
            let seq = state.seq;

            let log = state.topics.entry(topic.clone()).or_default();
            let offset = log.next_offset;
            log.next_offset += 1;
            log.events.push_back(StoredEvent {
                seq,
                record: Arc::new(EventRecord {
                    offset,
                    topic: topic.clone(),
                    timestamp: now,
                    emitted_by: emitted_by.into(),
                    payload,
                }),
            });
            let pruned = log.prune(&self.inner.retention, now);
            if pruned > 0 {
                debug!(topic = %topic, pruned, "Pruned events past retention");
            }
            (offset, seq)
        };

        self.inner.notify.send_replace(seq);
        metrics::counter!("quorum_events_appended_total", "topic" => topic.to_string()).increment(1);
        debug!(topic = %topic, offset, kind, "Appended event");
        offset
    }

    /// Subscribe to every topic matching `pattern`, starting at `from` in
    /// each of them.
    pub fn subscribe(
        &self,
        pattern: TopicPattern,
        from: u64,
    ) -> Result<EventSubscription, EventStoreError> {
        {
            let state = self.inner.state.read();
            for (topic, log) in state.topics.iter().filter(|(t, _)| pattern.matches(t.as_str())) {
                let floor = log.floor();
                if from < floor {
                    return Err(EventStoreError::OffsetTooOld {
                        topic: topic.clone(),
                        requested: from,
                        floor,
                    });
                }
            }
        }

        Ok(EventSubscription {
            store: self.clone(),
            pattern,
            cursors: HashMap::new(),
            default_from: from,
            notify: self.inner.notify.subscribe(),
        })
    }

    /// Subscribe to events appended from now on. Topics created later are
    /// read from their first offset.
    pub fn subscribe_live(&self, pattern: TopicPattern) -> EventSubscription {
        let cursors = {
            let state = self.inner.state.read();
            state
                .topics
                .iter()
                .filter(|(t, _)| pattern.matches(t.as_str()))
                .map(|(t, log)| (t.clone(), log.next_offset))
                .collect()
        };

        EventSubscription {
            store: self.clone(),
            pattern,
            cursors,
            default_from: 0,
            notify: self.inner.notify.subscribe(),
        }
    }

    /// Non-blocking read of up to `limit` retained records of one topic
    pub fn read(
        &self,
        topic: &Topic,
        from: u64,
        limit: usize,
    ) -> Result<Vec<Arc<EventRecord>>, EventStoreError> {
        let state = self.inner.state.read();
        let Some(log) = state.topics.get(topic) else {
            return Ok(Vec::new());
        };
        let floor = log.floor();
        if from < floor {
            return Err(EventStoreError::OffsetTooOld {
                topic: topic.clone(),
                requested: from,
                floor,
            });
        }
        let skip = (from - floor) as usize;
        Ok(log
            .events
            .iter()
            .skip(skip)
            .take(limit)
            .map(|e| e.record.clone())
            .collect())
    }

    pub fn topics(&self) -> Vec<Topic> {
        let mut topics: Vec<_> = self.inner.state.read().topics.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Lowest retained offset of `topic`
    pub fn floor(&self, topic: &Topic) -> u64 {
        self.inner
            .state
            .read()
            .topics
            .get(topic)
            .map(TopicLog::floor)
            .unwrap_or(0)
    }

    /// Offset the next append to `topic` will receive
    pub fn head(&self, topic: &Topic) -> u64 {
        self.inner
            .state
            .read()
            .topics
            .get(topic)
            .map(|log| log.next_offset)
            .unwrap_or(0)
    }

    /// Drop events older than the retention age from every topic.
    pub fn prune_expired(&self) -> usize {
        let now = Utc::now();
        let mut state = self.inner.state.write();
        state
            .topics
            .values_mut()
            .map(|log| log.prune(&self.inner.retention, now))
            .sum()
    }

    /// End every subscription once it has drained the retained events.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.notify.send_modify(|_| {});
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore")
            .field("emitted_by", &self.inner.emitted_by)
            .field("topics", &self.topics().len())
            .finish()
    }
}

/// A lazy, infinite cursor over every topic matching a pattern.
///
/// Records from one topic are yielded in offset order; records from
/// different topics are interleaved in append order.
pub struct EventSubscription {
    store: EventStore,
    pattern: TopicPattern,
    cursors: HashMap<Topic, u64>,
    default_from: u64,
    notify: watch::Receiver<u64>,
}

impl EventSubscription {
    pub fn pattern(&self) -> &TopicPattern {
        &self.pattern
    }

    /// Wait for the next record. Fails with `OffsetTooOld` when retention
    /// overtook this cursor, and with `Closed` once the store is closed and
    /// nothing is left to read.
    pub async fn next(&mut self) -> Result<Arc<EventRecord>, EventStoreError> {
        loop {
            // Mark the current sequence seen before scanning so an append
            // racing with the scan still wakes us.
            self.notify.borrow_and_update();

            if let Some(record) = self.try_next()? {
                return Ok(record);
            }

            if self.store.is_closed() {
                return Err(EventStoreError::Closed);
            }

            if self.notify.changed().await.is_err() {
                return Err(EventStoreError::Closed);
            }
        }
    }

    /// Next available record without waiting
    pub fn try_next(&mut self) -> Result<Option<Arc<EventRecord>>, EventStoreError> {
        let state = self.store.inner.state.read();

        let mut best: Option<(u64, &StoredEvent)> = None;
        for (topic, log) in state.topics.iter() {
            if !self.pattern.matches(topic.as_str()) {
                continue;
            }
            let cursor = self.cursors.get(topic).copied().unwrap_or(self.default_from);
            let floor = log.floor();
            if cursor < floor {
                return Err(EventStoreError::OffsetTooOld {
                    topic: topic.clone(),
                    requested: cursor,
                    floor,
                });
            }
            if let Some(event) = log.get(cursor) {
                if best.is_none_or(|(seq, _)| event.seq < seq) {
                    best = Some((event.seq, event));
                }
            }
        }

        let Some((_, event)) = best else {
            return Ok(None);
        };
        let record = event.record.clone();
        drop(state);

        self.cursors.insert(record.topic.clone(), record.offset + 1);
        Ok(Some(record))
    }

    /// Resume from the current head of every matching topic
    pub fn skip_to_head(&mut self) {
        let fresh = self.store.subscribe_live(self.pattern.clone());
        self.cursors = fresh.cursors;
        self.default_from = 0;
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Arc<EventRecord>, EventStoreError>> {
        futures::stream::unfold(self, |mut subscription| async move {
            match subscription.next().await {
                Err(EventStoreError::Closed) => None,
                result => Some((result, subscription)),
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventStoreError {
    #[error("offset {requested} of topic {topic} is below the retention floor {floor}")]
    OffsetTooOld {
        topic: Topic,
        requested: u64,
        floor: u64,
    },

    #[error("event store is closed")]
    Closed,
}

// ============================================================================
// Subscription handlers
// ============================================================================

/// Consumer side of a subscription. Delivery is at-least-once; handlers must
/// be idempotent on `(topic, offset)`.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, record: &EventRecord) -> anyhow::Result<()>;

    /// Called after the subscription fell behind the retention floor, before
    /// it resumes from the head.
    async fn resynchronize(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Drive `subscription` into `handler` until cancelled or the store closes.
pub fn spawn_subscription(
    name: &'static str,
    mut subscription: EventSubscription,
    handler: Arc<dyn EventHandler>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(subscription = name, pattern = %subscription.pattern(), "Subscription started");
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = subscription.next() => next,
            };

            match next {
                Ok(record) => {
                    if let Err(e) = handler.handle(&record).await {
                        warn!(
                            subscription = name,
                            topic = %record.topic,
                            offset = record.offset,
                            "Event handler failed: {:#}",
                            e
                        );
                    }
                }
                Err(EventStoreError::OffsetTooOld { topic, requested, floor }) => {
                    warn!(
                        subscription = name,
                        topic = %topic,
                        requested,
                        floor,
                        "Subscription fell behind retention, resynchronizing"
                    );
                    if let Err(e) = handler.resynchronize().await {
                        warn!(subscription = name, "Resynchronization failed: {:#}", e);
                    }
                    subscription.skip_to_head();
                }
                Err(EventStoreError::Closed) => break,
            }
        }
        debug!(subscription = name, "Subscription stopped");
    })
}

/// Idempotent-consumer helper: remembers the next expected offset per topic.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    marks: Mutex<HashMap<Topic, u64>>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true the first time a `(topic, offset)` at or above the
    /// high-water mark is seen, false for anything already processed.
    pub fn observe(&self, record: &EventRecord) -> bool {
        let mut marks = self.marks.lock();
        let mark = marks.entry(record.topic.clone()).or_insert(0);
        if record.offset < *mark {
            return false;
        }
        *mark = record.offset + 1;
        true
    }

    /// Highest processed offset of `topic`
    pub fn high_water(&self, topic: &Topic) -> Option<u64> {
        self.marks
            .lock()
            .get(topic)
            .and_then(|next| next.checked_sub(1))
    }

    /// Forget everything, e.g. after a resynchronization
    pub fn reset(&self) {
        self.marks.lock().clear();
    }
}

// ============================================================================
// Retention pruner
// ============================================================================

/// Background task enforcing the retention age on idle topics
pub struct EventStorePruner {
    store: EventStore,
    interval: Duration,
    shutdown_token: CancellationToken,
}

impl EventStorePruner {
    pub fn new(store: EventStore, interval: Duration, shutdown_token: CancellationToken) -> Self {
        Self {
            store,
            interval,
            shutdown_token,
        }
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(&self) {
        info!(interval = ?self.interval, "Starting event store pruner");

        let mut tick = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let pruned = self.store.prune_expired();
                    if pruned > 0 {
                        info!(pruned, "Pruned expired events");
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping event store pruner");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::AlertKind;

    fn alert(detail: &str) -> CoordinationEvent {
        CoordinationEvent::AlertRaised {
            kind: AlertKind::RoutingTableEmpty,
            detail: detail.to_string(),
        }
    }

    fn pattern(p: &str) -> TopicPattern {
        TopicPattern::new(p).unwrap()
    }

    #[test]
    fn test_offsets_are_per_topic_and_gap_free() {
        let store = EventStore::with_defaults();
        assert_eq!(store.append("a", alert("1")), 0);
        assert_eq!(store.append("a", alert("2")), 1);
        assert_eq!(store.append("b", alert("3")), 0);
        assert_eq!(store.append("a", alert("4")), 2);
        assert_eq!(store.head(&Topic::new("a")), 3);
    }

    #[tokio::test]
    async fn test_subscribe_from_offset_replays_in_order() {
        let store = EventStore::with_defaults();
        for i in 0..5 {
            store.append("status", alert(&i.to_string()));
        }

        let mut sub = store.subscribe(pattern("status"), 2).unwrap();
        for expected in 2..5 {
            let record = sub.next().await.unwrap();
            assert_eq!(record.offset, expected);
        }
        assert!(sub.try_next().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_live_subscription_wakes_on_append() {
        let store = EventStore::with_defaults();
        store.append("workflow", alert("old"));
        let mut sub = store.subscribe_live(pattern("work*"));

        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            writer.append("workflow", alert("new"));
        });

        let record = tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.offset, 1);
    }

    #[tokio::test]
    async fn test_count_retention_reports_offset_too_old() {
        let store = EventStore::new(
            RetentionPolicy {
                max_events_per_topic: 3,
                max_age: Duration::from_secs(3600),
            },
            "test",
        );
        for i in 0..5 {
            store.append("delivery", alert(&i.to_string()));
        }
        assert_eq!(store.floor(&Topic::new("delivery")), 2);

        let err = store.subscribe(pattern("delivery"), 0).err().unwrap();
        assert_eq!(
            err,
            EventStoreError::OffsetTooOld {
                topic: Topic::new("delivery"),
                requested: 0,
                floor: 2
            }
        );
        assert!(store.subscribe(pattern("delivery"), 2).is_ok());
    }

    #[tokio::test]
    async fn test_close_ends_subscription_after_drain() {
        let store = EventStore::with_defaults();
        store.append("alerts", alert("x"));
        let mut sub = store.subscribe(pattern("*"), 0).unwrap();
        store.close();

        assert!(sub.next().await.is_ok());
        assert_eq!(sub.next().await.unwrap_err(), EventStoreError::Closed);
    }

    #[test]
    fn test_offset_tracker_drops_duplicates() {
        let store = EventStore::with_defaults();
        store.append("a", alert("1"));
        let record = store.read(&Topic::new("a"), 0, 1).unwrap().remove(0);

        let tracker = OffsetTracker::new();
        assert!(tracker.observe(&record));
        assert!(!tracker.observe(&record));
        assert_eq!(tracker.high_water(&Topic::new("a")), Some(0));
    }
}
