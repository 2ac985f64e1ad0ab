// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Delivery Manager
//!
//! Send-with-retry for one message to one resolved target.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Retry, backoff, TTL, dead-lettering, outcome events
//!
//! Every accepted delivery gets a [`DeliveryRecord`] in an arena keyed by
//! `(message id, target)`. The arena is what makes in-flight work
//! enumerable and cancellable; the record is removed when the delivery
//! reaches its terminal outcome, right before that outcome's event is
//! appended, so each delivery reports exactly once.
//!
//! Ordering: each `(source, target)` pair has a lane with a single worker
//! that performs first attempts in submission order. Retries leave the lane
//! and run on their own task so a failing message never holds back the
//! messages queued behind it. A lane that stays empty for
//! `lane_idle_timeout` removes itself; the next message for the pair starts
//! a fresh one.
//!
//! ```text
//! deliver ──▶ lane ──▶ attempt ──ok──▶ Delivered
//!                        │
//!                        ├─retryable──▶ backoff ──▶ attempt ... ──▶ DeadLettered
//!                        ├─ttl elapsed──▶ Expired
//!                        └─cancelled──▶ Cancelled
//! ```

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::agent::AgentId;
use crate::domain::config::DeliveryConfig;
use crate::domain::delivery::{
    DeadLetter, DeliveryKey, DeliveryOutcome, DeliveryRecord, DeliveryState, MessageTransport,
    ResolvedTarget,
};
use crate::domain::events::{AlertKind, CoordinationEvent, EventRecord};
use crate::domain::message::{AgentMessage, MessageId, RetryPolicy};
use crate::domain::topic::topics;
use crate::infrastructure::event_store::EventStore;

#[derive(Debug, Clone)]
pub struct DeliverySettings {
    /// Used for messages without their own retry policy
    pub default_retry: RetryPolicy,
    pub ack_timeout: Duration,
    pub dead_letter_alert_threshold: usize,
    pub dead_letter_alert_window: Duration,
    pub lane_idle_timeout: Duration,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self::from(&DeliveryConfig::default())
    }
}

impl From<&DeliveryConfig> for DeliverySettings {
    fn from(config: &DeliveryConfig) -> Self {
        Self {
            default_retry: config.retry.to_policy(),
            ack_timeout: config.ack_timeout,
            dead_letter_alert_threshold: config.dead_letter_alert_threshold,
            dead_letter_alert_window: config.dead_letter_alert_window,
            lane_idle_timeout: config.lane_idle_timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("delivery {0} is already in flight")]
    AlreadyInFlight(DeliveryKey),

    #[error("message {0} is not in the dead-letter queue")]
    NotDeadLettered(MessageId),

    #[error("event {topic}#{offset} is not a delivery failure")]
    NotReplayable { topic: String, offset: u64 },
}

/// Handle to the eventual outcome of one delivery
pub struct DeliveryTicket {
    key: DeliveryKey,
    outcome_rx: oneshot::Receiver<DeliveryOutcome>,
}

impl DeliveryTicket {
    pub fn key(&self) -> &DeliveryKey {
        &self.key
    }

    pub fn target(&self) -> &AgentId {
        &self.key.target
    }

    /// Wait for the terminal outcome.
    pub async fn outcome(self) -> DeliveryOutcome {
        self.outcome_rx
            .await
            .unwrap_or(DeliveryOutcome::Cancelled { attempts: 0 })
    }
}

struct InFlight {
    record: DeliveryRecord,
    cancel: CancellationToken,
}

struct Job {
    key: DeliveryKey,
    message: Arc<AgentMessage>,
    target: ResolvedTarget,
    policy: RetryPolicy,
    attempts: u32,
    cancel: CancellationToken,
    outcome_tx: oneshot::Sender<DeliveryOutcome>,
}

enum AttemptResult {
    Delivered { duplicate: bool },
    Failed { error: String, retryable: bool },
    Expired,
    Cancelled,
}

enum Step {
    Finish(DeliveryOutcome),
    Retry,
}

#[derive(Default)]
struct AlertWindow {
    dead_letters: VecDeque<Instant>,
    last_alert: Option<Instant>,
}

type LaneKey = (AgentId, AgentId);

struct Inner {
    transport: Arc<dyn MessageTransport>,
    events: EventStore,
    settings: DeliverySettings,
    arena: DashMap<DeliveryKey, InFlight>,
    lanes: DashMap<LaneKey, mpsc::UnboundedSender<Job>>,
    dead_letters: DashMap<DeliveryKey, DeadLetter>,
    alerts: Mutex<AlertWindow>,
}

#[derive(Clone)]
pub struct DeliveryManager {
    inner: Arc<Inner>,
}

impl DeliveryManager {
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        events: EventStore,
        settings: DeliverySettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                events,
                settings,
                arena: DashMap::new(),
                lanes: DashMap::new(),
                dead_letters: DashMap::new(),
                alerts: Mutex::new(AlertWindow::default()),
            }),
        }
    }

    /// Accept `message` for delivery to `target`. Never waits for the
    /// outcome; use the returned ticket or the `delivery` topic for that.
    pub fn deliver(
        &self,
        message: Arc<AgentMessage>,
        target: ResolvedTarget,
    ) -> Result<DeliveryTicket, DeliveryError> {
        let key = DeliveryKey {
            message_id: message.id,
            target: target.agent_id.clone(),
        };
        let (outcome_tx, outcome_rx) = oneshot::channel();

        if message.is_expired() {
            debug!(delivery = %key, "TTL already elapsed, not attempting");
            self.emit_outcome(&message, &target.agent_id, &DeliveryOutcome::Expired { attempts: 0 });
            let _ = outcome_tx.send(DeliveryOutcome::Expired { attempts: 0 });
            return Ok(DeliveryTicket { key, outcome_rx });
        }

        let cancel = CancellationToken::new();
        match self.inner.arena.entry(key.clone()) {
            Entry::Occupied(_) => return Err(DeliveryError::AlreadyInFlight(key)),
            Entry::Vacant(slot) => {
                slot.insert(InFlight {
                    record: DeliveryRecord::new(&message, &target.agent_id),
                    cancel: cancel.clone(),
                });
            }
        }

        let policy = message
            .retry_policy
            .clone()
            .unwrap_or_else(|| self.inner.settings.default_retry.clone());

        let job = Job {
            key: key.clone(),
            message,
            target,
            policy,
            attempts: 0,
            cancel,
            outcome_tx,
        };
        self.enqueue(job);

        Ok(DeliveryTicket { key, outcome_rx })
    }

    /// Snapshot of every non-terminal delivery
    pub fn in_flight(&self) -> Vec<DeliveryRecord> {
        self.inner
            .arena
            .iter()
            .map(|entry| entry.value().record.clone())
            .collect()
    }

    /// Cancel every target's delivery of `message_id`; returns how many were
    /// still in flight.
    pub fn cancel(&self, message_id: MessageId) -> usize {
        let mut cancelled = 0;
        for entry in self.inner.arena.iter() {
            if entry.key().message_id == message_id {
                entry.value().cancel.cancel();
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!(message_id = %message_id, cancelled, "Cancelled in-flight deliveries");
        }
        cancelled
    }

    pub fn cancel_all(&self) {
        for entry in self.inner.arena.iter() {
            entry.value().cancel.cancel();
        }
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        let mut letters: Vec<_> = self
            .inner
            .dead_letters
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        letters.sort_by_key(|l| l.dead_lettered_at);
        letters
    }

    /// Operator replay: re-enqueue every dead-lettered delivery of
    /// `message_id` with a fresh attempt budget. The message id is kept so
    /// receivers still de-duplicate.
    pub fn replay_dead_letter(&self, message_id: MessageId) -> Result<Vec<DeliveryTicket>, DeliveryError> {
        let keys: Vec<DeliveryKey> = self
            .inner
            .dead_letters
            .iter()
            .filter(|entry| entry.key().message_id == message_id)
            .map(|entry| entry.key().clone())
            .collect();
        if keys.is_empty() {
            return Err(DeliveryError::NotDeadLettered(message_id));
        }

        let mut tickets = Vec::new();
        let mut last_error = None;
        for key in keys {
            let Some((key, letter)) = self.inner.dead_letters.remove(&key) else {
                continue;
            };
            info!(delivery = %key, "Replaying dead-lettered message");
            match self.deliver(
                Arc::new(letter.message.clone()),
                ResolvedTarget::direct(letter.target.clone(), 0),
            ) {
                Ok(ticket) => tickets.push(ticket),
                Err(e) => {
                    warn!(delivery = %key, "Dead letter kept, replay refused: {}", e);
                    self.inner.dead_letters.insert(key, letter);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if tickets.is_empty() => Err(e),
            _ => Ok(tickets),
        }
    }

    /// Operator replay from a `DeliveryFailed` event, e.g. one read back from
    /// the event store or a journal.
    pub fn replay_from_event(&self, record: &EventRecord) -> Result<DeliveryTicket, DeliveryError> {
        let CoordinationEvent::DeliveryFailed { message, target, .. } = &record.payload else {
            return Err(DeliveryError::NotReplayable {
                topic: record.topic.to_string(),
                offset: record.offset,
            });
        };

        let letter = self.inner.dead_letters.remove(&DeliveryKey {
            message_id: message.id,
            target: target.clone(),
        });
        info!(message_id = %message.id, target = %target, offset = record.offset, "Replaying message from event");
        self.deliver(
            Arc::new(message.as_ref().clone()),
            ResolvedTarget::direct(target.clone(), 0),
        )
        .inspect_err(|_| {
            if let Some((key, letter)) = letter {
                self.inner.dead_letters.insert(key, letter);
            }
        })
    }

    /// Number of live `(source, target)` lanes
    pub fn active_lanes(&self) -> usize {
        self.inner.lanes.len()
    }

    /// Drop every lane into `target`. Queued first attempts still run; the
    /// workers stop once their queues drain.
    pub fn release_target(&self, target: &AgentId) -> usize {
        let before = self.inner.lanes.len();
        self.inner.lanes.retain(|(_, lane_target), _| lane_target != target);
        let released = before.saturating_sub(self.inner.lanes.len());
        if released > 0 {
            debug!(target = %target, released, "Released delivery lanes");
        }
        released
    }

    // ------------------------------------------------------------------
    // lanes
    // ------------------------------------------------------------------

    fn enqueue(&self, job: Job) {
        let lane = (job.message.source.clone(), job.target.agent_id.clone());

        // Sending under the entry guard keeps a retiring worker from
        // removing its lane between lookup and send.
        let mut sender = self
            .inner
            .lanes
            .entry(lane.clone())
            .or_insert_with(|| self.spawn_lane(lane.clone()));

        if let Err(mpsc::error::SendError(job)) = sender.send(job) {
            // The worker is gone; start a fresh lane once.
            *sender = self.spawn_lane(lane);
            if let Err(mpsc::error::SendError(job)) = sender.send(job) {
                drop(sender);
                self.finalize(job, DeliveryOutcome::Cancelled { attempts: 0 });
            }
        }
    }

    fn spawn_lane(&self, lane: LaneKey) -> mpsc::UnboundedSender<Job> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let own = tx.downgrade();
        let idle = self.inner.settings.lane_idle_timeout;

        tokio::spawn(async move {
            debug!(source = %lane.0, target = %lane.1, "Delivery lane started");
            loop {
                let job = match tokio::time::timeout(idle, rx.recv()).await {
                    Ok(Some(job)) => job,
                    Ok(None) => break,
                    Err(_) => {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        match retire_lane(&inner, &lane, &own, &mut rx) {
                            Some(job) => job,
                            None => break,
                        }
                    }
                };

                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let manager = DeliveryManager { inner };
                manager.run_first_attempt(job).await;
            }
            debug!(source = %lane.0, target = %lane.1, "Delivery lane stopped");
        });

        tx
    }

    async fn run_first_attempt(&self, mut job: Job) {
        let result = self.attempt(&mut job).await;
        match self.next_step(&job, result) {
            Step::Finish(outcome) => self.finalize(job, outcome),
            Step::Retry => {
                tokio::spawn(self.clone().retry_loop(job));
            }
        }
    }

    // ------------------------------------------------------------------
    // attempts
    // ------------------------------------------------------------------

    async fn attempt(&self, job: &mut Job) -> AttemptResult {
        if job.cancel.is_cancelled() {
            return AttemptResult::Cancelled;
        }
        if job.message.is_expired() {
            return AttemptResult::Expired;
        }

        job.attempts += 1;
        let attempts = job.attempts;
        self.update_record(&job.key, |record| {
            record.attempts = attempts;
            record.state = DeliveryState::Attempting;
            record.last_attempt_at = Some(Utc::now());
        });

        let ack_timeout = job.policy.ack_timeout.unwrap_or(self.inner.settings.ack_timeout);
        let send = tokio::time::timeout(
            ack_timeout,
            self.inner.transport.send(&job.target, &job.message),
        );

        tokio::select! {
            biased;
            _ = job.cancel.cancelled() => AttemptResult::Cancelled,
            result = send => match result {
                Ok(Ok(ack)) => AttemptResult::Delivered { duplicate: ack.duplicate },
                Ok(Err(e)) => AttemptResult::Failed {
                    error: e.to_string(),
                    retryable: e.is_retryable(),
                },
                Err(_) => AttemptResult::Failed {
                    error: format!("no acknowledgment within {:?}", ack_timeout),
                    retryable: true,
                },
            },
        }
    }

    fn next_step(&self, job: &Job, result: AttemptResult) -> Step {
        let attempts = job.attempts;
        match result {
            AttemptResult::Delivered { duplicate } => {
                if duplicate {
                    debug!(delivery = %job.key, "Receiver had already seen this message");
                }
                Step::Finish(DeliveryOutcome::Delivered { attempts })
            }
            AttemptResult::Expired => Step::Finish(DeliveryOutcome::Expired { attempts }),
            AttemptResult::Cancelled => Step::Finish(DeliveryOutcome::Cancelled { attempts }),
            AttemptResult::Failed { error, retryable } => {
                self.update_record(&job.key, |record| record.last_error = Some(error.clone()));
                if retryable && job.policy.has_attempts_left(attempts) {
                    warn!(delivery = %job.key, attempts, "Delivery attempt failed, will retry: {}", error);
                    Step::Retry
                } else {
                    Step::Finish(DeliveryOutcome::DeadLettered {
                        attempts,
                        last_error: error,
                    })
                }
            }
        }
    }

    async fn retry_loop(self, mut job: Job) {
        loop {
            let delay = job.policy.backoff_after(job.attempts);
            let ttl_left = job.message.ttl_remaining();
            let now = Utc::now();
            let next_attempt_at = chrono::Duration::from_std(delay)
                .ok()
                .and_then(|d| now.checked_add_signed(d))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            self.update_record(&job.key, |record| {
                record.state = DeliveryState::AwaitingRetry { next_attempt_at };
            });

            tokio::select! {
                biased;
                _ = job.cancel.cancelled() => {
                    let attempts = job.attempts;
                    self.finalize(job, DeliveryOutcome::Cancelled { attempts });
                    return;
                }
                _ = expiry(ttl_left) => {
                    let attempts = job.attempts;
                    debug!(delivery = %job.key, attempts, "TTL elapsed while awaiting retry");
                    self.finalize(job, DeliveryOutcome::Expired { attempts });
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let result = self.attempt(&mut job).await;
            match self.next_step(&job, result) {
                Step::Finish(outcome) => {
                    self.finalize(job, outcome);
                    return;
                }
                Step::Retry => continue,
            }
        }
    }

    fn update_record(&self, key: &DeliveryKey, update: impl FnOnce(&mut DeliveryRecord)) {
        if let Some(mut entry) = self.inner.arena.get_mut(key) {
            update(&mut entry.record);
        }
    }

    // ------------------------------------------------------------------
    // terminal outcomes
    // ------------------------------------------------------------------

    fn finalize(&self, job: Job, outcome: DeliveryOutcome) {
        self.inner.arena.remove(&job.key);

        if let DeliveryOutcome::DeadLettered { attempts, last_error } = &outcome {
            self.inner.dead_letters.insert(
                job.key.clone(),
                DeadLetter {
                    message: job.message.as_ref().clone(),
                    target: job.target.agent_id.clone(),
                    attempts: *attempts,
                    last_error: last_error.clone(),
                    dead_lettered_at: Utc::now(),
                },
            );
        }

        self.emit_outcome(&job.message, &job.target.agent_id, &outcome);

        if matches!(outcome, DeliveryOutcome::DeadLettered { .. }) {
            self.record_dead_letter();
        }

        let _ = job.outcome_tx.send(outcome);
    }

    fn emit_outcome(&self, message: &AgentMessage, target: &AgentId, outcome: &DeliveryOutcome) {
        let event = match outcome {
            DeliveryOutcome::Delivered { attempts } => {
                debug!(message_id = %message.id, target = %target, attempts, "Message delivered");
                CoordinationEvent::Delivered {
                    message_id: message.id,
                    message_type: message.message_type,
                    source: message.source.clone(),
                    target: target.clone(),
                    correlation_id: message.correlation_id.clone(),
                    attempts: *attempts,
                }
            }
            DeliveryOutcome::Expired { attempts } => {
                info!(message_id = %message.id, target = %target, attempts, "Message expired");
                CoordinationEvent::Expired {
                    message_id: message.id,
                    message_type: message.message_type,
                    source: message.source.clone(),
                    target: target.clone(),
                    correlation_id: message.correlation_id.clone(),
                    attempts: *attempts,
                }
            }
            DeliveryOutcome::DeadLettered { attempts, last_error } => {
                warn!(
                    message_id = %message.id,
                    target = %target,
                    attempts,
                    "Message dead-lettered: {}",
                    last_error
                );
                CoordinationEvent::DeliveryFailed {
                    message: Box::new(message.clone()),
                    target: target.clone(),
                    attempts: *attempts,
                    last_error: last_error.clone(),
                }
            }
            DeliveryOutcome::Cancelled { attempts } => {
                info!(message_id = %message.id, target = %target, attempts, "Delivery cancelled");
                CoordinationEvent::DeliveryCancelled {
                    message_id: message.id,
                    source: message.source.clone(),
                    target: target.clone(),
                    correlation_id: message.correlation_id.clone(),
                    attempts: *attempts,
                }
            }
        };

        metrics::counter!("quorum_deliveries_total", "outcome" => event.kind()).increment(1);
        self.inner.events.append(topics::DELIVERY, event);
    }

    /// Sustained dead-lettering alert, at most once per window
    fn record_dead_letter(&self) {
        let settings = &self.inner.settings;
        if settings.dead_letter_alert_threshold == 0 {
            return;
        }

        let now = Instant::now();
        let count = {
            let mut window = self.inner.alerts.lock();
            window.dead_letters.push_back(now);
            while window
                .dead_letters
                .front()
                .is_some_and(|t| now.duration_since(*t) > settings.dead_letter_alert_window)
            {
                window.dead_letters.pop_front();
            }

            let recently_alerted = window
                .last_alert
                .is_some_and(|t| now.duration_since(t) < settings.dead_letter_alert_window);
            if window.dead_letters.len() < settings.dead_letter_alert_threshold || recently_alerted {
                return;
            }
            window.last_alert = Some(now);
            window.dead_letters.len()
        };

        error!(
            dead_letters = count,
            window = ?settings.dead_letter_alert_window,
            "Sustained dead-lettering"
        );
        self.inner.events.append(
            topics::ALERTS,
            CoordinationEvent::AlertRaised {
                kind: AlertKind::SustainedDeadLettering,
                detail: format!(
                    "{} messages dead-lettered within {:?}",
                    count, settings.dead_letter_alert_window
                ),
            },
        );
    }
}

/// Resolves once a TTL with `remaining` left has elapsed; never without one.
async fn expiry(remaining: Option<Duration>) {
    match remaining {
        Some(remaining) => tokio::time::sleep(remaining).await,
        None => std::future::pending().await,
    }
}

/// Called by an idle lane worker. Removes the lane if it is still this
/// worker's and nothing was queued; otherwise hands back the job that
/// arrived in the meantime. `None` tells the worker to stop.
fn retire_lane(
    inner: &Inner,
    lane: &LaneKey,
    own: &mpsc::WeakUnboundedSender<Job>,
    rx: &mut mpsc::UnboundedReceiver<Job>,
) -> Option<Job> {
    let mut pending = None;
    let removed = inner.lanes.remove_if(lane, |_, sender| {
        if !own.upgrade().is_some_and(|own| sender.same_channel(&own)) {
            return false;
        }
        match rx.try_recv() {
            Ok(job) => {
                pending = Some(job);
                false
            }
            Err(_) => true,
        }
    });

    if removed.is_some() {
        debug!(source = %lane.0, target = %lane.1, "Delivery lane idle, releasing");
        return None;
    }
    // A job arrived in time, or this worker no longer owns the lane and
    // only drains what is already queued.
    pending.or_else(|| rx.try_recv().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::delivery::{Acknowledgement, TransportError};
    use crate::domain::message::MessageType;
    use crate::domain::topic::Topic;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` sends, then acknowledges.
    struct FlakyTransport {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl MessageTransport for FlakyTransport {
        async fn send(
            &self,
            target: &ResolvedTarget,
            message: &AgentMessage,
        ) -> Result<Acknowledgement, TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(TransportError::Io("connection reset".to_string()));
            }
            Ok(Acknowledgement {
                message_id: message.id,
                receiver: target.agent_id.clone(),
                duplicate: false,
            })
        }
    }

    /// Never acknowledges.
    struct StalledTransport;

    #[async_trait]
    impl MessageTransport for StalledTransport {
        async fn send(
            &self,
            _target: &ResolvedTarget,
            _message: &AgentMessage,
        ) -> Result<Acknowledgement, TransportError> {
            std::future::pending().await
        }
    }

    fn failing_manager(settings: DeliverySettings) -> (DeliveryManager, EventStore) {
        let events = EventStore::with_defaults();
        let transport = Arc::new(FlakyTransport {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        (DeliveryManager::new(transport, events.clone(), settings), events)
    }

    fn agent(name: &str) -> AgentId {
        AgentId::new(name).unwrap()
    }

    fn fast_settings(max_attempts: u32) -> DeliverySettings {
        DeliverySettings {
            default_retry: RetryPolicy::new(max_attempts, Duration::from_millis(5), 2.0),
            ack_timeout: Duration::from_millis(200),
            dead_letter_alert_threshold: 2,
            dead_letter_alert_window: Duration::from_secs(60),
            lane_idle_timeout: Duration::from_secs(60),
        }
    }

    fn manager(failures: u32, max_attempts: u32) -> (DeliveryManager, EventStore) {
        let events = EventStore::with_defaults();
        let transport = Arc::new(FlakyTransport {
            failures,
            calls: AtomicU32::new(0),
        });
        (
            DeliveryManager::new(transport, events.clone(), fast_settings(max_attempts)),
            events,
        )
    }

    fn message() -> Arc<AgentMessage> {
        Arc::new(AgentMessage::new(
            agent("red-agent"),
            agent("green-agent"),
            MessageType::TaskAssignment,
            json!({}),
        ))
    }

    fn target() -> ResolvedTarget {
        ResolvedTarget::direct(agent("green-agent"), 1)
    }

    #[tokio::test]
    async fn test_retries_then_delivers_once() {
        let (manager, events) = manager(2, 5);
        let ticket = manager.deliver(message(), target()).unwrap();

        assert_eq!(ticket.outcome().await, DeliveryOutcome::Delivered { attempts: 3 });
        assert!(manager.in_flight().is_empty());
        assert_eq!(events.head(&Topic::new(topics::DELIVERY)), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_dead_letters_and_alerts() {
        let (manager, events) = manager(u32::MAX, 2);

        for _ in 0..2 {
            let outcome = manager.deliver(message(), target()).unwrap().outcome().await;
            assert!(matches!(outcome, DeliveryOutcome::DeadLettered { attempts: 2, .. }));
        }
        assert_eq!(manager.dead_letters().len(), 2);
        assert_eq!(events.head(&Topic::new(topics::ALERTS)), 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_is_never_attempted() {
        let (manager, events) = manager(0, 5);
        let expired = Arc::new(message().as_ref().clone().with_ttl(Duration::ZERO));

        let outcome = manager.deliver(expired, target()).unwrap().outcome().await;
        assert_eq!(outcome, DeliveryOutcome::Expired { attempts: 0 });

        let record = events.read(&Topic::new(topics::DELIVERY), 0, 1).unwrap();
        assert_eq!(record[0].payload.kind(), "expired");
    }

    #[tokio::test]
    async fn test_cancel_aborts_retry_loop() {
        let events = EventStore::with_defaults();
        let transport = Arc::new(FlakyTransport {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let mut settings = fast_settings(10);
        settings.default_retry = RetryPolicy::new(10, Duration::from_secs(30), 2.0);
        let manager = DeliveryManager::new(transport, events, settings);

        let msg = message();
        let ticket = manager.deliver(msg.clone(), target()).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.in_flight().len(), 1);
        assert_eq!(manager.cancel(msg.id), 1);

        assert_eq!(ticket.outcome().await, DeliveryOutcome::Cancelled { attempts: 1 });
        assert!(manager.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_in_flight_delivery_rejected() {
        let events = EventStore::with_defaults();
        let transport = Arc::new(FlakyTransport {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let mut settings = fast_settings(10);
        settings.default_retry = RetryPolicy::new(10, Duration::from_secs(30), 2.0);
        let manager = DeliveryManager::new(transport, events, settings);

        let msg = message();
        let _ticket = manager.deliver(msg.clone(), target()).unwrap();
        assert!(matches!(
            manager.deliver(msg.clone(), target()),
            Err(DeliveryError::AlreadyInFlight(_))
        ));
        manager.cancel_all();
    }

    #[tokio::test]
    async fn test_replay_dead_letter_with_fresh_budget() {
        let (manager, _events) = manager(2, 2);
        let msg = message();

        let outcome = manager.deliver(msg.clone(), target()).unwrap().outcome().await;
        assert!(matches!(outcome, DeliveryOutcome::DeadLettered { .. }));

        let tickets = manager.replay_dead_letter(msg.id).unwrap();
        assert_eq!(tickets.len(), 1);
        for ticket in tickets {
            assert_eq!(ticket.outcome().await, DeliveryOutcome::Delivered { attempts: 1 });
        }
        assert!(manager.dead_letters().is_empty());
        assert_eq!(
            manager.replay_dead_letter(msg.id).err(),
            Some(DeliveryError::NotDeadLettered(msg.id))
        );
    }

    #[tokio::test]
    async fn test_overflowing_backoff_keeps_one_outcome() {
        let (manager, events) = failing_manager(fast_settings(5));
        let msg = Arc::new(
            message()
                .as_ref()
                .clone()
                .with_retry_policy(RetryPolicy::new(5, Duration::from_millis(1), 1e200)),
        );
        let ticket = manager.deliver(msg.clone(), target()).unwrap();

        let mut waiting = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waiting = manager
                .in_flight()
                .iter()
                .any(|r| r.attempts == 2 && matches!(r.state, DeliveryState::AwaitingRetry { .. }));
            if waiting {
                break;
            }
        }
        assert!(waiting, "retry loop did not survive a saturated backoff");

        assert_eq!(manager.cancel(msg.id), 1);
        assert_eq!(ticket.outcome().await, DeliveryOutcome::Cancelled { attempts: 2 });
        assert!(manager.in_flight().is_empty());
        assert_eq!(events.head(&Topic::new(topics::DELIVERY)), 1);
    }

    #[tokio::test]
    async fn test_ttl_elapsing_during_backoff_expires_without_waiting() {
        let mut settings = fast_settings(5);
        settings.default_retry = RetryPolicy::new(5, Duration::from_secs(3), 2.0);
        let (manager, events) = failing_manager(settings);
        let msg = Arc::new(message().as_ref().clone().with_ttl(Duration::from_millis(100)));

        let ticket = manager.deliver(msg, target()).unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(1), ticket.outcome())
            .await
            .expect("expiry waited for the full backoff");
        assert_eq!(outcome, DeliveryOutcome::Expired { attempts: 1 });
        assert!(manager.in_flight().is_empty());
        assert!(manager.dead_letters().is_empty());

        let record = events.read(&Topic::new(topics::DELIVERY), 0, 10).unwrap();
        assert_eq!(record.len(), 1);
        assert_eq!(record[0].payload.kind(), "expired");
    }

    #[tokio::test]
    async fn test_per_message_ack_timeout_overrides_configured() {
        let events = EventStore::with_defaults();
        let mut settings = fast_settings(1);
        settings.ack_timeout = Duration::from_secs(30);
        let manager = DeliveryManager::new(Arc::new(StalledTransport), events, settings);

        let msg = Arc::new(message().as_ref().clone().with_retry_policy(RetryPolicy {
            ack_timeout: Some(Duration::from_millis(20)),
            ..RetryPolicy::new(1, Duration::from_millis(5), 2.0)
        }));
        let outcome = tokio::time::timeout(
            Duration::from_secs(1),
            manager.deliver(msg, target()).unwrap().outcome(),
        )
        .await
        .unwrap();
        assert!(matches!(outcome, DeliveryOutcome::DeadLettered { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn test_idle_lanes_are_released() {
        let mut settings = fast_settings(1);
        settings.lane_idle_timeout = Duration::from_millis(30);
        let transport = Arc::new(FlakyTransport {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let manager = DeliveryManager::new(transport, EventStore::with_defaults(), settings);

        for name in ["green-agent", "blue-agent", "docs-agent"] {
            let ticket = manager
                .deliver(message(), ResolvedTarget::direct(agent(name), 3))
                .unwrap();
            assert_eq!(ticket.outcome().await, DeliveryOutcome::Delivered { attempts: 1 });
        }
        assert_eq!(manager.active_lanes(), 3);

        let mut lanes = usize::MAX;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            lanes = manager.active_lanes();
            if lanes == 0 {
                break;
            }
        }
        assert_eq!(lanes, 0);

        // a released pair gets a fresh lane
        let ticket = manager.deliver(message(), target()).unwrap();
        assert_eq!(ticket.outcome().await, DeliveryOutcome::Delivered { attempts: 1 });
    }

    #[tokio::test]
    async fn test_release_target_drops_its_lanes() {
        let (manager, _events) = manager(0, 1);
        for source in ["red-agent", "refactor-agent"] {
            let msg = Arc::new(AgentMessage::new(
                agent(source),
                agent("green-agent"),
                MessageType::StatusUpdate,
                json!({}),
            ));
            manager.deliver(msg, target()).unwrap().outcome().await;
        }
        manager
            .deliver(message(), ResolvedTarget::direct(agent("docs-agent"), 1))
            .unwrap()
            .outcome()
            .await;
        assert_eq!(manager.active_lanes(), 3);

        assert_eq!(manager.release_target(&agent("green-agent")), 2);
        assert_eq!(manager.active_lanes(), 1);
    }

    #[tokio::test]
    async fn test_refused_replay_keeps_dead_letter() {
        let (manager, _events) = failing_manager(fast_settings(1));
        let msg = message();

        let outcome = manager.deliver(msg.clone(), target()).unwrap().outcome().await;
        assert!(matches!(outcome, DeliveryOutcome::DeadLettered { .. }));

        // the same message is sent again and is still retrying
        let again = Arc::new(
            msg.as_ref()
                .clone()
                .with_retry_policy(RetryPolicy::new(10, Duration::from_secs(30), 2.0)),
        );
        let _ticket = manager.deliver(again, target()).unwrap();

        assert!(matches!(
            manager.replay_dead_letter(msg.id),
            Err(DeliveryError::AlreadyInFlight(_))
        ));
        assert_eq!(manager.dead_letters().len(), 1);
        manager.cancel_all();
    }
}
