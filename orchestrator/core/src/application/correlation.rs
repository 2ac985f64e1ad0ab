// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Correlation Tracker - matches responses to outstanding requests
//!
//! One pending waiter per correlation id. Whoever removes the waiter from the
//! pending map owns its outcome: `resolve`, `cancel`, `fail` and the waiter's
//! own timeout all race for that removal, so exactly one outcome is ever
//! delivered per correlation id.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::domain::delivery::DeliveryOutcome;
use crate::domain::message::{AgentMessage, CorrelationId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorrelationError {
    /// No response within the caller's window; the request may still arrive
    #[error("no response for correlation id {correlation_id} within {after:?}")]
    Timeout {
        correlation_id: CorrelationId,
        after: Duration,
    },

    #[error("wait for correlation id {0} was cancelled")]
    Cancelled(CorrelationId),

    #[error("correlation id {0} already has an outstanding request")]
    DuplicateCorrelation(CorrelationId),

    /// The request itself terminally failed delivery
    #[error("request {correlation_id} was not delivered: {outcome}")]
    Undeliverable {
        correlation_id: CorrelationId,
        outcome: DeliveryOutcome,
    },
}

type WaiterResult = Result<AgentMessage, CorrelationError>;

struct PendingWaiter {
    token: u64,
    registered_at: DateTime<Utc>,
    response_tx: oneshot::Sender<WaiterResult>,
}

type PendingMap = Arc<Mutex<HashMap<CorrelationId, PendingWaiter>>>;

/// Outstanding request info for inspection
#[derive(Debug, Clone)]
pub struct PendingCorrelation {
    pub correlation_id: CorrelationId,
    pub registered_at: DateTime<Utc>,
}

#[derive(Clone, Default)]
pub struct CorrelationTracker {
    pending: PendingMap,
    next_token: Arc<AtomicU64>,
}

impl CorrelationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `correlation_id` before the request is sent, so
    /// a fast response cannot slip past.
    pub fn expect(&self, correlation_id: CorrelationId) -> Result<ResponseWaiter, CorrelationError> {
        let (tx, rx) = oneshot::channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        {
            let mut pending = self.pending.lock();
            if pending.contains_key(&correlation_id) {
                return Err(CorrelationError::DuplicateCorrelation(correlation_id));
            }
            pending.insert(
                correlation_id.clone(),
                PendingWaiter {
                    token,
                    registered_at: Utc::now(),
                    response_tx: tx,
                },
            );
        }

        debug!(correlation_id = %correlation_id, "Awaiting correlated response");
        Ok(ResponseWaiter {
            correlation_id,
            token,
            response_rx: Some(rx),
            pending: self.pending.clone(),
        })
    }

    /// `expect` followed by `wait`
    pub async fn await_response(
        &self,
        correlation_id: CorrelationId,
        timeout: Duration,
    ) -> Result<AgentMessage, CorrelationError> {
        self.expect(correlation_id)?.wait(timeout).await
    }

    /// Deliver `response` to the waiter of `correlation_id`. Returns false
    /// (and logs) when nobody is waiting: a late or duplicate response.
    pub fn resolve(&self, correlation_id: &CorrelationId, response: AgentMessage) -> bool {
        match self.take(correlation_id) {
            Some(waiter) => {
                debug!(
                    correlation_id = %correlation_id,
                    message_id = %response.id,
                    "Resolved correlated response"
                );
                let _ = waiter.response_tx.send(Ok(response));
                true
            }
            None => {
                info!(
                    correlation_id = %correlation_id,
                    message_id = %response.id,
                    "No waiter for response (late or duplicate), ignoring"
                );
                false
            }
        }
    }

    /// Cancel a wait independent of its timeout
    pub fn cancel(&self, correlation_id: &CorrelationId) -> bool {
        self.finish(correlation_id, CorrelationError::Cancelled(correlation_id.clone()))
    }

    /// Fail a wait because its request could not be delivered
    pub fn fail(&self, correlation_id: &CorrelationId, outcome: DeliveryOutcome) -> bool {
        self.finish(
            correlation_id,
            CorrelationError::Undeliverable {
                correlation_id: correlation_id.clone(),
                outcome,
            },
        )
    }

    pub fn is_pending(&self, correlation_id: &CorrelationId) -> bool {
        self.pending.lock().contains_key(correlation_id)
    }

    pub fn list_pending(&self) -> Vec<PendingCorrelation> {
        self.pending
            .lock()
            .iter()
            .map(|(id, waiter)| PendingCorrelation {
                correlation_id: id.clone(),
                registered_at: waiter.registered_at,
            })
            .collect()
    }

    fn finish(&self, correlation_id: &CorrelationId, error: CorrelationError) -> bool {
        match self.take(correlation_id) {
            Some(waiter) => {
                warn!(correlation_id = %correlation_id, "Correlated wait ended: {}", error);
                let _ = waiter.response_tx.send(Err(error));
                true
            }
            None => false,
        }
    }

    fn take(&self, correlation_id: &CorrelationId) -> Option<PendingWaiter> {
        self.pending.lock().remove(correlation_id)
    }
}

/// Handle returned by [`CorrelationTracker::expect`]. Dropping it withdraws
/// the wait.
pub struct ResponseWaiter {
    correlation_id: CorrelationId,
    token: u64,
    response_rx: Option<oneshot::Receiver<WaiterResult>>,
    pending: PendingMap,
}

impl ResponseWaiter {
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Wait up to `timeout` for the outcome.
    pub async fn wait(mut self, timeout: Duration) -> Result<AgentMessage, CorrelationError> {
        let Some(mut rx) = self.response_rx.take() else {
            return Err(CorrelationError::Cancelled(self.correlation_id.clone()));
        };

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CorrelationError::Cancelled(self.correlation_id.clone())),
            Err(_) => {
                if self.withdraw() {
                    warn!(correlation_id = %self.correlation_id, ?timeout, "Correlated response timed out");
                    return Err(CorrelationError::Timeout {
                        correlation_id: self.correlation_id.clone(),
                        after: timeout,
                    });
                }
                // Someone removed the waiter between the timer firing and
                // our removal; their outcome is already in the channel.
                match rx.try_recv() {
                    Ok(result) => result,
                    Err(_) => Err(CorrelationError::Cancelled(self.correlation_id.clone())),
                }
            }
        }
    }

    /// Remove our own entry; false if it was already taken.
    fn withdraw(&self) -> bool {
        let mut pending = self.pending.lock();
        match pending.get(&self.correlation_id) {
            Some(waiter) if waiter.token == self.token => {
                pending.remove(&self.correlation_id);
                true
            }
            _ => false,
        }
    }
}

impl Drop for ResponseWaiter {
    fn drop(&mut self) {
        self.withdraw();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::AgentId;
    use crate::domain::message::MessageType;
    use serde_json::json;

    fn response(cid: &CorrelationId) -> AgentMessage {
        AgentMessage::new(
            AgentId::new("green-agent").unwrap(),
            AgentId::new("red-agent").unwrap(),
            MessageType::CoordinationResponse,
            json!({"ok": true}),
        )
        .with_correlation_id(cid.clone())
    }

    #[tokio::test]
    async fn test_resolve_delivers_exactly_once() {
        let tracker = CorrelationTracker::new();
        let cid = CorrelationId::new("req-1");
        let waiter = tracker.expect(cid.clone()).unwrap();

        assert!(tracker.resolve(&cid, response(&cid)));
        assert!(!tracker.resolve(&cid, response(&cid)));

        let received = waiter.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(received.correlation_id, Some(cid.clone()));
        assert!(!tracker.is_pending(&cid));
    }

    #[tokio::test]
    async fn test_timeout_removes_waiter() {
        let tracker = CorrelationTracker::new();
        let cid = CorrelationId::new("req-2");

        let err = tracker
            .await_response(cid.clone(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, CorrelationError::Timeout { .. }));

        // late response is a no-op
        assert!(!tracker.resolve(&cid, response(&cid)));
    }

    #[tokio::test]
    async fn test_duplicate_outstanding_correlation_rejected() {
        let tracker = CorrelationTracker::new();
        let cid = CorrelationId::new("req-3");
        let _waiter = tracker.expect(cid.clone()).unwrap();
        assert_eq!(
            tracker.expect(cid.clone()).err(),
            Some(CorrelationError::DuplicateCorrelation(cid))
        );
    }

    #[tokio::test]
    async fn test_cancel_and_drop() {
        let tracker = CorrelationTracker::new();
        let cid = CorrelationId::new("req-4");
        let waiter = tracker.expect(cid.clone()).unwrap();
        assert!(tracker.cancel(&cid));
        assert_eq!(
            waiter.wait(Duration::from_secs(1)).await.unwrap_err(),
            CorrelationError::Cancelled(cid.clone())
        );

        let waiter = tracker.expect(cid.clone()).unwrap();
        drop(waiter);
        assert!(!tracker.is_pending(&cid));
    }
}
