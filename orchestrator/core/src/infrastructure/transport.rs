// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// In-Memory Transport - Per-agent Mailboxes with Duplicate Suppression
//
// Each agent that opens a mailbox gets a bounded queue. The transport is the
// receiving half of at-least-once delivery: it remembers the most recent
// message ids per mailbox (LRU window) and acknowledges a repeated id
// without enqueueing it again, so a retry after a lost acknowledgment never
// reaches the agent twice.

use async_trait::async_trait;
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::agent::AgentId;
use crate::domain::delivery::{Acknowledgement, MessageTransport, ResolvedTarget, TransportError};
use crate::domain::message::{AgentMessage, MessageId};

const DEFAULT_MAILBOX_CAPACITY: usize = 256;
const DEFAULT_DEDUP_WINDOW: usize = 1024;

struct MailboxSlot {
    sender: mpsc::Sender<AgentMessage>,
    seen: Mutex<LruCache<MessageId, ()>>,
}

/// Receiving end handed to an agent
pub struct Mailbox {
    agent_id: AgentId,
    receiver: mpsc::Receiver<AgentMessage>,
}

impl Mailbox {
    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    pub async fn recv(&mut self) -> Option<AgentMessage> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<AgentMessage> {
        self.receiver.try_recv().ok()
    }
}

pub struct InMemoryTransport {
    mailboxes: DashMap<AgentId, Arc<MailboxSlot>>,
    capacity: usize,
    dedup_window: NonZeroUsize,
}

impl InMemoryTransport {
    pub fn new(capacity: usize, dedup_window: usize) -> Self {
        Self {
            mailboxes: DashMap::new(),
            capacity: capacity.max(1),
            dedup_window: NonZeroUsize::new(dedup_window).unwrap_or(NonZeroUsize::MIN),
        }
    }

    /// Open (or reopen) the mailbox of `agent_id`. Reopening replaces the
    /// previous queue and forgets its duplicate window.
    pub fn open_mailbox(&self, agent_id: AgentId) -> Mailbox {
        let (sender, receiver) = mpsc::channel(self.capacity);
        self.mailboxes.insert(
            agent_id.clone(),
            Arc::new(MailboxSlot {
                sender,
                seen: Mutex::new(LruCache::new(self.dedup_window)),
            }),
        );
        debug!(agent_id = %agent_id, "Opened mailbox");
        Mailbox { agent_id, receiver }
    }

    pub fn close_mailbox(&self, agent_id: &AgentId) {
        self.mailboxes.remove(agent_id);
    }

    pub fn has_mailbox(&self, agent_id: &AgentId) -> bool {
        self.mailboxes.contains_key(agent_id)
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new(DEFAULT_MAILBOX_CAPACITY, DEFAULT_DEDUP_WINDOW)
    }
}

#[async_trait]
impl MessageTransport for InMemoryTransport {
    async fn send(
        &self,
        target: &ResolvedTarget,
        message: &AgentMessage,
    ) -> Result<Acknowledgement, TransportError> {
        let slot = self
            .mailboxes
            .get(&target.agent_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::Unreachable(target.agent_id.clone()))?;

        let ack = |duplicate| Acknowledgement {
            message_id: message.id,
            receiver: target.agent_id.clone(),
            duplicate,
        };

        if slot.seen.lock().contains(&message.id) {
            debug!(message_id = %message.id, agent_id = %target.agent_id, "Suppressed duplicate message");
            return Ok(ack(true));
        }

        match slot.sender.try_send(message.clone()) {
            Ok(()) => {
                slot.seen.lock().put(message.id, ());
                Ok(ack(false))
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(TransportError::Io(format!(
                "mailbox of {} is full",
                target.agent_id
            ))),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.mailboxes
                    .remove_if(&target.agent_id, |_, current| Arc::ptr_eq(current, &slot));
                Err(TransportError::Unreachable(target.agent_id.clone()))
            }
        }
    }
}
