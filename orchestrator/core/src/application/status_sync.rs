// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Status Synchronizer
//!
//! Keeps the coordinator's read-only copy of every agent's status document.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Turn normalized file changes into cached snapshots and
//!   `StatusChanged` events
//!
//! The watcher debounces; this service only parses, compares and publishes.
//! The cache is a `DashMap` of `Arc<StatusSnapshot>`, so readers clone an
//! `Arc` under a shard lock and never wait on file I/O.

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::agent::AgentId;
use crate::domain::config::StatusConfig;
use crate::domain::events::{CoordinationEvent, EventRecord};
use crate::domain::status::StatusSnapshot;
use crate::domain::topic::topics;
use crate::infrastructure::event_store::{EventHandler, EventStore};
use crate::infrastructure::status_parser::StatusParser;
use crate::infrastructure::status_watcher::{ChangeKind, FilePollingWatcher, SnapshotChange};

struct Inner {
    cache: DashMap<AgentId, Arc<StatusSnapshot>>,
    parser: StatusParser,
    events: EventStore,
}

#[derive(Clone)]
pub struct StatusSynchronizer {
    inner: Arc<Inner>,
}

impl StatusSynchronizer {
    pub fn new(events: EventStore, log_limit: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache: DashMap::new(),
                parser: StatusParser::new(log_limit),
                events,
            }),
        }
    }

    pub fn from_config(events: EventStore, config: &StatusConfig) -> Self {
        Self::new(events, config.log_limit)
    }

    pub fn get(&self, agent_id: &AgentId) -> Option<Arc<StatusSnapshot>> {
        self.inner.cache.get(agent_id).map(|entry| entry.value().clone())
    }

    /// Every cached snapshot, ordered by agent id
    pub fn all(&self) -> Vec<Arc<StatusSnapshot>> {
        let mut snapshots: Vec<_> = self
            .inner
            .cache
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        snapshots.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        snapshots
    }

    /// Agents whose last snapshot says they are idle
    pub fn available_agents(&self) -> Vec<AgentId> {
        self.all()
            .into_iter()
            .filter(|snapshot| snapshot.is_available())
            .map(|snapshot| snapshot.agent_id.clone())
            .collect()
    }

    /// Ingest one document body. `None` means the document is missing or
    /// unreadable and yields an `unknown` snapshot; a parse failure yields an
    /// `error` snapshot carrying the parser message. Returns the new snapshot
    /// when it differs from the cached one.
    pub fn ingest_raw(&self, agent_id: AgentId, raw: Option<&str>) -> Option<Arc<StatusSnapshot>> {
        let snapshot = match raw {
            None => StatusSnapshot::unknown(agent_id.clone()),
            Some(raw) => match self.inner.parser.parse(&agent_id, raw) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(agent_id = %agent_id, "Status document failed to parse: {}", e);
                    StatusSnapshot::parse_failure(agent_id.clone(), e.to_string())
                }
            },
        };

        let previous = self.get(&agent_id);
        if previous.as_ref().is_some_and(|p| p.same_content(&snapshot)) {
            debug!(agent_id = %agent_id, "Status document unchanged");
            return None;
        }

        let snapshot = Arc::new(snapshot);
        self.inner.cache.insert(agent_id.clone(), snapshot.clone());

        debug!(
            agent_id = %agent_id,
            state = %snapshot.state,
            previous = ?previous.as_ref().map(|p| p.state),
            "Agent status changed"
        );
        metrics::counter!("quorum_status_changes_total", "state" => snapshot.state.to_string()).increment(1);
        self.inner.events.append(
            topics::STATUS,
            CoordinationEvent::StatusChanged {
                agent_id,
                previous: previous.map(|p| p.state),
                current: snapshot.state,
                current_task: snapshot.current_task.clone(),
                parse_error: snapshot.parse_error.clone(),
            },
        );
        Some(snapshot)
    }

    /// Re-read the document a change points at.
    pub async fn apply_change(&self, change: &SnapshotChange) -> Option<Arc<StatusSnapshot>> {
        let raw = match change.kind {
            ChangeKind::Removed => None,
            ChangeKind::Modified => match tokio::fs::read_to_string(&change.path).await {
                Ok(raw) => Some(raw),
                Err(e) => {
                    warn!(
                        agent_id = %change.agent_id,
                        path = %change.path.display(),
                        "Failed to read status document: {}",
                        e
                    );
                    None
                }
            },
        };
        self.ingest_raw(change.agent_id.clone(), raw.as_deref())
    }

    /// Consume changes until the channel closes or shutdown.
    pub fn run(
        &self,
        mut changes: mpsc::Receiver<SnapshotChange>,
        shutdown_token: CancellationToken,
    ) -> JoinHandle<()> {
        let sync = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    change = changes.recv() => match change {
                        Some(change) => {
                            sync.apply_change(&change).await;
                        }
                        None => break,
                    },
                    _ = shutdown_token.cancelled() => break,
                }
            }
            info!("Status synchronizer stopped");
        })
    }

    /// Watch `directory` and keep the cache current until shutdown.
    pub fn watch_directory(
        &self,
        directory: impl Into<PathBuf>,
        poll_interval: Duration,
        debounce: Duration,
        shutdown_token: CancellationToken,
    ) -> JoinHandle<()> {
        let (tx, rx) = mpsc::channel(256);
        FilePollingWatcher::new(directory, poll_interval, debounce).start(tx, shutdown_token.clone());
        self.run(rx, shutdown_token)
    }

    pub fn evict(&self, agent_id: &AgentId) -> bool {
        self.inner.cache.remove(agent_id).is_some()
    }
}

/// Subscribed to the `agents` topic: forget deregistered agents.
#[async_trait]
impl EventHandler for StatusSynchronizer {
    async fn handle(&self, record: &EventRecord) -> anyhow::Result<()> {
        if let CoordinationEvent::AgentDeregistered { agent_id, .. } = &record.payload {
            if self.evict(agent_id) {
                info!(agent_id = %agent_id, "Evicted status of deregistered agent");
            }
        }
        Ok(())
    }
}
