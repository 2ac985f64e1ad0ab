// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// Status File Watcher - Polling Producer of Normalized Snapshot Changes
//
// Polls a directory of `<agent-id>.md` documents and fingerprints each file
// by (modified time, length). A file whose fingerprint changes is reported
// once it has been stable for the debounce window, so a burst of writes
// produces a single change. Debouncing happens here, at the producer, so
// consumers never see intermediate states.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::agent::AgentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Modified,
    Removed,
}

/// One logical change of one agent's status document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotChange {
    pub agent_id: AgentId,
    pub path: PathBuf,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    modified: Option<SystemTime>,
    len: u64,
}

struct PendingChange {
    fingerprint: Option<Fingerprint>,
    since: Instant,
}

pub struct FilePollingWatcher {
    directory: PathBuf,
    poll_interval: Duration,
    debounce: Duration,
    /// Fingerprints already reported downstream
    reported: HashMap<PathBuf, Fingerprint>,
    pending: HashMap<PathBuf, PendingChange>,
}

impl FilePollingWatcher {
    pub fn new(directory: impl Into<PathBuf>, poll_interval: Duration, debounce: Duration) -> Self {
        Self {
            directory: directory.into(),
            poll_interval,
            debounce,
            reported: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// Agent id a status file belongs to, from its file stem
    pub fn agent_for_path(path: &Path) -> Option<AgentId> {
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        AgentId::new(stem).ok()
    }

    /// Start polling; changes are sent to `changes` until cancelled or the
    /// receiver is dropped. Every file present at startup is reported once
    /// after the first debounce window.
    pub fn start(
        mut self,
        changes: mpsc::Sender<SnapshotChange>,
        shutdown_token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                directory = %self.directory.display(),
                poll_interval = ?self.poll_interval,
                debounce = ?self.debounce,
                "Starting status file watcher"
            );

            let mut tick = tokio::time::interval(self.poll_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        for change in self.poll(Instant::now()) {
                            if changes.send(change).await.is_err() {
                                debug!("Change receiver dropped, stopping status file watcher");
                                return;
                            }
                        }
                    }
                    _ = shutdown_token.cancelled() => {
                        info!("Shutdown signal received, stopping status file watcher");
                        return;
                    }
                }
            }
        })
    }

    /// One polling pass: returns the changes whose debounce window elapsed.
    pub fn poll(&mut self, now: Instant) -> Vec<SnapshotChange> {
        let current = match self.scan() {
            Ok(current) => current,
            Err(e) => {
                warn!(directory = %self.directory.display(), "Failed to scan status directory: {}", e);
                return Vec::new();
            }
        };

        // Record fingerprint movements; any movement restarts the window.
        let mut observed: Vec<(PathBuf, Option<Fingerprint>)> = current
            .iter()
            .map(|(path, fp)| (path.clone(), Some(*fp)))
            .collect();
        observed.extend(
            self.reported
                .keys()
                .filter(|path| !current.contains_key(*path))
                .map(|path| (path.clone(), None)),
        );

        for (path, fingerprint) in observed {
            let already_reported = self.reported.get(&path).copied();
            if already_reported == fingerprint {
                self.pending.remove(&path);
                continue;
            }
            match self.pending.get_mut(&path) {
                Some(pending) if pending.fingerprint == fingerprint => {}
                Some(pending) => {
                    pending.fingerprint = fingerprint;
                    pending.since = now;
                }
                None => {
                    self.pending.insert(path, PendingChange { fingerprint, since: now });
                }
            }
        }

        // Files that vanished before ever being reported need no removal.
        self.pending
            .retain(|path, p| p.fingerprint.is_some() || self.reported.contains_key(path));

        let ready: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.since) >= self.debounce)
            .map(|(path, _)| path.clone())
            .collect();

        let mut changes = Vec::new();
        for path in ready {
            let Some(pending) = self.pending.remove(&path) else {
                continue;
            };
            let kind = match pending.fingerprint {
                Some(fp) => {
                    self.reported.insert(path.clone(), fp);
                    ChangeKind::Modified
                }
                None => {
                    self.reported.remove(&path);
                    ChangeKind::Removed
                }
            };
            if let Some(agent_id) = Self::agent_for_path(&path) {
                changes.push(SnapshotChange { agent_id, path, kind });
            }
        }
        changes
    }

    fn scan(&self) -> std::io::Result<HashMap<PathBuf, Fingerprint>> {
        let mut files = HashMap::new();
        for entry in std::fs::read_dir(&self.directory)? {
            let entry = entry?;
            let path = entry.path();
            if Self::agent_for_path(&path).is_none() {
                continue;
            }
            // A file removed between read_dir and metadata is simply absent.
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            files.insert(
                path,
                Fingerprint {
                    modified: metadata.modified().ok(),
                    len: metadata.len(),
                },
            );
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_for_path() {
        assert_eq!(
            FilePollingWatcher::agent_for_path(Path::new("/tmp/status/red-agent.md")),
            Some(AgentId::new("red-agent").unwrap())
        );
        assert_eq!(FilePollingWatcher::agent_for_path(Path::new("/tmp/notes.txt")), None);
        assert_eq!(FilePollingWatcher::agent_for_path(Path::new("/tmp/broadcast.md")), None);
    }

    #[test]
    fn test_burst_of_writes_is_reported_once_after_debounce() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("red-agent.md");
        let debounce = Duration::from_millis(100);
        let mut watcher = FilePollingWatcher::new(dir.path(), Duration::from_millis(10), debounce);
        let start = Instant::now();

        std::fs::write(&path, "a").unwrap();
        assert!(watcher.poll(start).is_empty());
        std::fs::write(&path, "ab").unwrap();
        assert!(watcher.poll(start + Duration::from_millis(50)).is_empty());

        // window restarted at +50ms by the second write
        assert!(watcher.poll(start + Duration::from_millis(120)).is_empty());
        let changes = watcher.poll(start + Duration::from_millis(160));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Modified);

        assert!(watcher.poll(start + Duration::from_millis(400)).is_empty());
    }

    #[test]
    fn test_removal_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("green-agent.md");
        let mut watcher = FilePollingWatcher::new(dir.path(), Duration::from_millis(10), Duration::ZERO);
        let now = Instant::now();

        std::fs::write(&path, "x").unwrap();
        assert_eq!(watcher.poll(now).len(), 1);

        std::fs::remove_file(&path).unwrap();
        let changes = watcher.poll(now);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Removed);
    }
}
