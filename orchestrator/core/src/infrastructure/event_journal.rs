// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// Event Journal - JSONL Persistence of Appended Events
//
// The journal is an ordinary event-store subscriber: every record is written
// as one JSON line. Reading a journal back yields the records in file order,
// which is append order, for offline replay and inspection.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::events::EventRecord;
use crate::domain::topic::TopicPattern;
use crate::infrastructure::event_store::EventHandler;

pub struct JournalWriter {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl JournalWriter {
    /// Open `path` for appending, creating parent directories as needed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create journal directory {:?}", parent))?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open journal {:?}", path))?;

        info!(path = %path.display(), "Event journal opened");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventHandler for JournalWriter {
    async fn handle(&self, record: &EventRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record).context("Failed to encode event record")?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line)
            .await
            .with_context(|| format!("Failed to write journal {:?}", self.path))?;
        file.flush().await?;
        Ok(())
    }

    async fn resynchronize(&self) -> Result<()> {
        warn!(path = %self.path.display(), "Journal fell behind retention; events were skipped");
        Ok(())
    }
}

/// Read every record of a journal. Blank lines are skipped; a malformed line
/// fails the whole read with its line number.
pub async fn load_journal(path: impl AsRef<Path>) -> Result<Vec<EventRecord>> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read journal {:?}", path))?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("Malformed journal entry at {:?}:{}", path, index + 1))
        })
        .collect()
}

/// Records of topics matching `pattern` with offset >= `from`, in journal order
pub fn filter_records(records: Vec<EventRecord>, pattern: &TopicPattern, from: u64) -> Vec<EventRecord> {
    records
        .into_iter()
        .filter(|r| pattern.matches(r.topic.as_str()) && r.offset >= from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::{AlertKind, CoordinationEvent};
    use crate::infrastructure::event_store::EventStore;
    use crate::domain::topic::Topic;

    #[tokio::test]
    async fn test_journal_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal").join("events.jsonl");
        let writer = JournalWriter::open(&path).await.unwrap();

        let store = EventStore::with_defaults();
        for topic in ["alerts", "status", "alerts"] {
            store.append(
                topic,
                CoordinationEvent::AlertRaised {
                    kind: AlertKind::RoutingTableEmpty,
                    detail: topic.to_string(),
                },
            );
        }
        let mut sub = store.subscribe(TopicPattern::any(), 0).unwrap();
        for _ in 0..3 {
            let record = sub.next().await.unwrap();
            writer.handle(&record).await.unwrap();
        }

        let records = load_journal(&path).await.unwrap();
        assert_eq!(records.len(), 3);

        let alerts = filter_records(records, &TopicPattern::new("alerts").unwrap(), 1);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].topic, Topic::new("alerts"));
        assert_eq!(alerts[0].offset, 1);
    }

    #[test]
    fn test_malformed_line_reports_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        std::fs::write(&path, "\n{not json}\n").unwrap();

        let err = tokio_test::block_on(load_journal(&path)).unwrap_err();
        assert!(format!("{:#}", err).contains(":2"));
    }
}
