// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Event journal commands
//!
//! `quorum events tail --journal <file>` replays a JSONL journal written by
//! `quorum run`, filtered by topic pattern and starting offset.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use quorum_core::domain::events::EventRecord;
use quorum_core::domain::topic::TopicPattern;
use quorum_core::infrastructure::event_journal::{filter_records, load_journal};

#[derive(Subcommand)]
pub enum EventsCommand {
    /// Print journaled events
    Tail {
        /// Journal file (JSON lines)
        #[arg(long, value_name = "FILE")]
        journal: PathBuf,

        /// Topic pattern, `*` wildcard
        #[arg(long, default_value = "*")]
        topic: String,

        /// First offset to print in each topic
        #[arg(long, default_value_t = 0)]
        from: u64,

        /// Print raw JSON records
        #[arg(long)]
        json: bool,
    },
}

pub async fn handle_command(command: EventsCommand) -> Result<()> {
    match command {
        EventsCommand::Tail {
            journal,
            topic,
            from,
            json,
        } => tail(journal, topic, from, json).await,
    }
}

async fn tail(journal: PathBuf, topic: String, from: u64, json: bool) -> Result<()> {
    let pattern = TopicPattern::new(topic).context("Invalid topic pattern")?;
    let records = load_journal(&journal).await?;
    let records = filter_records(records, &pattern, from);

    for record in &records {
        if json {
            println!("{}", serde_json::to_string(record)?);
        } else {
            println!("{}", format_record(record));
        }
    }

    if !json {
        eprintln!("{}", format!("{} event(s)", records.len()).dimmed());
    }
    Ok(())
}

pub fn format_record(record: &EventRecord) -> String {
    let payload = serde_json::to_value(&record.payload)
        .ok()
        .and_then(|mut value| {
            value.as_object_mut().map(|fields| {
                fields.remove("type");
                serde_json::Value::Object(fields.clone()).to_string()
            })
        })
        .unwrap_or_default();

    format!(
        "{} {}#{} {} {}",
        record.timestamp.format("%H:%M:%S%.3f").to_string().dimmed(),
        record.topic.as_str().cyan(),
        record.offset,
        record.payload.kind().bold(),
        payload
    )
}
