// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Status document commands
//!
//! `quorum status inspect <file>` parses one agent status document the way
//! the synchronizer would and prints the resulting snapshot.

use anyhow::{anyhow, Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use quorum_core::domain::agent::AgentId;
use quorum_core::domain::status::{Direction, StatusSnapshot};
use quorum_core::infrastructure::status_parser::StatusParser;
use quorum_core::infrastructure::status_watcher::FilePollingWatcher;

#[derive(Subcommand)]
pub enum StatusCommand {
    /// Parse a status document and print the snapshot
    Inspect {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Agent id (default: file stem)
        #[arg(long)]
        agent: Option<String>,

        /// Communication log entries to keep
        #[arg(long, default_value_t = 10)]
        log_limit: usize,

        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },
}

pub async fn handle_command(command: StatusCommand) -> Result<()> {
    match command {
        StatusCommand::Inspect {
            file,
            agent,
            log_limit,
            json,
        } => inspect(file, agent, log_limit, json).await,
    }
}

async fn inspect(file: PathBuf, agent: Option<String>, log_limit: usize, json: bool) -> Result<()> {
    let agent_id = match agent {
        Some(agent) => AgentId::new(agent).context("Invalid agent id")?,
        None => FilePollingWatcher::agent_for_path(&file)
            .ok_or_else(|| anyhow!("Cannot derive an agent id from {:?}; pass --agent", file))?,
    };

    let raw = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read {:?}", file))?;

    let snapshot = StatusParser::new(log_limit)
        .parse(&agent_id, &raw)
        .with_context(|| format!("Status document {:?} is invalid", file))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_snapshot(&snapshot);
    }
    Ok(())
}

fn print_snapshot(snapshot: &StatusSnapshot) {
    println!("{} {}", "Agent:".bold(), snapshot.agent_id);
    if let Some(agent_type) = &snapshot.agent_type {
        println!("  Type: {}", agent_type);
    }
    println!("  State: {}", snapshot.state.to_string().bold());
    if let Some(updated) = snapshot.last_updated {
        println!("  Last updated: {}", updated.to_rfc3339());
    }
    if let Some(task) = &snapshot.current_task {
        println!("  Task: {}", task);
    }
    if let Some(progress) = snapshot.progress {
        println!("  Progress: {}%", progress);
    }

    let list = |label: &str, items: &[String]| {
        if !items.is_empty() {
            println!("  {}: {}", label, items.join(", "));
        }
    };
    list("Dependencies", &snapshot.dependencies);
    list("Waiting for", &snapshot.waiting_for);
    list("Available for", &snapshot.available_for);
    list("Next actions", &snapshot.next_actions);

    if !snapshot.recent_messages.is_empty() {
        println!("  {}", "Communication log:".bold());
        for entry in &snapshot.recent_messages {
            let arrow = match entry.direction {
                Direction::Inbound => "←",
                Direction::Outbound => "→",
            };
            println!(
                "    {} {} {}: {}",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                arrow,
                entry.peer,
                entry.summary
            );
        }
    }
}
