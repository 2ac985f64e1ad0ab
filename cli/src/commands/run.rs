// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Foreground coordinator
//!
//! `quorum run` builds a [`CoordinationHub`] over the in-process transport,
//! opens a mailbox for every configured agent and runs until Ctrl-C.
//! With `--stdin`, every line read from standard input is treated as a wire
//! message and submitted to the hub, which makes it easy to drive a local
//! fleet from a script.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use quorum_core::domain::config::CoordinatorConfigManifest;
use quorum_core::domain::topic::TopicPattern;
use quorum_core::domain::workflow::WorkflowDefinitionId;
use quorum_core::infrastructure::transport::{InMemoryTransport, Mailbox};
use quorum_core::{CoordinationHub, Submitted};

use super::events::format_record;

const MAILBOX_CAPACITY: usize = 256;

#[derive(Args)]
pub struct RunArgs {
    /// Read wire messages (one JSON document per line) from stdin
    #[arg(long)]
    pub stdin: bool,

    /// Print coordination events as they happen
    #[arg(long)]
    pub follow: bool,

    /// Topic pattern for --follow
    #[arg(long, default_value = "*", requires = "follow")]
    pub topic: String,

    /// Start a workflow definition once the hub is up
    #[arg(long, value_name = "WORKFLOW")]
    pub start: Option<String>,

    /// JSON input for --start
    #[arg(long, value_name = "JSON", requires = "start")]
    pub input: Option<String>,
}

pub async fn execute(args: RunArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = CoordinatorConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    let transport = Arc::new(InMemoryTransport::new(
        MAILBOX_CAPACITY,
        config.spec.delivery.dedup_window,
    ));
    let mailboxes: Vec<Mailbox> = config
        .spec
        .agents
        .iter()
        .map(|agent| agent.to_registration().map(|reg| transport.open_mailbox(reg.id)))
        .collect::<Result<_, _>>()?;

    let hub = Arc::new(CoordinationHub::new(config, transport.clone())?);
    hub.start().await?;

    let token = CancellationToken::new();
    let mut tasks: Vec<JoinHandle<()>> = mailboxes
        .into_iter()
        .map(|mailbox| spawn_mailbox_logger(mailbox, token.clone()))
        .collect();

    if args.follow {
        let pattern = TopicPattern::new(args.topic).context("Invalid topic pattern")?;
        tasks.push(spawn_follower(&hub, pattern, token.clone()));
    }

    if let Some(workflow) = args.start {
        let input = match args.input {
            Some(raw) => serde_json::from_str(&raw).context("--input is not valid JSON")?,
            None => serde_json::Value::Null,
        };
        let definition_id = WorkflowDefinitionId::new(workflow).context("Invalid workflow name")?;
        let instance_id = hub.coordinator().start(&definition_id, input).await?;
        println!(
            "{}",
            format!("✓ Workflow {} started: {}", definition_id, instance_id).green()
        );
    }

    if args.stdin {
        tasks.push(spawn_stdin_reader(hub.clone(), token.clone()));
    }

    println!("{}", "Coordinator running. Press Ctrl-C to stop.".cyan());
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Shutdown requested");
    token.cancel();
    join_all(tasks).await;
    hub.shutdown().await;
    println!("{}", "Coordinator stopped".green());

    Ok(())
}

fn spawn_mailbox_logger(mut mailbox: Mailbox, token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                received = mailbox.recv() => {
                    let Some(message) = received else { break };
                    info!(
                        agent = %mailbox.agent_id(),
                        message_id = %message.id,
                        source = %message.source,
                        message_type = %message.message_type,
                        "Message delivered to mailbox"
                    );
                }
            }
        }
    })
}

fn spawn_follower(hub: &CoordinationHub, pattern: TopicPattern, token: CancellationToken) -> JoinHandle<()> {
    let mut subscription = hub.events().subscribe_live(pattern);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                next = subscription.next() => match next {
                    Ok(record) => println!("{}", format_record(&record)),
                    Err(e) => {
                        warn!(error = %e, "Event follower stopped");
                        break;
                    }
                }
            }
        }
    })
}

fn spawn_stdin_reader(hub: Arc<CoordinationHub>, token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = tokio::select! {
                _ = token.cancelled() => break,
                line = lines.next_line() => line,
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            match hub.ingest_wire(&line).await {
                Ok(Submitted::Dispatched(dispatched)) => info!(
                    message_id = %dispatched.message_id,
                    targets = dispatched.targets.len(),
                    "Message dispatched"
                ),
                Ok(Submitted::Resolved) => info!("Response resolved a pending request"),
                Ok(Submitted::Coordinator { settled }) => info!(settled, "Message handled by coordinator"),
                Err(e) => warn!(error = %e, "Rejected message from stdin"),
            }
        }
    })
}
