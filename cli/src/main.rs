// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Quorum CLI
//!
//! The `quorum` binary runs the coordination core in the foreground and
//! offers offline tooling around its artifacts.
//!
//! ## Commands
//!
//! - `quorum run` - Run the coordinator until Ctrl-C
//! - `quorum config show|validate|generate` - Configuration management
//! - `quorum workflow validate|new-tdd` - Workflow manifests
//! - `quorum status inspect <file>` - Parse one agent status document
//! - `quorum events tail --journal <file>` - Replay a persisted event journal

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use quorum_cli::commands::{self, ConfigCommand, EventsCommand, RunArgs, StatusCommand, WorkflowCommand};
use quorum_core::domain::config::{CoordinatorConfigManifest, LogFormat, LoggingConfig};

/// Quorum - coordination substrate for agent fleets
#[derive(Parser)]
#[command(name = "quorum")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "QUORUM_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to the
    /// configured level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator in the foreground
    #[command(name = "run")]
    Run(RunArgs),

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Workflow manifests
    #[command(name = "workflow")]
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommand,
    },

    /// Agent status documents
    #[command(name = "status")]
    Status {
        #[command(subcommand)]
        command: StatusCommand,
    },

    /// Event journal replay
    #[command(name = "events")]
    Events {
        #[command(subcommand)]
        command: EventsCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before clap reads env-backed arguments
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let mut logging = CoordinatorConfigManifest::load_or_default(cli.config.clone())
        .map(|config| config.spec.observability.logging)
        .unwrap_or_default();
    if let Some(level) = cli.log_level {
        logging.level = level;
    }
    init_logging(&logging)?;

    match cli.command {
        Commands::Run(args) => commands::run::execute(args, cli.config).await,
        Commands::Config { command } => commands::config::handle_command(command, cli.config).await,
        Commands::Workflow { command } => commands::workflow::handle_command(command).await,
        Commands::Status { command } => commands::status::handle_command(command).await,
        Commands::Events { command } => commands::events::handle_command(command).await,
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&logging.level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.compact().init(),
    }

    Ok(())
}
