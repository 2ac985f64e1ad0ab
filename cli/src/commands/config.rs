// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use quorum_core::domain::config::CoordinatorConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./quorum-config.yaml)
        #[arg(short, long, default_value = "./quorum-config.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = CoordinatorConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;
    let spec = &config.spec;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. QUORUM_CONFIG_PATH: {}",
            std::env::var("QUORUM_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./quorum-config.yaml");
        println!("  4. ~/.quorum/config.yaml");
        println!("  5. /etc/quorum/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Node Identity:".bold());
    println!("  ID: {}", spec.node.id);
    println!("  Coordinator agent: {}", spec.node.coordinator_agent_id);
    println!();

    println!("{}", "Delivery:".bold());
    println!(
        "  Retry: {} attempts, base {:?}, x{}",
        spec.delivery.retry.max_attempts, spec.delivery.retry.base_delay, spec.delivery.retry.multiplier
    );
    if let Some(cap) = spec.delivery.retry.max_delay {
        println!("  Max delay: {:?}", cap);
    }
    println!("  Ack timeout: {:?}", spec.delivery.ack_timeout);
    println!(
        "  Dead-letter alert: {} within {:?}",
        spec.delivery.dead_letter_alert_threshold, spec.delivery.dead_letter_alert_window
    );
    println!("  Lane idle timeout: {:?}", spec.delivery.lane_idle_timeout);
    println!();

    println!("{}", "Event Store:".bold());
    println!("  Max events per topic: {}", spec.event_store.max_events_per_topic);
    println!("  Max age: {:?}", spec.event_store.max_age);
    match &spec.event_store.journal_path {
        Some(path) => println!("  Journal: {}", path.display()),
        None => println!("  Journal: {}", "(disabled)".dimmed()),
    }
    println!();

    println!("{}", "Status Sync:".bold());
    match &spec.status.directory {
        Some(dir) => println!("  Directory: {}", dir.display()),
        None => println!("  Directory: {}", "(not watched)".dimmed()),
    }
    println!("  Debounce: {:?}", spec.status.debounce);
    println!();

    println!("{}", "Agents:".bold());
    if spec.agents.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for agent in &spec.agents {
        println!("  {}", agent.id.bold());
        if !agent.capabilities.is_empty() {
            println!("    Capabilities: {}", agent.capabilities.join(", "));
        }
        if !agent.interests.is_empty() {
            println!("    Interests: {}", agent.interests.join(", "));
        }
    }
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = CoordinatorConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let sample = if with_examples {
        include_str!("../../templates/config-with-examples.yaml")
    } else {
        include_str!("../../templates/config-minimal.yaml")
    };

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_are_valid() {
        for sample in [
            include_str!("../../templates/config-minimal.yaml"),
            include_str!("../../templates/config-with-examples.yaml"),
        ] {
            let config = CoordinatorConfigManifest::from_yaml_str(sample).unwrap();
            config.validate().unwrap();
            assert!(config.spec.agents.len() >= 3);
        }
    }

    #[tokio::test]
    async fn test_generate_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("quorum-config.yaml");

        generate(output.clone(), false).await.unwrap();

        let config = CoordinatorConfigManifest::from_yaml_file(&output).unwrap();
        assert_eq!(config.spec.node.id, "quorum-node-1");
    }
}
