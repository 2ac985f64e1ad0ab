// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Workflow command implementations
//!
//! # Commands
//!
//! - `quorum workflow validate <file>` - Parse and validate a workflow manifest
//! - `quorum workflow new-tdd <name>` - Write a red/green/refactor manifest

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use quorum_core::domain::agent::AgentId;
use quorum_core::domain::workflow::{WorkflowDefinition, WorkflowDefinitionId};
use quorum_core::infrastructure::workflow_parser::WorkflowParser;

#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// Validate a workflow manifest file
    Validate {
        /// Path to workflow manifest YAML file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Generate a red/green/refactor workflow manifest
    NewTdd {
        /// Workflow name (DNS label)
        #[arg(value_name = "NAME")]
        name: String,

        /// Feature the cycle works on
        #[arg(long)]
        feature: String,

        #[arg(long, default_value = "red-agent")]
        red: String,

        #[arg(long, default_value = "green-agent")]
        green: String,

        #[arg(long, default_value = "refactor-agent")]
        refactor: String,

        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

pub async fn handle_command(command: WorkflowCommand) -> Result<()> {
    match command {
        WorkflowCommand::Validate { file } => validate_workflow(file).await,
        WorkflowCommand::NewTdd {
            name,
            feature,
            red,
            green,
            refactor,
            output,
        } => new_tdd_workflow(name, feature, red, green, refactor, output).await,
    }
}

/// Validate a workflow manifest file
async fn validate_workflow(file: PathBuf) -> Result<()> {
    println!("{}", "Validating workflow manifest...".cyan());
    println!("   File: {}", file.display());
    println!();

    let workflow = WorkflowParser::parse_file(&file).context("Failed to parse workflow manifest")?;

    println!("{}", "✓ Workflow manifest is valid".green());
    println!();
    println!("   Name: {}", workflow.id.as_str().bold());
    if let Some(description) = &workflow.description {
        println!("   Description: {}", description);
    }
    println!("   Rollback on failure: {}", workflow.rollback_on_failure);
    println!("   Steps: {}", workflow.steps.len());
    for (index, step) in workflow.steps.iter().enumerate() {
        let phase = step
            .phase
            .map(|p| format!(" [{}]", p))
            .unwrap_or_default();
        let compensation = if step.compensation.is_some() {
            " (compensable)".dimmed().to_string()
        } else {
            String::new()
        };
        println!(
            "     {}. {}{} → {}{}",
            index + 1,
            step.name,
            phase,
            step.agent,
            compensation
        );
    }

    Ok(())
}

async fn new_tdd_workflow(
    name: String,
    feature: String,
    red: String,
    green: String,
    refactor: String,
    output: Option<PathBuf>,
) -> Result<()> {
    let definition = WorkflowDefinition::tdd_cycle(
        WorkflowDefinitionId::new(name).context("Invalid workflow name")?,
        &feature,
        AgentId::new(red).context("Invalid red agent id")?,
        AgentId::new(green).context("Invalid green agent id")?,
        AgentId::new(refactor).context("Invalid refactor agent id")?,
    )?
    .with_description(format!("Red/green/refactor cycle for {}", feature));

    let yaml = WorkflowParser::to_yaml(&definition)?;

    match output {
        Some(path) => {
            std::fs::write(&path, yaml)
                .with_context(|| format!("Failed to write workflow to {:?}", path))?;
            println!(
                "{}",
                format!("✓ Workflow generated: {}", path.display()).green()
            );
        }
        None => print!("{}", yaml),
    }

    Ok(())
}
