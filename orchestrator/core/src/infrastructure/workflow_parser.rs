// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Workflow YAML Parser
//!
//! This module provides infrastructure for parsing workflow YAML manifests
//! into domain objects.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Parse external YAML → Domain objects
//! - **Anti-Corruption:** Translates YAML schema to domain model
//!
//! # Manifest Format
//!
//! ```yaml
//! apiVersion: quorum.dev/v1
//! kind: Workflow
//! metadata:
//!   name: tokenizer-tdd
//!   description: Red/green/refactor for the tokenizer
//! spec:
//!   rollback_on_failure: true
//!   steps:
//!     - name: write-failing-test
//!       agent: red-agent
//!       phase: red
//!       timeout: 10m
//!       task: { goal: "write a failing test" }
//!       compensation: { undo: "remove the test" }
//!     - name: make-test-pass
//!       agent: green-agent
//!       phase: green
//!       task: { goal: "make it pass" }
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::domain::agent::AgentId;
use crate::domain::phase::TddPhase;
use crate::domain::workflow::{WorkflowDefinition, WorkflowDefinitionId, WorkflowStep};

pub const WORKFLOW_API_VERSION: &str = "quorum.dev/v1";
pub const WORKFLOW_KIND: &str = "Workflow";

// ============================================================================
// YAML Schema (External Representation)
// ============================================================================

/// External YAML representation of a workflow manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowManifest {
    pub api_version: String,
    pub kind: String,
    pub metadata: WorkflowMetadataYaml,
    pub spec: WorkflowSpecYaml,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMetadataYaml {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpecYaml {
    #[serde(default)]
    pub rollback_on_failure: bool,
    pub steps: Vec<WorkflowStepYaml>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStepYaml {
    pub name: String,
    pub agent: String,
    #[serde(default)]
    pub task: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation: Option<serde_json::Value>,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<std::time::Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<TddPhase>,
}

// ============================================================================
// Parser
// ============================================================================

/// Workflow parser (Infrastructure service)
pub struct WorkflowParser;

impl WorkflowParser {
    /// Parse a workflow manifest from YAML file
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<WorkflowDefinition, WorkflowParseError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| WorkflowParseError::IoError {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;

        Self::parse_yaml(&content)
    }

    /// Parse a workflow manifest from YAML string
    pub fn parse_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowParseError> {
        let manifest: WorkflowManifest =
            serde_yaml::from_str(yaml).map_err(|e| WorkflowParseError::YamlError(e.to_string()))?;

        Self::validate_and_convert(manifest)
    }

    /// Parse every `*.yaml`/`*.yml` manifest in `dir`. Files that fail to parse
    /// are logged and skipped.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Vec<WorkflowDefinition>, WorkflowParseError> {
        let dir = dir.as_ref();
        let entries = fs::read_dir(dir).map_err(|e| WorkflowParseError::IoError {
            path: dir.display().to_string(),
            error: e.to_string(),
        })?;

        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
            })
            .collect();
        paths.sort();

        let mut definitions = Vec::new();
        for path in paths {
            match Self::parse_file(&path) {
                Ok(definition) => {
                    info!(workflow = %definition.id, path = %path.display(), "Loaded workflow definition");
                    definitions.push(definition);
                }
                Err(e) => warn!(path = %path.display(), "Skipping invalid workflow manifest: {}", e),
            }
        }
        Ok(definitions)
    }

    /// Validate manifest and convert to domain object
    fn validate_and_convert(manifest: WorkflowManifest) -> Result<WorkflowDefinition, WorkflowParseError> {
        if manifest.api_version != WORKFLOW_API_VERSION {
            return Err(WorkflowParseError::InvalidApiVersion {
                expected: WORKFLOW_API_VERSION.to_string(),
                got: manifest.api_version,
            });
        }

        if manifest.kind != WORKFLOW_KIND {
            return Err(WorkflowParseError::InvalidKind {
                expected: WORKFLOW_KIND.to_string(),
                got: manifest.kind,
            });
        }

        let id = WorkflowDefinitionId::new(manifest.metadata.name).map_err(|e| {
            WorkflowParseError::ValidationError(format!("Invalid workflow name: {}", e))
        })?;

        let steps = manifest
            .spec
            .steps
            .into_iter()
            .map(Self::convert_step)
            .collect::<Result<Vec<_>, _>>()?;

        let mut definition = WorkflowDefinition::new(id, steps, manifest.spec.rollback_on_failure)
            .map_err(|e| WorkflowParseError::ValidationError(e.to_string()))?;
        definition.description = manifest.metadata.description;
        Ok(definition)
    }

    fn convert_step(yaml: WorkflowStepYaml) -> Result<WorkflowStep, WorkflowParseError> {
        let agent = AgentId::new(yaml.agent).map_err(|e| {
            WorkflowParseError::ValidationError(format!("Invalid agent in step '{}': {}", yaml.name, e))
        })?;

        Ok(WorkflowStep {
            name: yaml.name,
            agent,
            task: yaml.task,
            compensation: yaml.compensation,
            timeout: yaml.timeout,
            phase: yaml.phase,
        })
    }

    /// Serialize a workflow definition back to a YAML manifest
    pub fn to_yaml(definition: &WorkflowDefinition) -> Result<String, WorkflowParseError> {
        let manifest = WorkflowManifest {
            api_version: WORKFLOW_API_VERSION.to_string(),
            kind: WORKFLOW_KIND.to_string(),
            metadata: WorkflowMetadataYaml {
                name: definition.id.to_string(),
                description: definition.description.clone(),
            },
            spec: WorkflowSpecYaml {
                rollback_on_failure: definition.rollback_on_failure,
                steps: definition
                    .steps
                    .iter()
                    .map(|step| WorkflowStepYaml {
                        name: step.name.clone(),
                        agent: step.agent.to_string(),
                        task: step.task.clone(),
                        compensation: step.compensation.clone(),
                        timeout: step.timeout,
                        phase: step.phase,
                    })
                    .collect(),
            },
        };

        serde_yaml::to_string(&manifest).map_err(|e| WorkflowParseError::YamlError(e.to_string()))
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum WorkflowParseError {
    #[error("IO error reading {path}: {error}")]
    IoError { path: String, error: String },

    #[error("YAML parse error: {0}")]
    YamlError(String),

    #[error("Invalid API version: expected '{expected}', got '{got}'")]
    InvalidApiVersion { expected: String, got: String },

    #[error("Invalid kind: expected '{expected}', got '{got}'")]
    InvalidKind { expected: String, got: String },

    #[error("Validation error: {0}")]
    ValidationError(String),
}
