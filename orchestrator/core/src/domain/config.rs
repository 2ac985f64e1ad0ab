// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Coordinator Configuration Types
//
// Defines the configuration schema for a quorum coordinator node:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Delivery retry, acknowledgment and dead-letter alert settings
// - Event store retention and journal
// - Status snapshot watching
// - Workflow definitions and step timeouts
// - Initial agent registrations
// - Logging

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::domain::agent::{AgentId, AgentRegistration};
use crate::domain::message::RetryPolicy;
use crate::domain::topic::TopicPattern;

pub const CONFIG_API_VERSION: &str = "quorum.dev/v1";
pub const CONFIG_KIND: &str = "CoordinatorConfig";

/// Top-level Kubernetes-style coordinator configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfigManifest {
    /// API version (must be "quorum.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "CoordinatorConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: CoordinatorConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

/// Coordinator configuration specification (content under spec:)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatorConfigSpec {
    #[serde(default)]
    pub node: NodeIdentity,

    #[serde(default)]
    pub delivery: DeliveryConfig,

    #[serde(default)]
    pub event_store: EventStoreConfig,

    #[serde(default)]
    pub status: StatusConfig,

    #[serde(default)]
    pub workflows: WorkflowsConfig,

    /// Agents registered at startup
    #[serde(default)]
    pub agents: Vec<AgentConfig>,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Stable coordinator identifier, recorded as `emitted_by` on events
    pub id: String,

    /// Agent id the workflow coordinator sends and receives messages as
    #[serde(default = "default_coordinator_agent_id")]
    pub coordinator_agent_id: String,
}

impl Default for NodeIdentity {
    fn default() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            coordinator_agent_id: default_coordinator_agent_id(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay", with = "humantime_serde")]
    pub base_delay: Duration,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub max_delay: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            multiplier: default_multiplier(),
            max_delay: None,
        }
    }
}

impl RetryConfig {
    /// Policy applied to messages that carry none of their own
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
            multiplier: self.multiplier,
            max_delay: self.max_delay,
            ack_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-attempt acknowledgment timeout
    #[serde(default = "default_ack_timeout", with = "humantime_serde")]
    pub ack_timeout: Duration,

    /// Message ids remembered per mailbox for duplicate suppression
    #[serde(default = "default_dedup_window")]
    pub dedup_window: usize,

    /// Dead-letters within `dead_letter_alert_window` that raise an alert
    #[serde(default = "default_dead_letter_alert_threshold")]
    pub dead_letter_alert_threshold: usize,

    #[serde(default = "default_dead_letter_alert_window", with = "humantime_serde")]
    pub dead_letter_alert_window: Duration,

    /// A source/target lane with no traffic for this long releases its worker
    #[serde(default = "default_lane_idle_timeout", with = "humantime_serde")]
    pub lane_idle_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            ack_timeout: default_ack_timeout(),
            dedup_window: default_dedup_window(),
            dead_letter_alert_threshold: default_dead_letter_alert_threshold(),
            dead_letter_alert_window: default_dead_letter_alert_window(),
            lane_idle_timeout: default_lane_idle_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventStoreConfig {
    /// Retained events per topic; older events are pruned on append
    #[serde(default = "default_max_events_per_topic")]
    pub max_events_per_topic: usize,

    #[serde(default = "default_max_age", with = "humantime_serde")]
    pub max_age: Duration,

    #[serde(default = "default_prune_interval", with = "humantime_serde")]
    pub prune_interval: Duration,

    /// JSONL file every appended event is written to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal_path: Option<PathBuf>,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            max_events_per_topic: default_max_events_per_topic(),
            max_age: default_max_age(),
            prune_interval: default_prune_interval(),
            journal_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Directory holding one `<agent-id>.md` snapshot per agent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,

    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    #[serde(default = "default_debounce", with = "humantime_serde")]
    pub debounce: Duration,

    /// Communication log entries kept per snapshot
    #[serde(default = "default_log_limit")]
    pub log_limit: usize,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            directory: None,
            poll_interval: default_poll_interval(),
            debounce: default_debounce(),
            log_limit: default_log_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowsConfig {
    /// Directory of `kind: Workflow` manifests loaded at startup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,

    #[serde(default = "default_step_timeout", with = "humantime_serde")]
    pub default_step_timeout: Duration,
}

impl Default for WorkflowsConfig {
    fn default() -> Self {
        Self {
            directory: None,
            default_step_timeout: default_step_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,

    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Message type patterns for topic routing, e.g. `TASK_*`
    #[serde(default)]
    pub interests: Vec<String>,
}

impl AgentConfig {
    pub fn to_registration(&self) -> Result<AgentRegistration, ConfigError> {
        let id = AgentId::new(self.id.clone())
            .map_err(|e| ConfigError::Invalid(format!("agent '{}': {}", self.id, e)))?;
        let interests = self
            .interests
            .iter()
            .map(|p| TopicPattern::new(p.clone()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ConfigError::Invalid(format!("agent '{}': {}", self.id, e)))?;
        Ok(AgentRegistration::new(id, self.capabilities.clone()).with_interests(interests))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Text,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("{0}")]
    Invalid(String),
}

// Default value functions
fn default_coordinator_agent_id() -> String {
    "workflow-coordinator".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_ack_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_lane_idle_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_dedup_window() -> usize {
    1024
}

fn default_dead_letter_alert_threshold() -> usize {
    10
}

fn default_dead_letter_alert_window() -> Duration {
    Duration::from_secs(60)
}

fn default_max_events_per_topic() -> usize {
    10_000
}

fn default_max_age() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_prune_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(50)
}

fn default_debounce() -> Duration {
    Duration::from_millis(100)
}

fn default_log_limit() -> usize {
    10
}

fn default_step_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CoordinatorConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "quorum-coordinator".to_string());

        Self {
            api_version: CONFIG_API_VERSION.to_string(),
            kind: CONFIG_KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: CoordinatorConfigSpec::default(),
        }
    }
}

impl CoordinatorConfigManifest {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Discover configuration file using precedence order
    /// 1. QUORUM_CONFIG_PATH environment variable
    /// 2. ./quorum-config.yaml (working directory)
    /// 3. ~/.quorum/config.yaml (user home)
    /// 4. /etc/quorum/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("QUORUM_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./quorum-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".quorum").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/quorum/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path fails if missing or invalid
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("QUORUM_STATUS_DIR") {
            tracing::info!("Environment override: QUORUM_STATUS_DIR={}", dir);
            self.spec.status.directory = Some(PathBuf::from(dir));
        }

        if let Ok(level) = std::env::var("QUORUM_LOG_LEVEL") {
            tracing::info!("Environment override: QUORUM_LOG_LEVEL={}", level);
            self.spec.observability.logging.level = level;
        }

        if let Ok(path) = std::env::var("QUORUM_JOURNAL_PATH") {
            tracing::info!("Environment override: QUORUM_JOURNAL_PATH={}", path);
            self.spec.event_store.journal_path = Some(PathBuf::from(path));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.api_version != CONFIG_API_VERSION {
            return invalid(format!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version, CONFIG_API_VERSION
            ));
        }

        if self.kind != CONFIG_KIND {
            return invalid(format!("Invalid kind: '{}'. Must be '{}'", self.kind, CONFIG_KIND));
        }

        if self.metadata.name.is_empty() {
            return invalid("metadata.name cannot be empty".to_string());
        }

        if self.spec.node.id.is_empty() {
            return invalid("spec.node.id cannot be empty".to_string());
        }

        if let Err(e) = AgentId::new(self.spec.node.coordinator_agent_id.clone()) {
            return invalid(format!("spec.node.coordinator_agent_id: {}", e));
        }

        if let Err(e) = self.spec.delivery.retry.to_policy().check() {
            return invalid(format!("spec.delivery.retry: {}", e));
        }
        if self.spec.delivery.ack_timeout.is_zero() {
            return invalid("spec.delivery.ack_timeout must be non-zero".to_string());
        }
        if self.spec.delivery.lane_idle_timeout.is_zero() {
            return invalid("spec.delivery.lane_idle_timeout must be non-zero".to_string());
        }

        if self.spec.event_store.max_events_per_topic == 0 {
            return invalid("spec.event_store.max_events_per_topic must be at least 1".to_string());
        }
        if self.spec.event_store.max_age.is_zero() {
            return invalid("spec.event_store.max_age must be non-zero".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for agent in &self.spec.agents {
            agent.to_registration()?;
            if !seen.insert(agent.id.as_str()) {
                return invalid(format!("Duplicate agent id in spec.agents: {}", agent.id));
            }
        }

        Ok(())
    }

    pub fn coordinator_agent_id(&self) -> Result<AgentId, ConfigError> {
        AgentId::new(self.spec.node.coordinator_agent_id.clone())
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = CoordinatorConfigManifest::default();
        assert_eq!(manifest.api_version, "quorum.dev/v1");
        assert_eq!(manifest.kind, "CoordinatorConfig");
        assert!(!manifest.metadata.name.is_empty());
        assert_eq!(manifest.spec.delivery.retry.max_attempts, 5);
        assert_eq!(manifest.spec.status.debounce, Duration::from_millis(100));
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_parse_with_humantime_durations() {
        let yaml = r#"
apiVersion: quorum.dev/v1
kind: CoordinatorConfig
metadata:
  name: test-coordinator
spec:
  node:
    id: node-1
  delivery:
    retry:
      max_attempts: 3
      base_delay: 250ms
      multiplier: 1.5
    ack_timeout: 2s
  event_store:
    max_events_per_topic: 500
    max_age: 1h
  agents:
    - id: red-agent
      capabilities: [testing]
      interests: ["TASK_*"]
"#;
        let manifest = CoordinatorConfigManifest::from_yaml_str(yaml).unwrap();
        assert_eq!(manifest.spec.node.coordinator_agent_id, "workflow-coordinator");
        assert_eq!(manifest.spec.delivery.retry.base_delay, Duration::from_millis(250));
        assert_eq!(manifest.spec.delivery.ack_timeout, Duration::from_secs(2));
        assert_eq!(manifest.spec.event_store.max_age, Duration::from_secs(3600));

        let registration = manifest.spec.agents[0].to_registration().unwrap();
        assert!(registration.is_interested_in("TASK_ASSIGNMENT"));
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut manifest = CoordinatorConfigManifest::default();

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = CONFIG_API_VERSION.to_string();

        manifest.kind = "NodeConfig".to_string();
        assert!(manifest.validate().is_err());
        manifest.kind = CONFIG_KIND.to_string();

        manifest.spec.delivery.retry.max_attempts = 0;
        assert!(manifest.validate().is_err());
        manifest.spec.delivery.retry.max_attempts = 5;

        manifest.spec.delivery.retry.multiplier = 1e200;
        assert!(manifest.validate().is_err());
        manifest.spec.delivery.retry.multiplier = 2.0;

        manifest.spec.delivery.lane_idle_timeout = Duration::ZERO;
        assert!(manifest.validate().is_err());
        manifest.spec.delivery.lane_idle_timeout = Duration::from_secs(60);

        manifest.spec.agents.push(AgentConfig {
            id: "broadcast".to_string(),
            capabilities: vec![],
            interests: vec![],
        });
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quorum-config.yaml");

        let mut manifest = CoordinatorConfigManifest::default();
        manifest.spec.status.directory = Some(dir.path().join("status"));
        manifest.to_yaml_file(&path).unwrap();

        let parsed = CoordinatorConfigManifest::from_yaml_file(&path).unwrap();
        assert_eq!(parsed.spec.status.directory, manifest.spec.status.directory);
        assert_eq!(parsed.spec.event_store.max_age, manifest.spec.event_store.max_age);
    }
}
