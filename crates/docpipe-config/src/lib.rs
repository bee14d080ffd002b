//! Configuration file support for docpipe (`docpipe.toml`).

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use docpipe_retry::{PerErrorConfig, RetryPolicy, RetryStrategyType};
use docpipe_webhook::WebhookConfig;
use serde::{Deserialize, Serialize};

fn default_max_attempts() -> u32 {
    6
}

fn default_base_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(120)
}

fn default_jitter() -> f64 {
    0.5
}

/// Retry tuning shared by the relay and the consumer workers, overridable
/// per `ErrorClass` via `per_error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub policy: RetryPolicy,
    pub max_attempts: u32,
    #[serde(with = "docpipe_types::duration")]
    pub base_delay: Duration,
    #[serde(with = "docpipe_types::duration")]
    pub max_delay: Duration,
    pub strategy: RetryStrategyType,
    pub jitter: f64,
    pub per_error: PerErrorConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::Default,
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            strategy: RetryStrategyType::Exponential,
            jitter: default_jitter(),
            per_error: PerErrorConfig::default(),
        }
    }
}

fn default_database_max_connections() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/docpipe".to_string(),
            max_connections: default_database_max_connections(),
        }
    }
}

fn default_bootstrap_servers() -> String {
    "localhost:9092".to_string()
}

fn default_consumer_group() -> String {
    "docpipe-workers".to_string()
}

fn default_dlq_topic() -> String {
    "docpipe.dlq".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLogConfig {
    pub bootstrap_servers: String,
    pub consumer_group: String,
    pub dlq_topic: String,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: default_bootstrap_servers(),
            consumer_group: default_consumer_group(),
            dlq_topic: default_dlq_topic(),
        }
    }
}

fn default_relay_poll_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_relay_batch_size() -> i64 {
    100
}

fn default_relay_max_attempts() -> u32 {
    10
}

fn default_relay_retention_hours() -> i64 {
    24
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    #[serde(with = "docpipe_types::duration")]
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub max_attempts: u32,
    pub retention_hours: i64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_relay_poll_interval(),
            batch_size: default_relay_batch_size(),
            max_attempts: default_relay_max_attempts(),
            retention_hours: default_relay_retention_hours(),
        }
    }
}

fn default_worker_count() -> usize {
    4
}

fn default_step_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_shutdown_drain_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_dlq_after_attempts() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub count: usize,
    #[serde(with = "docpipe_types::duration")]
    pub step_timeout: Duration,
    #[serde(with = "docpipe_types::duration")]
    pub shutdown_drain_timeout: Duration,
    pub dlq_after_attempts: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            step_timeout: default_step_timeout(),
            shutdown_drain_timeout: default_shutdown_drain_timeout(),
            dlq_after_attempts: default_dlq_after_attempts(),
        }
    }
}

fn default_draft_statuses() -> Vec<String> {
    vec![
        "draft".to_string(),
        "in-progress".to_string(),
        "wip".to_string(),
    ]
}

/// Routing configuration for the draft/published index split. The routing
/// list is a heuristic by its nature, so it's configurable rather than
/// hardcoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesetRoutingConfig {
    pub draft_statuses: Vec<String>,
    pub ruleset_path: String,
}

impl Default for RulesetRoutingConfig {
    fn default() -> Self {
        Self {
            draft_statuses: default_draft_statuses(),
            ruleset_path: "rulesets.toml".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MigrationConfig {
    pub max_attempts_override: Option<u32>,
}

/// Top-level docpipe configuration, loaded from `docpipe.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DocpipeConfig {
    pub database: DatabaseConfig,
    pub event_log: EventLogConfig,
    pub relay: RelayConfig,
    pub worker: WorkerConfig,
    pub ruleset: RulesetRoutingConfig,
    pub retry: RetryConfig,
    pub migration: MigrationConfig,
    pub webhook: WebhookConfig,
}

impl DocpipeConfig {
    /// Load configuration from a workspace root by looking for
    /// `docpipe.toml`. Returns `Ok(None)` if no config file exists, so a
    /// caller can fall back to defaults.
    pub fn load_from_workspace(workspace_root: &Path) -> Result<Option<Self>> {
        let config_path = workspace_root.join("docpipe.toml");
        if !config_path.exists() {
            return Ok(None);
        }
        Self::load_from_file(&config_path).map(Some)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: DocpipeConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = DocpipeConfig::default();
        assert_eq!(config.relay.max_attempts, 10);
        assert_eq!(config.worker.dlq_after_attempts, 5);
        assert_eq!(
            config.ruleset.draft_statuses,
            vec!["draft", "in-progress", "wip"]
        );
        assert!(!config.webhook.enabled);
    }

    #[test]
    fn parses_partial_toml_with_defaults_filled_in() {
        let toml = r#"
            [relay]
            batch_size = 50

            [worker]
            count = 8
        "#;
        let config: DocpipeConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.relay.batch_size, 50);
        assert_eq!(config.relay.max_attempts, 10);
        assert_eq!(config.worker.count, 8);
    }
}
