//! Reaper configuration
//!
//! The JSON pattern file is required and supplies `jobPattern`. Every other
//! field has a default and can be overridden with a `REAPER_*` environment
//! variable, e.g. `REAPER_MAX_RETRIES=5`.

use anyhow::{Context, Result};
use reaper_lib::classifier::{HeuristicConfig, GITHUB_JOB_ID_LABEL, GITLAB_JOB_ID_LABEL};
use reaper_lib::compose::ComposeConfig;
use reaper_lib::reconciler::ReconcilerConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Reaper configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ReaperConfig {
    /// Regexes matched against container names, leading '/' included
    #[serde(rename = "jobPattern", alias = "jobpattern", alias = "job_pattern")]
    pub job_patterns: Vec<String>,

    /// Name reported in structured logs
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Labels whose value is the CI job id, checked in order
    #[serde(default = "default_job_id_labels")]
    pub job_id_labels: Vec<String>,

    /// Treat compose labels and compose-style names as job resources
    #[serde(default = "default_true")]
    pub compose_markers: bool,

    /// Attribute resources created within this many seconds; unset disables
    #[serde(default)]
    pub recency_window_secs: Option<u64>,

    #[serde(default = "default_pre_cleanup_delay")]
    pub pre_cleanup_delay_ms: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// Compose teardown command line, split on whitespace
    #[serde(default = "default_compose_command")]
    pub compose_command: String,

    /// Environment variable that carries the job id to the teardown
    #[serde(default = "default_job_id_env")]
    pub job_id_env: String,

    #[serde(default = "default_max_concurrent_cleanups")]
    pub max_concurrent_cleanups: usize,

    /// API server port for health/metrics; 0 disables the server
    #[serde(default)]
    pub api_port: u16,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

fn default_job_id_labels() -> Vec<String> {
    vec![
        GITHUB_JOB_ID_LABEL.to_string(),
        GITLAB_JOB_ID_LABEL.to_string(),
    ]
}

fn default_true() -> bool {
    true
}

fn default_pre_cleanup_delay() -> u64 {
    2000
}

fn default_poll_interval() -> u64 {
    2000
}

fn default_max_retries() -> u32 {
    3
}

fn default_stop_timeout() -> u64 {
    10
}

fn default_compose_command() -> String {
    "docker-compose down".to_string()
}

fn default_job_id_env() -> String {
    "CI_JOB_ID".to_string()
}

fn default_max_concurrent_cleanups() -> usize {
    1
}

impl ReaperConfig {
    /// Load the pattern file at `path`, layered with the process environment
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Load with an explicit environment map in place of the process
    /// environment
    pub fn load_with_env(path: &Path, env: Option<HashMap<String, String>>) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Json)
                    .required(true),
            )
            .add_source(
                config::Environment::with_prefix("REAPER")
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: Self = config
            .try_deserialize()
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.compose_command.split_whitespace().next().is_none() {
            anyhow::bail!("compose_command must not be empty");
        }
        if self.max_concurrent_cleanups == 0 {
            anyhow::bail!("max_concurrent_cleanups must be at least 1");
        }
        Ok(())
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            pre_cleanup_delay: Duration::from_millis(self.pre_cleanup_delay_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_retries: self.max_retries,
            stop_timeout: Duration::from_secs(self.stop_timeout_secs),
        }
    }

    pub fn heuristic_config(&self) -> HeuristicConfig {
        HeuristicConfig {
            job_id_labels: self.job_id_labels.clone(),
            compose_markers: self.compose_markers,
            recency_window: self.recency_window_secs.map(Duration::from_secs),
        }
    }

    pub fn compose_config(&self) -> ComposeConfig {
        ComposeConfig {
            command: self
                .compose_command
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            job_id_env: self.job_id_env.clone(),
        }
    }
}
