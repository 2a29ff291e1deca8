//! Compose bridge
//!
//! Detects compose-managed stacks and delegates their teardown to the stack
//! manager's own `down` command, run once per reconciliation pass.

use crate::classifier::has_compose_project;
use crate::engine::ContainerInspector;
use crate::models::ContainerSnapshot;
use async_trait::async_trait;
use serde::Serialize;
use std::process::Stdio;
use std::sync::Arc;
use tracing::{info, warn};

/// External command plus the environment it runs with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// Runs an external command to completion and reports its exit code
/// (`None` when it was terminated by a signal).
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &TeardownCommand) -> std::io::Result<Option<i32>>;
}

/// Runs commands with tokio, inheriting stdout and stderr
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioCommandRunner;

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, command: &TeardownCommand) -> std::io::Result<Option<i32>> {
        let status = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await?;
        Ok(status.code())
    }
}

/// Result of one delegated teardown
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ComposeOutcome {
    Succeeded,
    Failed { exit_code: Option<i32> },
    SpawnFailed { error: String },
}

impl ComposeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ComposeOutcome::Succeeded)
    }
}

/// Compose bridge configuration
#[derive(Debug, Clone)]
pub struct ComposeConfig {
    /// Program followed by its arguments
    pub command: Vec<String>,
    /// Environment variable the job id is exported in
    pub job_id_env: String,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            command: vec!["docker-compose".to_string(), "down".to_string()],
            job_id_env: "CI_JOB_ID".to_string(),
        }
    }
}

/// True if any container in the listing belongs to a compose project
pub fn is_externally_managed(containers: &[ContainerSnapshot]) -> bool {
    containers.iter().any(|c| has_compose_project(&c.labels))
}

/// List containers and check whether compose manages any of them.
///
/// A listing failure is logged and reported as not managed.
pub async fn is_docker_compose_up<I>(inspector: &I) -> bool
where
    I: ContainerInspector + ?Sized,
{
    match inspector.list_containers().await {
        Ok(containers) => is_externally_managed(&containers),
        Err(e) => {
            warn!(error = %e, "Failed to list containers");
            false
        }
    }
}

pub struct ComposeBridge {
    runner: Arc<dyn CommandRunner>,
    config: ComposeConfig,
}

impl ComposeBridge {
    pub fn new(runner: Arc<dyn CommandRunner>, config: ComposeConfig) -> Self {
        Self { runner, config }
    }

    pub fn production(config: ComposeConfig) -> Self {
        Self::new(Arc::new(TokioCommandRunner), config)
    }

    /// The command that tears down the stack for `job_id`
    pub fn teardown_command(&self, job_id: &str) -> Option<TeardownCommand> {
        let (program, args) = self.config.command.split_first()?;
        Some(TeardownCommand {
            program: program.clone(),
            args: args.to_vec(),
            env: vec![(self.config.job_id_env.clone(), job_id.to_string())],
        })
    }

    /// Run the stack teardown once. Failures are logged and returned, never
    /// propagated.
    pub async fn tear_down(&self, job_id: &str) -> ComposeOutcome {
        let Some(command) = self.teardown_command(job_id) else {
            warn!("Compose teardown command is empty, skipping");
            return ComposeOutcome::SpawnFailed {
                error: "empty teardown command".to_string(),
            };
        };

        info!(
            job_id = %job_id,
            command = %self.config.command.join(" "),
            "Compose is managing containers, running teardown"
        );

        match self.runner.run(&command).await {
            Ok(Some(0)) => ComposeOutcome::Succeeded,
            Ok(exit_code) => {
                warn!(job_id = %job_id, exit_code = ?exit_code, "Compose teardown failed");
                ComposeOutcome::Failed { exit_code }
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Failed to run compose teardown");
                ComposeOutcome::SpawnFailed {
                    error: e.to_string(),
                }
            }
        }
    }
}
