//! Command-line interface

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Removes the containers, networks, volumes and services a CI job leaves behind
#[derive(Debug, Parser)]
#[command(name = "job-reaper")]
#[command(author, version, about = "Reaps leftover CI job containers", long_about = None)]
pub struct Cli {
    /// Path to the JSON pattern file (can also be set via REAPER_CONFIG env var)
    #[arg(long, short, global = true, env = "REAPER_CONFIG", default_value = "jobPattern.json")]
    pub config: PathBuf,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Clone, Subcommand, PartialEq, Eq)]
pub enum Commands {
    /// Watch container events and clean up after finished jobs (default)
    Watch,

    /// Run a single cleanup pass for a job and print its summary
    Sweep {
        /// Job ID to clean up after
        #[arg(long)]
        job_id: String,
    },

    /// Test a container name against the configured job patterns
    Check {
        /// Container name, including the leading '/' the engine reports
        name: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    Text,
}

impl Cli {
    /// Subcommand to run, defaulting to `watch`
    pub fn subcommand(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Watch)
    }
}

