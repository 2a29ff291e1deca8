//! CLI argument parsing tests

use clap::{CommandFactory, Parser};
use job_reaper::cli::{Cli, Commands, LogFormat};
use std::path::PathBuf;

#[test]
fn test_cli_definition_is_valid() {
    Cli::command().debug_assert();
}

#[test]
fn test_defaults_to_watch_with_json_logs() {
    let cli = Cli::try_parse_from(["job-reaper", "--config", "patterns.json"]).unwrap();

    assert_eq!(cli.subcommand(), Commands::Watch);
    assert_eq!(cli.log_format, LogFormat::Json);
    assert_eq!(cli.config, PathBuf::from("patterns.json"));
}

#[test]
fn test_sweep_requires_job_id() {
    assert!(Cli::try_parse_from(["job-reaper", "sweep"]).is_err());

    let cli = Cli::try_parse_from(["job-reaper", "sweep", "--job-id", "4242"]).unwrap();
    assert_eq!(
        cli.subcommand(),
        Commands::Sweep {
            job_id: "4242".to_string()
        }
    );
}

#[test]
fn test_check_takes_container_name() {
    let cli = Cli::try_parse_from([
        "job-reaper",
        "--log-format",
        "text",
        "check",
        "/runner-1-build",
    ])
    .unwrap();

    assert_eq!(cli.log_format, LogFormat::Text);
    assert_eq!(
        cli.subcommand(),
        Commands::Check {
            name: "/runner-1-build".to_string()
        }
    );
}

#[test]
fn test_global_flags_after_subcommand() {
    let cli = Cli::try_parse_from([
        "job-reaper",
        "watch",
        "--config",
        "/etc/reaper/jobPattern.json",
    ])
    .unwrap();

    assert_eq!(cli.config, PathBuf::from("/etc/reaper/jobPattern.json"));
}

#[test]
fn test_rejects_unknown_log_format() {
    assert!(Cli::try_parse_from(["job-reaper", "--log-format", "xml"]).is_err());
}
