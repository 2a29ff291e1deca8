//! Job Reaper - removes the resources CI jobs leave behind
//!
//! Watches the local container engine for job containers that exit and
//! reconciles away their containers, networks, volumes and services.

use anyhow::{Context, Result};
use clap::Parser;
use job_reaper::{
    api,
    cli::{Cli, Commands, LogFormat},
    config::ReaperConfig,
};
use reaper_lib::{
    classifier::{matches, JobClassifier, JobPatterns},
    compose::ComposeBridge,
    engine::{ContainerEngine, DockerEngine},
    health::HealthRegistry,
    observability::StructuredLogger,
    reconciler::Reconciler,
    watcher::{CleanupDispatcher, WatchExit, Watcher},
};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const REAPER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = ReaperConfig::load(&cli.config)?;
    info!(
        config = %cli.config.display(),
        patterns = config.job_patterns.len(),
        "Reaper configured"
    );

    match cli.subcommand() {
        Commands::Watch => watch(config).await,
        Commands::Sweep { job_id } => sweep(config, &job_id).await,
        Commands::Check { name } => check(&config, &name),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
}

async fn connect_engine() -> Result<Arc<dyn ContainerEngine>> {
    let engine = DockerEngine::connect()
        .await
        .context("Failed to connect to the container engine")?;
    Ok(Arc::new(engine))
}

fn build_reconciler(
    config: &ReaperConfig,
    engine: Arc<dyn ContainerEngine>,
    logger: StructuredLogger,
) -> Result<Reconciler> {
    Reconciler::builder()
        .engine(engine)
        .classifier(JobClassifier::new(config.heuristic_config()))
        .compose(ComposeBridge::production(config.compose_config()))
        .config(config.reconciler_config())
        .logger(logger)
        .build()
}

/// Daemon mode: follow the event feed until a signal or feed loss
async fn watch(config: ReaperConfig) -> Result<()> {
    let logger = StructuredLogger::new(&config.node_name);
    let health_registry = HealthRegistry::new();

    let engine = connect_engine().await?;
    let reconciler = build_reconciler(&config, engine, logger.clone())?;
    let dispatcher = CleanupDispatcher::new(
        Arc::new(reconciler),
        health_registry.clone(),
        config.max_concurrent_cleanups,
    );
    let patterns = JobPatterns::compile(&config.job_patterns);
    let pattern_count = patterns.len();
    let watcher = Watcher::new(patterns, dispatcher, health_registry.clone(), logger.clone());

    let (shutdown_tx, _) = broadcast::channel(1);

    let api_handle = (config.api_port != 0).then(|| {
        tokio::spawn(api::serve(
            config.api_port,
            health_registry.clone(),
            shutdown_tx.subscribe(),
        ))
    });

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let signal_tx = shutdown_tx.clone();
    let signal_logger = logger.clone();
    tokio::spawn(async move {
        let reason = tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT received",
            _ = sigterm.recv() => "SIGTERM received",
        };
        signal_logger.log_shutdown(reason);
        let _ = signal_tx.send(());
    });

    logger.log_startup(REAPER_VERSION, pattern_count);
    health_registry.set_ready(true).await;

    let exit = watcher.run(shutdown_tx.subscribe()).await;
    health_registry.set_ready(false).await;

    let result = match exit {
        WatchExit::Shutdown => {
            info!("Shutting down");
            Ok(())
        }
        WatchExit::FeedEnded => {
            logger.log_shutdown("event feed closed");
            watcher.dispatcher().drain().await;
            Err(anyhow::anyhow!("Container event feed closed"))
        }
        WatchExit::FeedError(e) => {
            logger.log_shutdown("event feed failed");
            watcher.dispatcher().drain().await;
            Err(e).context("Container event feed failed")
        }
    };

    let _ = shutdown_tx.send(());
    if let Some(handle) = api_handle {
        match handle.await {
            Ok(Err(e)) => error!(error = %e, "API server failed"),
            Err(e) => error!(error = %e, "API server task failed"),
            Ok(Ok(())) => {}
        }
    }

    result
}

/// One-off pass for a single job id, summary printed as JSON
async fn sweep(config: ReaperConfig, job_id: &str) -> Result<()> {
    let logger = StructuredLogger::new(&config.node_name);
    let engine = connect_engine().await?;
    let reconciler = build_reconciler(&config, engine, logger)?;

    let summary = reconciler.clean_up(job_id).await;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if !summary.is_success() {
        error!(
            job_id = %job_id,
            errors = ?summary.errors(),
            "Sweep finished with errors"
        );
    }
    Ok(())
}

/// Report whether `name` matches a configured job pattern
fn check(config: &ReaperConfig, name: &str) -> Result<()> {
    let matched = matches(name, &config.job_patterns);
    println!(
        "{}",
        serde_json::json!({ "name": name, "matched": matched })
    );
    Ok(())
}
