use std::{env, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use drift_config::{ConfigLoad, DriftConfig};
use drift_core::{DriveEventService, InMemoryFolderTree, PipelineStats};
use drift_server::{InputHandler, JsonLinesPublisher, LogPublisher, spawn_stdin_reader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "info,drift::buffer=warn";

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "driftd")]
#[command(about = "Consolidates drive folder changes read from stdin into drive events")]
struct Cli {
    /// Configuration file (TOML or JSON); takes precedence over DRIFT_CONFIG_PATH
    #[arg(long)]
    config: Option<PathBuf>,

    /// tracing filter used when RUST_LOG is unset (overrides config)
    #[arg(long, env = "DRIFT_LOG_FILTER")]
    log_filter: Option<String>,

    /// Pause between sweeps, e.g. `500ms` or `2s` (overrides config)
    #[arg(long, value_parser = humantime::parse_duration)]
    sweep_interval: Option<Duration>,

    /// Print pipeline counters as JSON to stderr on exit
    #[arg(long, default_value_t = false)]
    stats_on_exit: bool,

    /// Capacity of the queue between the stdin reader and the pipeline
    #[arg(long, default_value_t = 1024)]
    input_buffer: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone();
    let mut load = DriftConfig::load_with(
        |key| match (key, &config_path) {
            ("DRIFT_CONFIG_PATH", Some(path)) => Some(path.display().to_string()),
            _ => env::var(key).ok(),
        },
        std::path::Path::new("."),
    )
    .context("failed to load configuration")?;
    if let Some(interval) = cli.sweep_interval {
        load = load
            .with_sweep_interval(interval)
            .context("invalid --sweep-interval")?;
    }
    let ConfigLoad {
        config,
        source,
        overrides,
        warnings,
    } = load;

    let filter = cli
        .log_filter
        .clone()
        .or_else(|| config.log_filter.clone())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        // stdout carries the event stream
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!(source = ?source, "configuration loaded");
    for applied in &overrides {
        info!(variable = applied.variable, value = %applied.value, "environment override applied");
    }
    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => {
                warn!(message = %warning.message, "configuration warning")
            }
        }
    }

    let stats = Arc::new(PipelineStats::new());
    let tree = Arc::new(InMemoryFolderTree::new());
    let service = Arc::new(
        DriveEventService::builder(config.consolidation)
            .with_path_resolver(tree.clone())
            .with_observer(stats.clone())
            .build(),
    );
    service.register_publisher(Arc::new(LogPublisher));
    service.register_publisher(Arc::new(JsonLinesPublisher::local_only(tokio::io::stdout())));
    service.start().context("failed to start drive event service")?;

    let handler = InputHandler::new(Arc::clone(&service), tree);
    let lines = spawn_stdin_reader(cli.input_buffer);

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = handler.run(lines) => {}
        () = ctrl_c => info!("received Ctrl+C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }

    service.shutdown().await;

    if cli.stats_on_exit {
        let snapshot = serde_json::to_string_pretty(&stats.snapshot())
            .context("failed to render pipeline stats")?;
        eprintln!("{snapshot}");
    }

    Ok(())
}
