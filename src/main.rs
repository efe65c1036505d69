//! netpulse Binary Entry Point
//!
//! Loads configuration, starts one supervised cycle loop per enabled probe
//! family and runs until SIGINT or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use netpulse::{
    config::{AppConfig, DEFAULT_CONFIG_PATH, StoreOverrides, parse_duration},
    logging,
    orchestrator::{CycleOrchestrator, Supervisor},
    probe::{PingProbe, SpeedtestProbe},
    store::{InfluxConnector, StoreConfig, StoreConnector},
};
use tokio::task::JoinSet;

/// netpulse - Network Diagnostic Collector
#[derive(Parser, Debug)]
#[command(name = "netpulse", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, env = "NETPULSE_CONFIG")]
    config: PathBuf,

    /// Store URL (overrides config file)
    #[arg(long, env = "INFLUX_HOST")]
    influx_host: Option<String>,

    /// Store API token (overrides config file)
    #[arg(long, env = "INFLUX_TOKEN", hide_env_values = true)]
    influx_token: Option<String>,

    /// Store organization (overrides config file)
    #[arg(long, env = "INFLUX_ORG")]
    influx_org: Option<String>,

    /// Store bucket (overrides config file)
    #[arg(long, env = "INFLUX_BUCKET")]
    influx_bucket: Option<String>,

    /// Ping target list file (overrides config file)
    #[arg(short, long, env = "NETPULSE_TARGETS")]
    targets: Option<String>,

    /// Collection interval, e.g. "60s" (overrides config file)
    #[arg(long, value_parser = parse_duration)]
    interval: Option<Duration>,

    /// Log every written record and enable debug output
    #[arg(short, long, env = "NETPULSE_VERBOSE")]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_json);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "netpulse - Network Diagnostic Collector");

    tracing::info!(path = %cli.config.display(), "Loading configuration");
    let mut config = AppConfig::load_or_default(&cli.config)?;

    // CLI > ENV > config file
    config.apply_store_overrides(StoreOverrides {
        host: cli.influx_host,
        token: cli.influx_token,
        org: cli.influx_org,
        bucket: cli.influx_bucket,
    })?;
    if let Some(path) = cli.targets {
        config.ping.targets_file = Some(path);
    }
    if let Some(interval) = cli.interval {
        config.collection.interval = interval;
    }
    if cli.verbose {
        config.collection.verbose = true;
    }
    config.validate()?;

    tracing::info!(
        store = %config.store.host,
        org = %config.store.org,
        workers = config.collection.workers,
        interval = ?config.collection.interval,
        "Configuration loaded"
    );

    let restart_delay = config.collection.restart_delay;
    let mut loops = JoinSet::new();

    if config.ping.enabled {
        let store = config.ping_store();
        tracing::info!(bucket = %store.bucket, "Starting ping collection");
        let app = Arc::new(config.clone());
        let orchestrator = CycleOrchestrator::with_target_loader(
            Arc::new(PingProbe::new(config.ping.clone())),
            Arc::new(move || app.ping_targets()),
            connector(store),
            config.ping_settings(),
        );
        loops.spawn(supervise(orchestrator, restart_delay));
    }

    if config.speedtest.enabled {
        let store = config.speedtest_store();
        let targets = config.speedtest.targets();
        tracing::info!(
            bucket = %store.bucket,
            targets = targets.len(),
            "Starting speedtest collection"
        );
        let orchestrator = CycleOrchestrator::new(
            Arc::new(SpeedtestProbe::new(config.speedtest.clone())),
            targets,
            connector(store),
            config.speedtest_settings(),
        );
        loops.spawn(supervise(orchestrator, restart_delay));
    }

    if loops.is_empty() {
        return Err("no probe family is enabled".into());
    }

    tracing::info!("Press Ctrl+C to shutdown");

    tokio::select! {
        _ = shutdown_signal() => {}
        Some(result) = loops.join_next() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Collection loop ended unexpectedly");
            }
        }
    }

    loops.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Each family gets its own store connection.
fn connector(store: StoreConfig) -> Arc<dyn StoreConnector> {
    Arc::new(InfluxConnector::new(store))
}

/// Run an orchestrator forever, restarting it after every crash.
async fn supervise(orchestrator: CycleOrchestrator, restart_delay: Duration) {
    let supervisor = Supervisor::new(orchestrator.family().to_string(), restart_delay);
    let orchestrator = Arc::new(orchestrator);
    supervisor
        .run(move || {
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.run().await }
        })
        .await;
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
