//! Switchyard Dispatcher - Main Entry Point
//!
//! Parses flags, loads configuration, binds the listening socket and runs the
//! dispatcher until SIGINT or SIGTERM.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use switchyard_common::shutdown::install_shutdown_handler;
use switchyard_common::telemetry::{default_directives, init_tracing};
use switchyard_common::{BalancingStrategy, SwitchyardConfig};
use switchyard_dispatcher::Dispatcher;
use tokio::net::TcpListener;
use tracing::{debug, info};

#[derive(Debug, Parser)]
#[command(name = "switchyard-dispatcher", about = "Routes client requests to registered workers")]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "SWITCHYARD_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Routing strategy: request_aware, least_load, round_robin or weighted
    #[arg(short, long)]
    strategy: Option<BalancingStrategy>,

    /// Seconds between health scans
    #[arg(long)]
    health_interval: Option<u64>,

    /// Seconds without a heartbeat before eviction
    #[arg(long)]
    heartbeat_timeout: Option<u64>,

    /// Log level for Switchyard crates
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut SwitchyardConfig) {
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(strategy) = self.strategy {
            config.dispatcher.strategy = strategy;
        }
        if let Some(secs) = self.health_interval {
            config.dispatcher.health_check_interval_secs = secs;
        }
        if let Some(secs) = self.heartbeat_timeout {
            config.dispatcher.heartbeat_timeout_secs = secs;
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = SwitchyardConfig::load(cli.config.as_deref()).context("loading configuration")?;
    cli.apply(&mut config);
    config.validate()?;

    init_tracing(&default_directives(
        &["switchyard_dispatcher", "switchyard_common"],
        &config.observability.log_level,
    ));

    info!("Starting Switchyard Dispatcher");
    debug!("Effective configuration:\n{}", config.to_yaml()?);

    let addr = config.listen_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding dispatcher port {}", addr))?;

    let shutdown = install_shutdown_handler("dispatcher")?;
    Dispatcher::new(config.dispatcher.clone())
        .with_metrics(config.observability.enable_metrics)
        .run(listener, shutdown)
        .await?;

    info!("Switchyard Dispatcher shutdown complete");
    Ok(())
}
