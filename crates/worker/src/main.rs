//! Switchyard Worker - Main Entry Point
//!
//! Binds the request port first, then joins the dispatcher and serves
//! redirected requests until SIGINT or SIGTERM.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use switchyard_common::shutdown::install_shutdown_handler;
use switchyard_common::telemetry::{default_directives, init_tracing};
use switchyard_common::SwitchyardConfig;
use tokio::net::TcpListener;
use tracing::{debug, info};

#[derive(Debug, Parser)]
#[command(name = "switchyard-worker", about = "Simulated worker that serves dispatched requests")]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "SWITCHYARD_CONFIG")]
    config: Option<PathBuf>,

    /// Dispatcher address (host:port)
    #[arg(short, long)]
    dispatcher: Option<String>,

    /// Address to bind the request port on
    #[arg(long)]
    bind: Option<String>,

    /// Port to serve client requests on
    #[arg(short, long)]
    port: Option<u16>,

    /// Balancing tag sent with the join, e.g. dynamic or static
    #[arg(short, long)]
    tag: Option<String>,

    /// Milliseconds of wall-clock time per second of estimated work
    #[arg(long)]
    work_unit_millis: Option<u64>,

    /// Log level for Switchyard crates
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut SwitchyardConfig) {
        if let Some(address) = self.dispatcher {
            config.worker.dispatcher_address = address;
        }
        if let Some(bind) = self.bind {
            config.worker.bind_address = bind;
        }
        if let Some(port) = self.port {
            config.worker.listen_port = port;
        }
        if let Some(tag) = self.tag {
            config.worker.balancing_tag = tag;
        }
        if let Some(millis) = self.work_unit_millis {
            config.worker.work_unit_millis = millis;
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
        &["switchyard_worker", "switchyard_common"],
        &config.observability.log_level,
    ));

    info!("Starting Switchyard Worker");
    debug!("Effective configuration:\n{}", config.to_yaml()?);

    // Serve before joining so a redirected client never finds the port closed
    let port = config.worker.listen_port;
    let listener = TcpListener::bind((config.worker.bind_address.as_str(), port))
        .await
        .with_context(|| format!("binding worker port {}", port))?;

    let shutdown = install_shutdown_handler("worker")?;
    switchyard_worker::run(config.worker.clone(), listener, shutdown)
        .await
        .with_context(|| format!("worker on port {}", port))?;

    info!("Switchyard Worker shutdown complete");
    Ok(())
}
