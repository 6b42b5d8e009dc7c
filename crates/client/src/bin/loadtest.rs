//! Switchyard Load Test
//!
//! Sends a single request, or a concurrent mix of requests, through the
//! dispatcher and prints what happened.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use switchyard_client::{run_load_test, DispatcherClient, RequestOutcome};
use switchyard_common::telemetry::{default_directives, init_tracing};
use switchyard_common::SwitchyardConfig;
use switchyard_proto::RequestLine;

#[derive(Debug, Parser)]
#[command(name = "switchyard-loadtest", about = "Drives requests through a Switchyard dispatcher")]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "SWITCHYARD_CONFIG")]
    config: Option<PathBuf>,

    /// Dispatcher address (host:port)
    #[arg(short, long)]
    dispatcher: Option<String>,

    /// Concurrent requests
    #[arg(short = 'n', long)]
    concurrency: Option<usize>,

    /// Total requests
    #[arg(short, long)]
    total: Option<usize>,

    /// Run one request instead of a load test, e.g. "COMPUTATION 5"
    #[arg(short, long)]
    request: Option<String>,

    /// Print the load test report as JSON
    #[arg(long)]
    json: bool,

    /// Log level for Switchyard crates
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = SwitchyardConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(address) = cli.dispatcher {
        config.client.dispatcher_address = address;
    }
    if let Some(concurrency) = cli.concurrency {
        config.client.concurrency = concurrency;
    }
    if let Some(total) = cli.total {
        config.client.total_requests = total;
    }
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }
    config.validate()?;

    init_tracing(&default_directives(
        &["switchyard_client", "switchyard_loadtest", "switchyard_common"],
        &config.observability.log_level,
    ));

    let client = DispatcherClient::new(config.client.clone());

    if let Some(line) = cli.request {
        let request = RequestLine::parse(&line).context("parsing request")?;
        match client.execute(&request).await? {
            RequestOutcome::NoServerAvailable => println!("NO_SERVER_AVAILABLE"),
            RequestOutcome::Served { port, lines } => {
                println!("SERVER_PORT {}", port);
                for line in lines {
                    println!("{}", line);
                }
            }
        }
        return Ok(());
    }

    let report = run_load_test(client, config.client.concurrency, config.client.total_requests).await?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "completed={} unassigned={} failed={} elapsed={}ms",
            report.completed, report.unassigned, report.failed, report.elapsed_ms
        );
        for (port, count) in &report.per_port {
            println!("  port {}: {} requests", port, count);
        }
    }
    Ok(())
}
