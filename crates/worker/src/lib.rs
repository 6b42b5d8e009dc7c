//! Switchyard Worker
//!
//! Simulated backend server. Joins the dispatcher, reports its load on a
//! fixed interval and executes redirected client requests by sleeping for
//! a scaled version of their estimated duration.

pub mod link;
pub mod service;

pub use link::DispatcherLink;
pub use service::RequestService;

use switchyard_common::config::WorkerConfig;
use switchyard_common::Result;
use switchyard_proto::JoinRequest;
use tokio::net::TcpListener;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Why the reporting loop stopped
enum LinkEnd {
    Shutdown,
    Lost,
}

/// Run a worker on `listener` until `shutdown` is cancelled.
///
/// The join advertises the listener's actual port. A lost dispatcher
/// connection is re-established with the configured retry policy; running
/// out of attempts ends the worker with an error.
pub async fn run(config: WorkerConfig, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
    let port = listener.local_addr()?.port();
    let join = JoinRequest {
        balancing_tag: config.balancing_tag.clone(),
        listen_port: port,
    };

    let service = RequestService::new(config.clone());
    let serving = shutdown.child_token();
    let requests = tokio::spawn(service.clone().serve(listener, serving.clone()));
    info!("Worker serving requests on port {}", port);

    let result = report_until_shutdown(&config, &join, &service, &shutdown).await;

    serving.cancel();
    if let Err(e) = requests.await {
        warn!("Request service task failed: {}", e);
    }
    result
}

async fn report_until_shutdown(
    config: &WorkerConfig,
    join: &JoinRequest,
    service: &RequestService,
    shutdown: &CancellationToken,
) -> Result<()> {
    loop {
        let mut link = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            link = DispatcherLink::join_with_retry(
                &config.dispatcher_address,
                join,
                config.join_retry_attempts,
                config.join_retry_delay(),
            ) => link?,
        };

        let mut ticker = tokio::time::interval(config.load_report_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let end = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break LinkEnd::Shutdown,
                _ = link.closed() => break LinkEnd::Lost,
                _ = ticker.tick() => {
                    if let Err(e) = link.report_load(service.active_requests()).await {
                        warn!("Load report failed: {}", e);
                        break LinkEnd::Lost;
                    }
                }
            }
        };

        match end {
            LinkEnd::Shutdown => {
                if let Err(e) = link.goodbye().await {
                    warn!("Goodbye failed: {}", e);
                }
                return Ok(());
            }
            LinkEnd::Lost => warn!("Lost connection to dispatcher, rejoining"),
        }
    }
}
