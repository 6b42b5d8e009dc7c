//! Dispatcher process: accept loop and task ownership

use crate::handler::ConnectionHandler;
use crate::health::HealthMonitor;
use crate::registry::Registry;
use crate::router::Router;
use std::sync::Arc;
use std::time::Duration;
use switchyard_common::config::DispatcherConfig;
use switchyard_common::Result;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn, Instrument};

/// Pause after a failed accept so a persistent error (e.g. EMFILE) does not spin
pub(crate) const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Owns the registry and router and runs the accept loop plus the single
/// health monitor task.
pub struct Dispatcher {
    registry: Arc<Registry>,
    router: Arc<Router>,
    config: Arc<DispatcherConfig>,
    metrics_enabled: bool,
}

impl Dispatcher {
    /// Create a new dispatcher with an empty registry
    pub fn new(config: DispatcherConfig) -> Self {
        let router = Router::new(config.strategy, config.static_tag_penalty);
        Self {
            registry: Arc::new(Registry::new()),
            router: Arc::new(router),
            config: Arc::new(config),
            metrics_enabled: true,
        }
    }

    /// Enable or disable the METRICS handshake
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    /// Shared handle to the registry
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Accept connections until `shutdown` is cancelled, then wait for every
    /// connection task and the health monitor to finish.
    pub async fn run(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!(
            "Dispatcher listening on {} (strategy={})",
            local_addr,
            self.router.strategy()
        );

        let monitor = HealthMonitor::new(
            self.registry(),
            self.config.health_check_interval(),
            self.config.heartbeat_timeout(),
        )
        .spawn(shutdown.clone());

        let handler = ConnectionHandler::new(
            self.registry(),
            Arc::clone(&self.router),
            Arc::clone(&self.config),
            shutdown.clone(),
        )
        .with_metrics(self.metrics_enabled);

        let tracker = TaskTracker::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let _ = stream.set_nodelay(true);
                        let handler = handler.clone();
                        let span = tracing::info_span!("connection", %peer);
                        tracker.spawn(
                            async move { handler.handle(stream, peer.to_string()).await }
                                .instrument(span),
                        );
                    }
                    Err(e) => accept_failed(e).await,
                },
            }
        }

        info!("Dispatcher shutting down, waiting for {} connections", tracker.len());
        drop(listener);
        tracker.close();
        tracker.wait().await;

        if let Err(e) = monitor.await {
            warn!("Health monitor task failed: {}", e);
        }

        info!("Dispatcher stopped");
        Ok(())
    }
}

async fn accept_failed(error: std::io::Error) {
    warn!("Accept failed: {}, retrying in {:?}", error, ACCEPT_ERROR_BACKOFF);
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}
