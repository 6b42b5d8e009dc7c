//! Per-connection protocol handling
//!
//! The first line of a connection decides its shape. Workers `join` and then
//! stream load reports until they leave; clients send one `REQUEST`, get one
//! reply and are disconnected.

use crate::registry::{Registry, WorkerId};
use crate::router::Router;
use std::fmt;
use std::sync::Arc;
use switchyard_common::config::DispatcherConfig;
use switchyard_common::METRICS;
use switchyard_proto::{
    DispatchReply, Handshake, JoinRequest, ProtocolError, RequestDescriptor, RequestLine,
    WorkerMessage,
};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines, ReadHalf, WriteHalf,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

type LineReader<S> = Lines<BufReader<ReadHalf<S>>>;

/// Why a registered worker left
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// Worker sent `goodbye`
    Goodbye,

    /// End of stream
    Disconnected,

    /// Read failed
    ReadError,

    /// Registry entry removed elsewhere (eviction) or dispatcher shutdown
    Released,
}

impl Departure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Departure::Goodbye => "goodbye",
            Departure::Disconnected => "disconnected",
            Departure::ReadError => "read_error",
            Departure::Released => "released",
        }
    }
}

impl fmt::Display for Departure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Removes the registry entry exactly once, on whichever path the
/// connection task ends.
struct Registration<'a> {
    registry: &'a Registry,
    id: Option<WorkerId>,
}

impl<'a> Registration<'a> {
    fn new(registry: &'a Registry, id: WorkerId) -> Self {
        Self {
            registry,
            id: Some(id),
        }
    }

    fn finish(mut self, departure: Departure) {
        let Some(id) = self.id.take() else { return };
        match self.registry.remove(id) {
            Some(entry) => {
                info!("{} (port={}) left: {}", id, entry.listen_port, departure);
                METRICS
                    .dispatcher
                    .workers_removed
                    .with_label_values(&[departure.as_str()])
                    .inc();
            }
            None => debug!("{} already removed before {}", id, departure),
        }
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.registry.remove(id);
        }
    }
}

/// Connection handler shared by every accepted socket
#[derive(Clone)]
pub struct ConnectionHandler {
    registry: Arc<Registry>,
    router: Arc<Router>,
    config: Arc<DispatcherConfig>,
    metrics_enabled: bool,
    shutdown: CancellationToken,
}

impl ConnectionHandler {
    pub fn new(
        registry: Arc<Registry>,
        router: Arc<Router>,
        config: Arc<DispatcherConfig>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            router,
            config,
            metrics_enabled: true,
            shutdown,
        }
    }

    /// Enable or disable the METRICS handshake
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    /// Drive one connection to completion. Never returns an error: every
    /// failure is contained to this connection.
    pub async fn handle<S>(&self, stream: S, peer: String)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut lines = BufReader::new(reader).lines();

        loop {
            let Some(line) = self.next_handshake_line(&mut lines, &peer).await else {
                return;
            };

            match Handshake::parse(&line, self.config.default_worker_port) {
                Ok(Handshake::Join(join)) => {
                    self.serve_worker(join, lines, writer, peer).await;
                    return;
                }
                Ok(Handshake::Request(request)) => {
                    self.serve_client(request, writer, &peer).await;
                    return;
                }
                Ok(Handshake::Metrics) => {
                    self.serve_metrics(writer, &peer).await;
                    return;
                }
                Err(ProtocolError::MalformedJoin(reason)) => {
                    warn!("Rejected join from {}: {}", peer, reason);
                    METRICS.dispatcher.malformed_messages.inc();
                    let reply = DispatchReply::JoinRejected(reason);
                    if let Err(e) = write_line(&mut writer, &reply).await {
                        debug!("Failed to send rejection to {}: {}", peer, e);
                        return;
                    }
                }
                Err(ProtocolError::MissingRequestKind) => {
                    warn!("REQUEST without a kind from {}", peer);
                    METRICS.dispatcher.malformed_messages.inc();
                    if write_line(&mut writer, &DispatchReply::NoServerAvailable).await.is_ok() {
                        let _ = writer.shutdown().await;
                    }
                    return;
                }
                Err(e) => {
                    warn!("Ignoring line from {}: {}", peer, e);
                    METRICS.dispatcher.malformed_messages.inc();
                }
            }
        }
    }

    /// Read a line while unregistered. `None` on end of stream, read error,
    /// handshake timeout or shutdown.
    async fn next_handshake_line<S>(&self, lines: &mut LineReader<S>, peer: &str) -> Option<String>
    where
        S: AsyncRead,
    {
        let read = async {
            tokio::select! {
                _ = self.shutdown.cancelled() => None,
                line = lines.next_line() => match line {
                    Ok(line) => line,
                    Err(e) => {
                        debug!("Read from {} failed before handshake: {}", peer, e);
                        None
                    }
                },
            }
        };

        match self.config.handshake_timeout() {
            Some(limit) => match tokio::time::timeout(limit, read).await {
                Ok(line) => line,
                Err(_) => {
                    info!("Closing {}: no handshake within {:?}", peer, limit);
                    None
                }
            },
            None => read.await,
        }
    }

    async fn serve_worker<S>(
        &self,
        join: JoinRequest,
        mut lines: LineReader<S>,
        mut writer: WriteHalf<S>,
        peer: String,
    ) where
        S: AsyncRead + AsyncWrite,
    {
        let release = self.shutdown.child_token();
        let id = self
            .registry
            .register(join.listen_port, join.balancing_tag, peer, release.clone());
        let registration = Registration::new(&self.registry, id);

        if let Err(e) = write_line(&mut writer, &DispatchReply::JoinAccepted).await {
            warn!("Failed to acknowledge {}: {}", id, e);
            registration.finish(Departure::Disconnected);
            return;
        }

        let departure = loop {
            tokio::select! {
                _ = release.cancelled() => break Departure::Released,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(departure) = self.on_worker_line(id, &line) {
                            break departure;
                        }
                    }
                    Ok(None) => break Departure::Disconnected,
                    Err(e) => {
                        debug!("Read from {} failed: {}", id, e);
                        break Departure::ReadError;
                    }
                },
            }
        };

        registration.finish(departure);
    }

    /// Apply one worker line; `Some` ends the read loop
    fn on_worker_line(&self, id: WorkerId, line: &str) -> Option<Departure> {
        match WorkerMessage::parse(line) {
            Ok(WorkerMessage::Load(load)) => {
                self.registry.update_load(id, load);
                None
            }
            Ok(WorkerMessage::Ping) => {
                self.registry.touch(id);
                None
            }
            Ok(WorkerMessage::Goodbye) => Some(Departure::Goodbye),
            Err(e) => {
                warn!("Ignoring message from {}: {}", id, e);
                METRICS.dispatcher.malformed_messages.inc();
                None
            }
        }
    }

    async fn serve_client<W>(&self, request: RequestLine, mut writer: W, peer: &str)
    where
        W: AsyncWrite + Unpin,
    {
        let request_id = Uuid::new_v4();
        let descriptor = RequestDescriptor::from(request);
        let snapshot = self.registry.snapshot();

        let reply = match self.router.route(&snapshot, &descriptor) {
            Some(decision) => {
                info!(
                    %request_id,
                    "{} from {} -> {} (port={}, policy={})",
                    descriptor.kind, peer, decision.worker.id, decision.worker.listen_port, decision.policy
                );
                METRICS
                    .dispatcher
                    .requests_routed
                    .with_label_values(&[decision.policy.as_str()])
                    .inc();
                METRICS
                    .dispatcher
                    .estimated_duration
                    .observe(descriptor.estimated_duration.as_secs_f64());
                DispatchReply::ServerPort(decision.worker.listen_port)
            }
            None => {
                info!(%request_id, "{} from {}: no server available", descriptor.kind, peer);
                METRICS.dispatcher.no_worker_available.inc();
                DispatchReply::NoServerAvailable
            }
        };

        if let Err(e) = write_line(&mut writer, &reply).await {
            debug!(%request_id, "Failed to reply to {}: {}", peer, e);
            return;
        }
        let _ = writer.shutdown().await;
    }

    async fn serve_metrics<W>(&self, mut writer: W, peer: &str)
    where
        W: AsyncWrite + Unpin,
    {
        if !self.metrics_enabled {
            debug!("METRICS from {} refused: metrics disabled", peer);
            return;
        }

        match METRICS.gather() {
            Ok(text) => {
                if let Err(e) = writer.write_all(text.as_bytes()).await {
                    debug!("Failed to send metrics to {}: {}", peer, e);
                    return;
                }
                let _ = writer.shutdown().await;
            }
            Err(e) => warn!("Failed to gather metrics: {}", e),
        }
    }
}

/// Write one newline-terminated line and flush
pub async fn write_line<W>(writer: &mut W, line: &impl fmt::Display) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(format!("{}\n", line).as_bytes()).await?;
    writer.flush().await
}
