//! Worker side of the dispatcher connection

use std::time::Duration;
use switchyard_common::{Result, SwitchyardError, METRICS};
use switchyard_proto::{DispatchReply, JoinRequest, WorkerMessage};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Registered connection to the dispatcher
pub struct DispatcherLink {
    reader: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    address: String,
}

impl DispatcherLink {
    /// Connect and join once
    pub async fn join(address: &str, join: &JoinRequest) -> Result<Self> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| SwitchyardError::connection(format!("Failed to connect to {}: {}", address, e)))?;
        let (reader, writer) = stream.into_split();
        let mut link = Self {
            reader: BufReader::new(reader).lines(),
            writer,
            address: address.to_string(),
        };

        link.write(&join.to_string()).await?;
        let reply = link
            .reader
            .next_line()
            .await?
            .ok_or_else(|| SwitchyardError::connection("Dispatcher closed the connection during join"))?;

        match DispatchReply::parse(&reply)? {
            DispatchReply::JoinAccepted => {
                info!("Joined dispatcher at {} as `{}`", address, join);
                Ok(link)
            }
            DispatchReply::JoinRejected(reason) => Err(SwitchyardError::config(format!(
                "Dispatcher rejected join: {}",
                reason
            ))),
            other => Err(SwitchyardError::connection(format!(
                "Unexpected join reply: {}",
                other
            ))),
        }
    }

    /// Join, retrying connection failures up to `attempts` times
    pub async fn join_with_retry(
        address: &str,
        join: &JoinRequest,
        attempts: u32,
        delay: Duration,
    ) -> Result<Self> {
        let mut attempt = 1;
        loop {
            match Self::join(address, join).await {
                Ok(link) => return Ok(link),
                // A rejection will not change on retry
                Err(e @ SwitchyardError::Config(_)) => return Err(e),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    warn!(
                        "Join attempt {}/{} to {} failed: {}",
                        attempt, attempts, address, e
                    );
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    pub async fn report_load(&mut self, load: u64) -> Result<()> {
        self.send(WorkerMessage::Load(load)).await?;
        METRICS.worker.load_reports.inc();
        debug!("Reported load {} to {}", load, self.address);
        Ok(())
    }

    /// Leave gracefully and close the connection
    pub async fn goodbye(mut self) -> Result<()> {
        self.send(WorkerMessage::Goodbye).await?;
        self.writer.shutdown().await?;
        info!("Left dispatcher at {}", self.address);
        Ok(())
    }

    /// Resolves once the dispatcher closes the connection, e.g. after an
    /// eviction. Cancel-safe.
    pub async fn closed(&mut self) {
        loop {
            match self.reader.next_line().await {
                Ok(Some(line)) => debug!("Ignoring dispatcher line: {}", line),
                Ok(None) => return,
                Err(e) => {
                    debug!("Dispatcher read failed: {}", e);
                    return;
                }
            }
        }
    }

    async fn send(&mut self, message: WorkerMessage) -> Result<()> {
        self.write(&message.to_string()).await
    }

    async fn write(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(format!("{}\n", line).as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
