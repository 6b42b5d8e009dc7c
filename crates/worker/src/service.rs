//! Simulated request execution
//!
//! Stands in for real workloads: each request sleeps for a scaled version of
//! its estimated duration while streaming progress lines to the client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchyard_common::config::WorkerConfig;
use switchyard_common::{Result, SwitchyardError, METRICS};
use switchyard_proto::{RequestDescriptor, RequestLine, WorkerReply};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn, Instrument};

/// Progress lines emitted per request
const PROGRESS_STEPS: u32 = 4;

/// Pause after a failed accept before trying again
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// How long a client may take to send its request line
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Counts a request as active for as long as it lives
struct ActiveRequest {
    active: Arc<AtomicU64>,
}

impl ActiveRequest {
    fn start(active: &Arc<AtomicU64>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        METRICS.worker.active_requests.inc();
        Self {
            active: Arc::clone(active),
        }
    }
}

impl Drop for ActiveRequest {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        METRICS.worker.active_requests.dec();
    }
}

/// Serves client requests redirected by the dispatcher
#[derive(Clone)]
pub struct RequestService {
    config: Arc<WorkerConfig>,
    active: Arc<AtomicU64>,
}

impl RequestService {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config: Arc::new(config),
            active: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Requests currently executing; reported to the dispatcher as load
    pub fn active_requests(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    /// Accept client connections until `shutdown` is cancelled, then wait
    /// for in-flight requests to finish.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) {
        let tracker = TaskTracker::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let service = self.clone();
                        let span = tracing::info_span!("request", %peer);
                        tracker.spawn(
                            async move {
                                if let Err(e) = service.handle(stream).await {
                                    debug!("Request failed: {}", e);
                                }
                            }
                            .instrument(span),
                        );
                    }
                    Err(e) => {
                        warn!("Accept failed: {}, retrying in {:?}", e, ACCEPT_ERROR_BACKOFF);
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }

        drop(listener);
        tracker.close();
        tracker.wait().await;
    }

    /// Execute one request on `stream`
    pub async fn handle<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut stream = BufReader::new(stream);
        let mut line = String::new();
        let read = tokio::time::timeout(REQUEST_READ_TIMEOUT, stream.read_line(&mut line))
            .await
            .map_err(|_| SwitchyardError::timeout("No request line received"))??;
        if read == 0 {
            return Err(SwitchyardError::connection("Client closed before sending a request"));
        }

        let request = match RequestLine::parse(line.trim()) {
            Ok(request) => request,
            Err(e) => {
                send(&mut stream, &WorkerReply::Error(e.to_string())).await?;
                send(&mut stream, &WorkerReply::End).await?;
                return Err(e.into());
            }
        };

        let _active = ActiveRequest::start(&self.active);
        let descriptor = RequestDescriptor::from(request);
        let simulated = self.config.simulated_duration(descriptor.estimated_duration);
        info!(
            "Executing {} {:?} (estimate {:?}, simulated {:?})",
            descriptor.kind, descriptor.raw_parameters, descriptor.estimated_duration, simulated
        );

        send(
            &mut stream,
            &WorkerReply::Started {
                kind: descriptor.kind.clone(),
                estimate: descriptor.estimated_duration,
            },
        )
        .await?;

        let step = simulated / PROGRESS_STEPS;
        for done in 1..=PROGRESS_STEPS {
            tokio::time::sleep(step).await;
            send(
                &mut stream,
                &WorkerReply::Progress {
                    step: done,
                    total: PROGRESS_STEPS,
                },
            )
            .await?;
        }

        send(
            &mut stream,
            &WorkerReply::Complete {
                kind: descriptor.kind,
            },
        )
        .await?;
        stream.get_mut().shutdown().await?;
        METRICS.worker.requests_served.inc();
        Ok(())
    }
}

async fn send<S>(stream: &mut BufReader<S>, reply: &WorkerReply) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let writer = stream.get_mut();
    writer.write_all(format!("{}\n", reply).as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn service() -> RequestService {
        RequestService::new(WorkerConfig {
            work_unit_millis: 10,
            ..WorkerConfig::default()
        })
    }

    async fn run(service: &RequestService, request: &str) -> (Result<()>, Vec<String>) {
        let (mut client, server): (DuplexStream, DuplexStream) = tokio::io::duplex(4096);
        client.write_all(request.as_bytes()).await.unwrap();

        let result = service.handle(server).await;
        let mut output = String::new();
        client.read_to_string(&mut output).await.unwrap();
        (result, output.lines().map(str::to_string).collect())
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_streams_progress_and_completes() {
        let service = service();
        let (result, lines) = run(&service, "COMPUTATION 5\n").await;

        assert!(result.is_ok());
        assert_eq!(lines.len(), 2 + PROGRESS_STEPS as usize);
        assert_eq!(lines[0], "STARTED COMPUTATION estimate=10s");
        assert_eq!(lines[1], "PROGRESS 1/4");
        assert_eq!(lines.last().unwrap(), "COMPLETE COMPUTATION");
        assert!(WorkerReply::is_terminal_line(lines.last().unwrap()));
        assert_eq!(service.active_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_requests_counted_while_running() {
        let service = service();
        let (mut client, server) = tokio::io::duplex(4096);
        client.write_all(b"VIDEO_STREAMING 10\n").await.unwrap();

        let running = {
            let service = service.clone();
            tokio::spawn(async move { service.handle(server).await })
        };

        // 30s estimate at 10ms per second of work
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(service.active_requests(), 1);

        running.await.unwrap().unwrap();
        assert_eq!(service.active_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecognized_kind_runs_to_completion() {
        let service = service();
        let (result, lines) = run(&service, "SEND_REPORT q3.pdf\n").await;

        assert!(result.is_ok());
        assert_eq!(lines[0], "STARTED SEND_REPORT estimate=1s");
        assert!(!WorkerReply::is_terminal_line(&lines[0]));
        assert_eq!(lines.last().unwrap(), "COMPLETE SEND_REPORT");
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_override_with_slow_work_unit_still_starts() {
        let service = RequestService::new(WorkerConfig {
            work_unit_millis: 2000,
            ..WorkerConfig::default()
        });
        let (client, server) = tokio::io::duplex(4096);
        let (reader, mut writer) = tokio::io::split(client);
        writer
            .write_all(b"COMPUTATION 10000000000000000000s\n")
            .await
            .unwrap();

        let running = {
            let service = service.clone();
            tokio::spawn(async move { service.handle(server).await })
        };

        let mut first = String::new();
        BufReader::new(reader).read_line(&mut first).await.unwrap();
        assert!(first.starts_with("STARTED COMPUTATION"), "got {:?}", first);
        assert_eq!(service.active_requests(), 1);

        running.abort();
        let aborted = running.await.unwrap_err();
        assert!(aborted.is_cancelled());
    }

    #[tokio::test]
    async fn test_blank_request_gets_error_and_end() {
        let service = service();
        let (result, lines) = run(&service, "   \n").await;

        assert!(result.is_err());
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("ERROR"));
        assert_eq!(lines[1], "END");
    }
}
