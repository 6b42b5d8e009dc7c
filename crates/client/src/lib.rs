//! Switchyard Client
//!
//! Asks the dispatcher for a worker, then executes the request against the
//! assigned worker. Also drives concurrent load tests.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use switchyard_common::config::ClientConfig;
use switchyard_common::{Result, SwitchyardError};
use switchyard_proto::{DispatchReply, ProtocolError, RequestKind, RequestLine, WorkerReply};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of executing one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The dispatcher had no worker to offer
    NoServerAvailable,
    /// A worker ran the request; `lines` is everything it wrote
    Served { port: u16, lines: Vec<String> },
}

impl RequestOutcome {
    /// Served and the last line is a completion marker
    pub fn is_complete(&self) -> bool {
        match self {
            RequestOutcome::Served { lines, .. } => lines
                .last()
                .map(|line| line.starts_with("COMPLETE"))
                .unwrap_or(false),
            RequestOutcome::NoServerAvailable => false,
        }
    }
}

/// Talks to the dispatcher and the workers it assigns
#[derive(Debug, Clone)]
pub struct DispatcherClient {
    config: Arc<ClientConfig>,
}

impl DispatcherClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Ask the dispatcher which worker port should handle `request`
    pub async fn assign(&self, request: &RequestLine) -> Result<Option<u16>> {
        let address = &self.config.dispatcher_address;
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| SwitchyardError::connection(format!("Failed to connect to {}: {}", address, e)))?;
        let mut stream = BufReader::new(stream);

        stream
            .get_mut()
            .write_all(format!("REQUEST {}\n", request).as_bytes())
            .await?;

        let mut reply = String::new();
        if stream.read_line(&mut reply).await? == 0 {
            return Err(SwitchyardError::connection("Dispatcher closed without replying"));
        }

        match DispatchReply::parse(&reply)? {
            DispatchReply::ServerPort(port) => Ok(Some(port)),
            DispatchReply::NoServerAvailable => Ok(None),
            other => Err(ProtocolError::UnexpectedReply(other.to_string()).into()),
        }
    }

    /// Assign `request`, then run it on the assigned worker
    pub async fn execute(&self, request: &RequestLine) -> Result<RequestOutcome> {
        let request_id = Uuid::new_v4();
        let Some(port) = self.assign(request).await? else {
            info!(%request_id, "No server available for {}", request);
            return Ok(RequestOutcome::NoServerAvailable);
        };
        debug!(%request_id, "{} assigned to port {}", request, port);

        let host = self.config.worker_host.as_str();
        let stream = TcpStream::connect((host, port)).await.map_err(|e| {
            SwitchyardError::worker_unavailable(format!("Worker {}:{} unreachable: {}", host, port, e))
        })?;
        let mut stream = BufReader::new(stream);
        stream
            .get_mut()
            .write_all(format!("{}\n", request).as_bytes())
            .await?;

        let mut lines = Vec::new();
        let mut reader = stream.lines();
        while lines.len() < self.config.max_response_lines {
            let Some(line) = reader.next_line().await? else {
                break;
            };
            debug!(%request_id, "worker {}: {}", port, line);
            let terminal = WorkerReply::is_terminal_line(&line);
            lines.push(line);
            if terminal {
                break;
            }
        }

        info!(%request_id, "{} finished on port {} ({} lines)", request, port, lines.len());
        Ok(RequestOutcome::Served { port, lines })
    }
}

/// Requests a load test cycles through
pub fn load_test_mix() -> Vec<RequestLine> {
    vec![
        RequestLine::new(RequestKind::DirectoryListing, Vec::new()),
        RequestLine::new(RequestKind::FileTransfer, vec!["document1.pdf".to_string()]),
        RequestLine::new(RequestKind::Computation, vec!["5".to_string()]),
        RequestLine::new(RequestKind::VideoStreaming, vec!["10".to_string()]),
    ]
}

/// Summary of a load test run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadTestReport {
    pub completed: usize,
    pub unassigned: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
    /// Served requests per worker port
    pub per_port: BTreeMap<u16, usize>,
}

impl LoadTestReport {
    fn record(&mut self, outcome: &RequestOutcome) {
        match outcome {
            RequestOutcome::NoServerAvailable => self.unassigned += 1,
            RequestOutcome::Served { port, .. } => {
                *self.per_port.entry(*port).or_default() += 1;
                if outcome.is_complete() {
                    self.completed += 1;
                } else {
                    self.failed += 1;
                }
            }
        }
    }

    pub fn total(&self) -> usize {
        self.completed + self.unassigned + self.failed
    }
}

/// Run `total` requests from [`load_test_mix`], at most `concurrency` at a time
pub async fn run_load_test(client: DispatcherClient, concurrency: usize, total: usize) -> Result<LoadTestReport> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();
    let started = Instant::now();

    for request in load_test_mix().into_iter().cycle().take(total) {
        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .map_err(|e| SwitchyardError::internal(format!("Load test semaphore closed: {}", e)))?;
        let client = client.clone();
        tasks.spawn(async move {
            let _permit = permit;
            client.execute(&request).await
        });
    }

    let mut report = LoadTestReport::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(outcome)) => report.record(&outcome),
            Ok(Err(e)) => {
                warn!("Request failed: {}", e);
                report.failed += 1;
            }
            Err(e) => {
                warn!("Request task panicked: {}", e);
                report.failed += 1;
            }
        }
    }
    report.elapsed_ms = started.elapsed().as_millis() as u64;

    info!(
        "Load test finished: {} completed, {} unassigned, {} failed in {} ms",
        report.completed, report.unassigned, report.failed, report.elapsed_ms
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_test_mix_wire_form() {
        let lines: Vec<String> = load_test_mix().iter().map(ToString::to_string).collect();
        assert_eq!(
            lines,
            vec![
                "DIRECTORY",
                "FILE_TRANSFER document1.pdf",
                "COMPUTATION 5",
                "VIDEO_STREAMING 10"
            ]
        );
    }

    #[test]
    fn test_outcome_completion() {
        let done = RequestOutcome::Served {
            port: 7000,
            lines: vec!["STARTED DIRECTORY estimate=1s".into(), "COMPLETE DIRECTORY".into()],
        };
        let errored = RequestOutcome::Served {
            port: 7000,
            lines: vec!["ERROR missing request kind".into(), "END".into()],
        };
        assert!(done.is_complete());
        assert!(!errored.is_complete());
        assert!(!RequestOutcome::NoServerAvailable.is_complete());
    }

    #[test]
    fn test_report_counts_and_json() {
        let mut report = LoadTestReport::default();
        report.record(&RequestOutcome::NoServerAvailable);
        report.record(&RequestOutcome::Served {
            port: 7001,
            lines: vec!["COMPLETE COMPUTATION".into()],
        });
        report.record(&RequestOutcome::Served {
            port: 7001,
            lines: vec!["PROGRESS 1/4".into()],
        });

        assert_eq!(report.completed, 1);
        assert_eq!(report.unassigned, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.total(), 3);

        let json: serde_json::Value = serde_json::to_value(&report).unwrap();
        assert_eq!(json["per_port"]["7001"], 2);
        assert_eq!(json["completed"], 1);
    }

    #[tokio::test]
    async fn test_assign_fails_without_dispatcher() {
        let addr = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();
        let client = DispatcherClient::new(ClientConfig {
            dispatcher_address: addr.to_string(),
            ..ClientConfig::default()
        });

        let err = client.assign(&load_test_mix()[0]).await.unwrap_err();
        assert!(err.is_disconnect());
    }
}
