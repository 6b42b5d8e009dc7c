//! Line messages exchanged with the dispatcher and with workers

use crate::error::{ProtocolError, Result};
use crate::request::{RequestKind, RequestLine};
use std::fmt;
use std::time::Duration;

/// Balancing tag assumed when a join line does not carry one
pub const DEFAULT_BALANCING_TAG: &str = "dynamic";

/// Tag that the weighted policy penalizes
pub const STATIC_BALANCING_TAG: &str = "static";

/// Worker registration parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub balancing_tag: String,
    pub listen_port: u16,
}

impl JoinRequest {
    pub fn new(balancing_tag: impl Into<String>, listen_port: u16) -> Self {
        Self {
            balancing_tag: balancing_tag.into(),
            listen_port,
        }
    }
}

impl fmt::Display for JoinRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "join -v {} port={}", self.balancing_tag, self.listen_port)
    }
}

/// First line of a connection to the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    /// A worker registering itself
    Join(JoinRequest),

    /// A client asking where to send a request
    Request(RequestLine),

    /// Prometheus text exposition request
    Metrics,
}

impl Handshake {
    /// Parse a handshake line. `default_port` fills in a join without `port=`.
    pub fn parse(line: &str, default_port: u16) -> Result<Self> {
        let line = line.trim();
        let mut tokens = line.split_whitespace();
        let first = tokens.next().ok_or(ProtocolError::Empty)?;

        match first {
            "join" => parse_join(tokens, default_port).map(Handshake::Join),
            "REGISTER" => Ok(Handshake::Join(JoinRequest::new(
                DEFAULT_BALANCING_TAG,
                default_port,
            ))),
            "REQUEST" => {
                let rest = line[first.len()..].trim_start();
                RequestLine::parse(rest).map(Handshake::Request)
            }
            "METRICS" => Ok(Handshake::Metrics),
            _ => Err(ProtocolError::UnknownMessage(line.to_string())),
        }
    }
}

fn parse_join<'a>(mut tokens: impl Iterator<Item = &'a str>, default_port: u16) -> Result<JoinRequest> {
    let mut join = JoinRequest::new(DEFAULT_BALANCING_TAG, default_port);

    while let Some(token) = tokens.next() {
        if token == "-v" {
            let tag = tokens
                .next()
                .ok_or_else(|| ProtocolError::malformed_join("-v needs a balancing tag"))?;
            join.balancing_tag = tag.to_string();
        } else if let Some(value) = token.strip_prefix("port=") {
            join.listen_port = match value.parse::<u16>() {
                Ok(port) if port != 0 => port,
                _ => return Err(ProtocolError::malformed_join(format!("invalid port {:?}", value))),
            };
        } else {
            return Err(ProtocolError::malformed_join(format!("unexpected token {:?}", token)));
        }
    }

    Ok(join)
}

/// Messages a registered worker sends on its dispatcher connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMessage {
    /// `load=<n>`
    Load(u64),

    /// `ping`
    Ping,

    /// `goodbye`
    Goodbye,
}

impl WorkerMessage {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ProtocolError::Empty);
        }

        if let Some(value) = line.strip_prefix("load=") {
            return value
                .trim()
                .parse::<u64>()
                .map(WorkerMessage::Load)
                .map_err(|_| ProtocolError::InvalidLoad(value.to_string()));
        }

        match line {
            "ping" => Ok(WorkerMessage::Ping),
            "goodbye" => Ok(WorkerMessage::Goodbye),
            _ => Err(ProtocolError::UnknownMessage(line.to_string())),
        }
    }
}

impl fmt::Display for WorkerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerMessage::Load(load) => write!(f, "load={}", load),
            WorkerMessage::Ping => f.write_str("ping"),
            WorkerMessage::Goodbye => f.write_str("goodbye"),
        }
    }
}

/// Lines the dispatcher writes back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchReply {
    JoinAccepted,
    JoinRejected(String),
    ServerPort(u16),
    NoServerAvailable,
}

impl DispatchReply {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        if line == "join_accepted" {
            return Ok(DispatchReply::JoinAccepted);
        }
        if line == "NO_SERVER_AVAILABLE" {
            return Ok(DispatchReply::NoServerAvailable);
        }
        if let Some(reason) = line.strip_prefix("join_rejected") {
            return Ok(DispatchReply::JoinRejected(reason.trim().to_string()));
        }
        if let Some(port) = line.strip_prefix("SERVER_PORT ") {
            return port
                .trim()
                .parse()
                .map(DispatchReply::ServerPort)
                .map_err(|_| ProtocolError::UnexpectedReply(line.to_string()));
        }
        Err(ProtocolError::UnexpectedReply(line.to_string()))
    }
}

impl fmt::Display for DispatchReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchReply::JoinAccepted => f.write_str("join_accepted"),
            DispatchReply::JoinRejected(reason) => write!(f, "join_rejected {}", reason),
            DispatchReply::ServerPort(port) => write!(f, "SERVER_PORT {}", port),
            DispatchReply::NoServerAvailable => f.write_str("NO_SERVER_AVAILABLE"),
        }
    }
}

/// Lines a worker writes to a client executing a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerReply {
    Started { kind: RequestKind, estimate: Duration },
    Progress { step: u32, total: u32 },
    Complete { kind: RequestKind },
    Error(String),
    End,
}

impl WorkerReply {
    /// Terminal lines start with a completion or end marker
    pub fn is_terminal_line(line: &str) -> bool {
        matches!(line.split_whitespace().next(), Some("COMPLETE" | "END"))
    }
}

impl fmt::Display for WorkerReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerReply::Started { kind, estimate } => {
                write!(f, "STARTED {} estimate={}s", kind, estimate.as_secs_f64())
            }
            WorkerReply::Progress { step, total } => write!(f, "PROGRESS {}/{}", step, total),
            WorkerReply::Complete { kind } => write!(f, "COMPLETE {}", kind),
            WorkerReply::Error(reason) => write!(f, "ERROR {}", reason),
            WorkerReply::End => f.write_str("END"),
        }
    }
}
