//! Request kinds and duration estimation
//!
//! A request line is a kind token followed by free-form parameters, e.g.
//! `COMPUTATION 5` or `FILE_TRANSFER document1.pdf`. Clients send it to the
//! dispatcher prefixed with `REQUEST`, and to the chosen worker as-is.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Category of a client request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    DirectoryListing,
    FileTransfer,
    Computation,
    VideoStreaming,
    /// Any other kind token; routed like a directory listing
    Unrecognized(String),
}

impl RequestKind {
    /// Parse a kind token (case-insensitive)
    pub fn from_token(token: &str) -> Self {
        match token.to_ascii_uppercase().as_str() {
            "DIRECTORY" | "DIRECTORY_LISTING" | "LIST" => RequestKind::DirectoryListing,
            "FILE_TRANSFER" => RequestKind::FileTransfer,
            "COMPUTATION" => RequestKind::Computation,
            "VIDEO_STREAMING" => RequestKind::VideoStreaming,
            _ => RequestKind::Unrecognized(token.to_string()),
        }
    }

    /// Base duration estimate for this kind
    pub fn base_duration(&self) -> Duration {
        let secs = match self {
            RequestKind::DirectoryListing | RequestKind::Unrecognized(_) => 1,
            RequestKind::FileTransfer => 5,
            RequestKind::Computation => 10,
            RequestKind::VideoStreaming => 30,
        };
        Duration::from_secs(secs)
    }

    /// Heavy requests are routed by least-load
    pub fn is_heavy(&self) -> bool {
        matches!(self, RequestKind::Computation | RequestKind::VideoStreaming)
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::DirectoryListing => f.write_str("DIRECTORY"),
            RequestKind::FileTransfer => f.write_str("FILE_TRANSFER"),
            RequestKind::Computation => f.write_str("COMPUTATION"),
            RequestKind::VideoStreaming => f.write_str("VIDEO_STREAMING"),
            RequestKind::Unrecognized(token) => f.write_str(token),
        }
    }
}

/// A request line as it travels over the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLine {
    pub kind: RequestKind,
    pub parameters: Vec<String>,
}

impl RequestLine {
    /// Create a request line from a kind and parameters
    pub fn new(kind: RequestKind, parameters: Vec<String>) -> Self {
        Self { kind, parameters }
    }

    /// Parse `<kind> [parameters...]`
    pub fn parse(line: &str) -> Result<Self> {
        let mut tokens = line.split_whitespace();
        let kind = tokens
            .next()
            .map(RequestKind::from_token)
            .ok_or(ProtocolError::MissingRequestKind)?;

        Ok(Self {
            kind,
            parameters: tokens.map(str::to_string).collect(),
        })
    }
}

impl fmt::Display for RequestLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        for param in &self.parameters {
            write!(f, " {}", param)?;
        }
        Ok(())
    }
}

/// Per-request routing input, never persisted
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub kind: RequestKind,
    pub raw_parameters: Vec<String>,
    pub estimated_duration: Duration,
}

impl RequestDescriptor {
    /// Build a descriptor, deriving the estimated duration
    pub fn new(kind: RequestKind, raw_parameters: Vec<String>) -> Self {
        let estimated_duration = estimate_duration(&kind, &raw_parameters);
        Self {
            kind,
            raw_parameters,
            estimated_duration,
        }
    }

    pub fn is_heavy(&self) -> bool {
        self.kind.is_heavy()
    }
}

impl From<RequestLine> for RequestDescriptor {
    fn from(line: RequestLine) -> Self {
        RequestDescriptor::new(line.kind, line.parameters)
    }
}

/// Unit suffixes accepted in duration overrides, with their length in millis.
/// Longer suffixes come first so `5ms` is not read as `5m` + `s`.
const DURATION_SUFFIXES: &[(&str, f64)] = &[
    ("ms", 1.0),
    ("secs", 1_000.0),
    ("sec", 1_000.0),
    ("mins", 60_000.0),
    ("min", 60_000.0),
    ("s", 1_000.0),
    ("m", 60_000.0),
    ("h", 3_600_000.0),
];

/// Estimate how long a request will run.
///
/// The first parameter carrying a unit suffix (`30s`, `2min`, `500ms`) with a
/// finite non-negative number overrides the kind's base estimate. Anything
/// else falls back to the base estimate.
pub fn estimate_duration(kind: &RequestKind, parameters: &[String]) -> Duration {
    parameters
        .iter()
        .find_map(|token| parse_duration_token(token))
        .unwrap_or_else(|| kind.base_duration())
}

fn parse_duration_token(token: &str) -> Option<Duration> {
    let token = token.to_ascii_lowercase();
    DURATION_SUFFIXES.iter().find_map(|(suffix, millis)| {
        let number = token.strip_suffix(suffix)?;
        let value: f64 = number.parse().ok()?;
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(value * millis / 1_000.0).ok()
    })
}
