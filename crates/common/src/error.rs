//! Common error types for Switchyard
//!
//! This module defines the error type shared by the dispatcher, the simulated
//! worker and the client. Per-connection failures never escape their task, so
//! most variants end up in a log line rather than a process exit.

use std::net::AddrParseError;
use switchyard_proto::ProtocolError;
use thiserror::Error;

/// Main error type for Switchyard
#[derive(Error, Debug)]
pub enum SwitchyardError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Layered configuration loading errors
    #[error("Configuration loading error: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    /// YAML (de)serialization errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire protocol errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Connection errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// Worker unavailable
    #[error("Worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Parsing error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<AddrParseError> for SwitchyardError {
    fn from(err: AddrParseError) -> Self {
        SwitchyardError::Parse(err.to_string())
    }
}

impl SwitchyardError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        SwitchyardError::Config(msg.into())
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        SwitchyardError::Connection(msg.into())
    }

    /// Create a worker unavailable error
    pub fn worker_unavailable(msg: impl Into<String>) -> Self {
        SwitchyardError::WorkerUnavailable(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        SwitchyardError::Timeout(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        SwitchyardError::Internal(msg.into())
    }

    /// Whether the error means the peer went away rather than misbehaved
    pub fn is_disconnect(&self) -> bool {
        match self {
            SwitchyardError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            SwitchyardError::Connection(_) => true,
            _ => false,
        }
    }
}

/// Result type alias for Switchyard operations
pub type Result<T> = std::result::Result<T, SwitchyardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_conversion() {
        let err: SwitchyardError = ProtocolError::InvalidLoad("abc".to_string()).into();
        assert!(matches!(err, SwitchyardError::Protocol(_)));
        assert_eq!(err.to_string(), "Protocol error: invalid load value: abc");
    }

    #[test]
    fn test_disconnect_classification() {
        let reset = SwitchyardError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(reset.is_disconnect());
        assert!(SwitchyardError::connection("closed").is_disconnect());
        assert!(!SwitchyardError::config("bad").is_disconnect());
    }
}
