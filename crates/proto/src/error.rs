//! Protocol error types
//!
//! Every variant describes a line that could not be understood. None of them
//! is fatal to a connection; callers decide whether to reply, log or ignore.

use thiserror::Error;

/// Errors produced while parsing protocol lines
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Blank line where a message was expected
    #[error("empty message")]
    Empty,

    /// Line does not match any known message
    #[error("unknown message: {0}")]
    UnknownMessage(String),

    /// Join line with unusable parameters
    #[error("malformed join: {0}")]
    MalformedJoin(String),

    /// `load=` with a value that is not a non-negative integer
    #[error("invalid load value: {0}")]
    InvalidLoad(String),

    /// `REQUEST` without a kind token
    #[error("request is missing a kind")]
    MissingRequestKind,

    /// Reply line the client side does not recognize
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}

impl ProtocolError {
    /// Create a malformed join error
    pub fn malformed_join(reason: impl Into<String>) -> Self {
        ProtocolError::MalformedJoin(reason.into())
    }
}

/// Result type alias for protocol parsing
pub type Result<T> = std::result::Result<T, ProtocolError>;
