//! Switchyard line protocol
//!
//! Plain-text, newline-terminated messages spoken between workers, clients
//! and the dispatcher.

pub mod error;
pub mod messages;
pub mod request;

pub use error::ProtocolError;
pub use messages::{
    DispatchReply, Handshake, JoinRequest, WorkerMessage, WorkerReply, DEFAULT_BALANCING_TAG,
    STATIC_BALANCING_TAG,
};
pub use request::{estimate_duration, RequestDescriptor, RequestKind, RequestLine};
