//! Switchyard Dispatcher
//!
//! Routes client requests to registered workers. Workers join over the same
//! line protocol and report their load; a health monitor evicts workers whose
//! heartbeat goes stale.

pub mod handler;
pub mod health;
pub mod registry;
pub mod router;
pub mod server;

pub use handler::{ConnectionHandler, Departure};
pub use health::HealthMonitor;
pub use registry::{Registry, WorkerEntry, WorkerId};
pub use router::{Policy, Router, RoutingDecision};
pub use server::Dispatcher;
