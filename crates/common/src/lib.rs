//! Switchyard common library
//!
//! This crate contains shared code used across Switchyard components.

pub mod config;
pub mod error;
pub mod metrics;
pub mod shutdown;
pub mod telemetry;

// Re-export commonly used types
pub use config::{BalancingStrategy, SwitchyardConfig};
pub use error::{Result, SwitchyardError};
pub use metrics::{MetricsRegistry, METRICS};
