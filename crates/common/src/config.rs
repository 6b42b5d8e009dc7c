//! Configuration structures for Switchyard
//!
//! This module defines the configuration shared by the dispatcher, the
//! simulated worker and the load-test client. Configurations are read from
//! YAML files and can be overridden by `SWITCHYARD__SECTION__KEY` environment
//! variables; the binaries apply command-line flags on top.

use crate::error::{Result, SwitchyardError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Environment prefix for configuration overrides
pub const ENV_PREFIX: &str = "SWITCHYARD";

/// Top-level configuration for Switchyard components
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwitchyardConfig {
    /// Dispatcher binding address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Dispatcher listening port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Dispatcher-specific configuration
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Simulated worker configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Client and load-test configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Routing strategy used by the dispatcher
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BalancingStrategy {
    /// Heavy requests by least-load, light requests by round-robin
    #[default]
    RequestAware,

    /// Always pick the least loaded worker
    LeastLoad,

    /// Always cycle through workers
    RoundRobin,

    /// Least-load with a penalty on workers tagged `static`
    Weighted,
}

impl BalancingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalancingStrategy::RequestAware => "request_aware",
            BalancingStrategy::LeastLoad => "least_load",
            BalancingStrategy::RoundRobin => "round_robin",
            BalancingStrategy::Weighted => "weighted",
        }
    }
}

impl fmt::Display for BalancingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BalancingStrategy {
    type Err = SwitchyardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "request_aware" => Ok(BalancingStrategy::RequestAware),
            "least_load" => Ok(BalancingStrategy::LeastLoad),
            "round_robin" => Ok(BalancingStrategy::RoundRobin),
            "weighted" => Ok(BalancingStrategy::Weighted),
            other => Err(SwitchyardError::config(format!("Unknown balancing strategy: {}", other))),
        }
    }
}

/// Dispatcher-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatcherConfig {
    /// Seconds between health monitor scans
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,

    /// Seconds without a heartbeat before a worker is evicted
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,

    /// Routing strategy
    #[serde(default)]
    pub strategy: BalancingStrategy,

    /// Score multiplier for `static` workers under the weighted strategy
    #[serde(default = "default_static_tag_penalty")]
    pub static_tag_penalty: f64,

    /// Listen port assumed for a join line without `port=`
    #[serde(default = "default_worker_port")]
    pub default_worker_port: u16,

    /// Seconds an unregistered connection may stay silent (0 = no limit)
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
}

/// Simulated worker configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfig {
    /// Address the worker's request port binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Dispatcher address to join
    #[serde(default = "default_dispatcher_address")]
    pub dispatcher_address: String,

    /// Port clients dial to reach this worker
    #[serde(default = "default_worker_port")]
    pub listen_port: u16,

    /// Advisory balancing tag sent at join time
    #[serde(default = "default_balancing_tag")]
    pub balancing_tag: String,

    /// Seconds between load reports
    #[serde(default = "default_load_report_interval")]
    pub load_report_interval_secs: u64,

    /// Join attempts before giving up
    #[serde(default = "default_join_retry_attempts")]
    pub join_retry_attempts: u32,

    /// Delay between join attempts in milliseconds
    #[serde(default = "default_join_retry_delay")]
    pub join_retry_delay_ms: u64,

    /// Wall-clock milliseconds simulated per second of estimated work
    #[serde(default = "default_work_unit")]
    pub work_unit_millis: u64,
}

/// Client and load-test configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Dispatcher address
    #[serde(default = "default_dispatcher_address")]
    pub dispatcher_address: String,

    /// Host that assigned worker ports are dialed on
    #[serde(default = "default_worker_host")]
    pub worker_host: String,

    /// Concurrent requests in a load test
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Total requests in a load test
    #[serde(default = "default_total_requests")]
    pub total_requests: usize,

    /// Maximum worker response lines read per request
    #[serde(default = "default_max_response_lines")]
    pub max_response_lines: usize,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable the METRICS handshake on the dispatcher port
    #[serde(default = "default_metrics")]
    pub enable_metrics: bool,
}

/// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9000
}

fn default_health_check_interval() -> u64 {
    10
}

fn default_heartbeat_timeout() -> u64 {
    15
}

fn default_static_tag_penalty() -> f64 {
    1.2
}

fn default_worker_port() -> u16 {
    7000
}

fn default_handshake_timeout() -> u64 {
    30
}

fn default_dispatcher_address() -> String {
    "127.0.0.1:9000".to_string()
}

fn default_balancing_tag() -> String {
    switchyard_proto::DEFAULT_BALANCING_TAG.to_string()
}

fn default_load_report_interval() -> u64 {
    5
}

fn default_join_retry_attempts() -> u32 {
    5
}

fn default_join_retry_delay() -> u64 {
    1000
}

fn default_work_unit() -> u64 {
    100
}

fn default_worker_host() -> String {
    "127.0.0.1".to_string()
}

fn default_concurrency() -> usize {
    4
}

fn default_total_requests() -> usize {
    8
}

fn default_max_response_lines() -> usize {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics() -> bool {
    true
}

impl Default for SwitchyardConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            dispatcher: DispatcherConfig::default(),
            worker: WorkerConfig::default(),
            client: ClientConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: default_health_check_interval(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            strategy: BalancingStrategy::default(),
            static_tag_penalty: default_static_tag_penalty(),
            default_worker_port: default_worker_port(),
            handshake_timeout_secs: default_handshake_timeout(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            dispatcher_address: default_dispatcher_address(),
            listen_port: default_worker_port(),
            balancing_tag: default_balancing_tag(),
            load_report_interval_secs: default_load_report_interval(),
            join_retry_attempts: default_join_retry_attempts(),
            join_retry_delay_ms: default_join_retry_delay(),
            work_unit_millis: default_work_unit(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            dispatcher_address: default_dispatcher_address(),
            worker_host: default_worker_host(),
            concurrency: default_concurrency(),
            total_requests: default_total_requests(),
            max_response_lines: default_max_response_lines(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            enable_metrics: default_metrics(),
        }
    }
}

impl DispatcherConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// `None` when the handshake may wait forever
    pub fn handshake_timeout(&self) -> Option<Duration> {
        (self.handshake_timeout_secs > 0).then(|| Duration::from_secs(self.handshake_timeout_secs))
    }
}

impl WorkerConfig {
    pub fn load_report_interval(&self) -> Duration {
        Duration::from_secs(self.load_report_interval_secs)
    }

    pub fn join_retry_delay(&self) -> Duration {
        Duration::from_millis(self.join_retry_delay_ms)
    }

    /// Wall-clock time to simulate the given estimate, saturating at
    /// `Duration::MAX`
    pub fn simulated_duration(&self, estimate: Duration) -> Duration {
        let factor = self.work_unit_millis as f64 / 1000.0;
        Duration::try_from_secs_f64(estimate.as_secs_f64() * factor).unwrap_or(Duration::MAX)
    }
}

impl SwitchyardConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            SwitchyardError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config: SwitchyardConfig = serde_yaml::from_str(&content).map_err(|e| {
            SwitchyardError::Config(format!("Failed to parse config file {}: {}", path.display(), e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load layered configuration: defaults, then the optional YAML file,
    /// then `SWITCHYARD__SECTION__KEY` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&SwitchyardConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let config: SwitchyardConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Dispatcher listening address
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.bind_address, self.port).parse()?)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let dispatcher = &self.dispatcher;
        if dispatcher.health_check_interval_secs == 0 {
            return Err(SwitchyardError::config("health_check_interval_secs must be positive"));
        }
        if dispatcher.heartbeat_timeout_secs == 0 {
            return Err(SwitchyardError::config("heartbeat_timeout_secs must be positive"));
        }
        if !dispatcher.static_tag_penalty.is_finite() || dispatcher.static_tag_penalty < 0.0 {
            return Err(SwitchyardError::config(format!(
                "Invalid static_tag_penalty: {}",
                dispatcher.static_tag_penalty
            )));
        }
        if dispatcher.default_worker_port == 0 {
            return Err(SwitchyardError::config("default_worker_port must be non-zero"));
        }

        let worker = &self.worker;
        if worker.listen_port == 0 {
            return Err(SwitchyardError::config("worker listen_port must be non-zero"));
        }
        if worker.balancing_tag.is_empty() || worker.balancing_tag.contains(char::is_whitespace) {
            return Err(SwitchyardError::config(format!(
                "Invalid balancing tag: {:?}",
                worker.balancing_tag
            )));
        }
        if worker.load_report_interval_secs == 0 {
            return Err(SwitchyardError::config("load_report_interval_secs must be positive"));
        }
        if worker.join_retry_attempts == 0 {
            return Err(SwitchyardError::config("join_retry_attempts must be at least 1"));
        }

        let client = &self.client;
        if client.concurrency == 0 || client.max_response_lines == 0 {
            return Err(SwitchyardError::config(
                "client concurrency and max_response_lines must be positive",
            ));
        }

        Ok(())
    }
}
