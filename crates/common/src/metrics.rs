//! Metrics collection for Switchyard
//!
//! This module provides Prometheus metrics for the dispatcher and the
//! simulated worker. The dispatcher exposes them through the `METRICS`
//! handshake on its listening port.

use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Metrics registry for Switchyard
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub dispatcher: DispatcherMetrics,
    pub worker: WorkerMetrics,
}

/// Dispatcher-side metrics
#[derive(Debug, Clone)]
pub struct DispatcherMetrics {
    /// Workers accepted into the registry
    pub workers_registered: IntCounter,

    /// Workers removed, labelled by reason
    pub workers_removed: IntCounterVec,

    /// Workers currently registered
    pub active_workers: IntGauge,

    /// Routed requests, labelled by the policy that picked the worker
    pub requests_routed: IntCounterVec,

    /// Requests answered with NO_SERVER_AVAILABLE
    pub no_worker_available: IntCounter,

    /// Lines that could not be parsed
    pub malformed_messages: IntCounter,

    /// Estimated duration of routed requests
    pub estimated_duration: Histogram,
}

/// Simulated worker metrics
#[derive(Debug, Clone)]
pub struct WorkerMetrics {
    /// Requests completed
    pub requests_served: IntCounter,

    /// Requests currently executing
    pub active_requests: IntGauge,

    /// Load reports sent to the dispatcher
    pub load_reports: IntCounter,
}

lazy_static! {
    /// Global metrics registry instance
    pub static ref METRICS: MetricsRegistry =
        MetricsRegistry::new().expect("static metric definitions are valid");
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        // Dispatcher metrics
        let workers_registered = IntCounter::new(
            "switchyard_workers_registered_total",
            "Total number of workers accepted into the registry",
        )?;

        let workers_removed = IntCounterVec::new(
            Opts::new(
                "switchyard_workers_removed_total",
                "Total number of workers removed from the registry",
            ),
            &["reason"],
        )?;

        let active_workers = IntGauge::new(
            "switchyard_active_workers",
            "Current number of registered workers",
        )?;

        let requests_routed = IntCounterVec::new(
            Opts::new(
                "switchyard_requests_routed_total",
                "Total number of client requests routed to a worker",
            ),
            &["policy"],
        )?;

        let no_worker_available = IntCounter::new(
            "switchyard_no_worker_available_total",
            "Total client requests answered with NO_SERVER_AVAILABLE",
        )?;

        let malformed_messages = IntCounter::new(
            "switchyard_malformed_messages_total",
            "Total protocol lines that could not be parsed",
        )?;

        let estimated_duration = Histogram::with_opts(
            HistogramOpts::new(
                "switchyard_request_estimated_duration_seconds",
                "Estimated duration of routed client requests",
            )
            .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]),
        )?;

        // Worker metrics
        let requests_served = IntCounter::new(
            "switchyard_worker_requests_served_total",
            "Total requests completed by this worker",
        )?;

        let active_requests = IntGauge::new(
            "switchyard_worker_active_requests",
            "Current number of requests executing on this worker",
        )?;

        let load_reports = IntCounter::new(
            "switchyard_worker_load_reports_total",
            "Total load reports sent to the dispatcher",
        )?;

        // Register all metrics
        registry.register(Box::new(workers_registered.clone()))?;
        registry.register(Box::new(workers_removed.clone()))?;
        registry.register(Box::new(active_workers.clone()))?;
        registry.register(Box::new(requests_routed.clone()))?;
        registry.register(Box::new(no_worker_available.clone()))?;
        registry.register(Box::new(malformed_messages.clone()))?;
        registry.register(Box::new(estimated_duration.clone()))?;

        registry.register(Box::new(requests_served.clone()))?;
        registry.register(Box::new(active_requests.clone()))?;
        registry.register(Box::new(load_reports.clone()))?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        let dispatcher = DispatcherMetrics {
            workers_registered,
            workers_removed,
            active_workers,
            requests_routed,
            no_worker_available,
            malformed_messages,
            estimated_duration,
        };

        let worker = WorkerMetrics {
            requests_served,
            active_requests,
            load_reports,
        };

        Ok(MetricsRegistry {
            registry,
            dispatcher,
            worker,
        })
    }

    /// Gather all metrics as text
    pub fn gather(&self) -> prometheus::Result<String> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registry() {
        let metrics = MetricsRegistry::new().unwrap();

        metrics.dispatcher.workers_registered.inc();
        metrics.dispatcher.active_workers.set(3);
        metrics
            .dispatcher
            .requests_routed
            .with_label_values(&["least_load"])
            .inc();
        metrics.worker.active_requests.inc();

        let output = metrics.gather().unwrap();
        assert!(output.contains("switchyard_workers_registered_total 1"));
        assert!(output.contains("switchyard_active_workers 3"));
        assert!(output.contains("policy=\"least_load\""));
        assert!(output.contains("switchyard_worker_active_requests 1"));
    }
}
