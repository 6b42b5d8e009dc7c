//! Request routing and load balancing
//!
//! This module decides which worker receives a client request. Decisions are
//! made over an immutable registry snapshot; the router never locks or mutates
//! the registry. Its only state is the round-robin cursor.

use crate::registry::WorkerEntry;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use switchyard_common::BalancingStrategy;
use switchyard_proto::{RequestDescriptor, STATIC_BALANCING_TAG};
use tracing::debug;

/// Policy that produced a routing decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    LeastLoad,
    RoundRobin,
    Weighted,
}

impl Policy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Policy::LeastLoad => "least_load",
            Policy::RoundRobin => "round_robin",
            Policy::Weighted => "weighted",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chosen worker and the policy that chose it
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingDecision {
    pub worker: WorkerEntry,
    pub policy: Policy,
}

/// Router for distributing requests across workers
pub struct Router {
    strategy: BalancingStrategy,

    /// Score multiplier applied to `static` workers by the weighted policy
    static_penalty: f64,

    /// Round-robin position, advanced once per round-robin decision
    cursor: AtomicUsize,
}

impl Router {
    /// Create a new router
    pub fn new(strategy: BalancingStrategy, static_penalty: f64) -> Self {
        Self {
            strategy,
            static_penalty,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn strategy(&self) -> BalancingStrategy {
        self.strategy
    }

    /// Pick a worker for `request`, or `None` if the snapshot is empty
    pub fn route(&self, snapshot: &[WorkerEntry], request: &RequestDescriptor) -> Option<RoutingDecision> {
        let decision = match self.strategy {
            BalancingStrategy::RequestAware if request.is_heavy() => self.by_least_load(snapshot),
            BalancingStrategy::RequestAware | BalancingStrategy::RoundRobin => self
                .by_round_robin(snapshot)
                .or_else(|| self.by_least_load(snapshot)),
            BalancingStrategy::LeastLoad => self.by_least_load(snapshot),
            BalancingStrategy::Weighted => weighted(snapshot, self.static_penalty).map(|worker| {
                RoutingDecision {
                    worker: worker.clone(),
                    policy: Policy::Weighted,
                }
            }),
        };

        if let Some(decision) = &decision {
            debug!(
                "Routed {} (estimate {:?}) to {} port={} load={} via {}",
                request.kind,
                request.estimated_duration,
                decision.worker.id,
                decision.worker.listen_port,
                decision.worker.current_load,
                decision.policy
            );
        }

        decision
    }

    fn by_least_load(&self, snapshot: &[WorkerEntry]) -> Option<RoutingDecision> {
        least_load(snapshot).map(|worker| RoutingDecision {
            worker: worker.clone(),
            policy: Policy::LeastLoad,
        })
    }

    fn by_round_robin(&self, snapshot: &[WorkerEntry]) -> Option<RoutingDecision> {
        if snapshot.is_empty() {
            return None;
        }
        let cursor = self.cursor.fetch_add(1, Ordering::Relaxed);
        round_robin(snapshot, cursor).map(|worker| RoutingDecision {
            worker: worker.clone(),
            policy: Policy::RoundRobin,
        })
    }
}

/// Entry with the smallest load; the first one in snapshot order on ties
pub fn least_load(snapshot: &[WorkerEntry]) -> Option<&WorkerEntry> {
    snapshot.iter().min_by_key(|worker| worker.current_load)
}

/// Entry at `cursor` modulo the snapshot size
pub fn round_robin(snapshot: &[WorkerEntry], cursor: usize) -> Option<&WorkerEntry> {
    if snapshot.is_empty() {
        return None;
    }
    snapshot.get(cursor % snapshot.len())
}

/// Weighted score of a worker; lower is better
pub fn weighted_score(worker: &WorkerEntry, static_penalty: f64) -> f64 {
    let load = worker.current_load as f64;
    if worker.balancing_tag == STATIC_BALANCING_TAG {
        load * static_penalty
    } else {
        load
    }
}

/// Entry with the lowest weighted score; the first one in snapshot order on ties
pub fn weighted(snapshot: &[WorkerEntry], static_penalty: f64) -> Option<&WorkerEntry> {
    let mut best: Option<(&WorkerEntry, f64)> = None;
    for worker in snapshot {
        let score = weighted_score(worker, static_penalty);
        match best {
            Some((_, best_score)) if score >= best_score => {}
            _ => best = Some((worker, score)),
        }
    }
    best.map(|(worker, _)| worker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use switchyard_proto::{RequestKind, RequestLine};
    use tokio_util::sync::CancellationToken;

    fn registry_with(workers: &[(u16, u64, &str)]) -> Registry {
        let registry = Registry::new();
        for &(port, load, tag) in workers {
            let id = registry.register(port, tag, "peer", CancellationToken::new());
            registry.update_load(id, load);
        }
        registry
    }

    fn request(line: &str) -> RequestDescriptor {
        RequestLine::parse(line).unwrap().into()
    }

    #[test]
    fn test_heavy_request_goes_to_least_loaded() {
        let registry = registry_with(&[(7001, 5, "dynamic"), (7002, 2, "dynamic"), (7003, 8, "dynamic")]);
        let router = Router::new(BalancingStrategy::RequestAware, 1.2);

        let decision = router
            .route(&registry.snapshot(), &request("COMPUTATION 3"))
            .unwrap();
        assert_eq!(decision.worker.listen_port, 7002);
        assert_eq!(decision.worker.current_load, 2);
        assert_eq!(decision.policy, Policy::LeastLoad);
    }

    #[test]
    fn test_least_load_tie_goes_to_first() {
        let registry = registry_with(&[(7001, 4, "dynamic"), (7002, 1, "dynamic"), (7003, 1, "dynamic")]);
        let snapshot = registry.snapshot();
        assert_eq!(least_load(&snapshot).unwrap().listen_port, 7002);
        assert!(least_load(&[]).is_none());
    }

    #[test]
    fn test_empty_snapshot_has_no_decision() {
        let router = Router::new(BalancingStrategy::RequestAware, 1.2);
        for line in ["COMPUTATION 5", "DIRECTORY", "FILE_TRANSFER a.pdf", "PRINT x"] {
            assert!(router.route(&[], &request(line)).is_none());
        }
        assert_eq!(router.cursor.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_light_requests_alternate() {
        let registry = registry_with(&[(7001, 0, "dynamic"), (7002, 0, "dynamic")]);
        let router = Router::new(BalancingStrategy::RequestAware, 1.2);
        let snapshot = registry.snapshot();

        let ports: Vec<_> = (0..4)
            .map(|_| {
                router
                    .route(&snapshot, &request("FILE_TRANSFER report.pdf"))
                    .unwrap()
                    .worker
                    .listen_port
            })
            .collect();
        assert_eq!(ports, vec![7001, 7002, 7001, 7002]);
    }

    #[test]
    fn test_round_robin_visits_each_once_per_cycle() {
        let registry = registry_with(&[
            (7001, 9, "dynamic"),
            (7002, 0, "dynamic"),
            (7003, 3, "static"),
            (7004, 1, "dynamic"),
        ]);
        let snapshot = registry.snapshot();
        let router = Router::new(BalancingStrategy::RoundRobin, 1.2);

        for _ in 0..3 {
            let mut ports: Vec<_> = (0..snapshot.len())
                .map(|_| {
                    router
                        .route(&snapshot, &request("COMPUTATION 1"))
                        .unwrap()
                        .worker
                        .listen_port
                })
                .collect();
            ports.sort_unstable();
            assert_eq!(ports, vec![7001, 7002, 7003, 7004]);
        }
    }

    #[test]
    fn test_round_robin_wraps_over_shrunk_set() {
        let registry = Registry::new();
        let ids: Vec<_> = (0..3)
            .map(|i| registry.register(7001 + i, "dynamic", "peer", CancellationToken::new()))
            .collect();
        let router = Router::new(BalancingStrategy::RequestAware, 1.2);

        let first = router.route(&registry.snapshot(), &request("DIRECTORY")).unwrap();
        assert_eq!(first.worker.listen_port, 7001);

        registry.remove(ids[1]);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);

        // Cursor is 1; 1 % 2 picks the second remaining worker, then wraps
        let ports: Vec<_> = (0..3)
            .map(|_| router.route(&snapshot, &request("DIRECTORY")).unwrap().worker.listen_port)
            .collect();
        assert_eq!(ports, vec![7003, 7001, 7003]);
    }

    #[test]
    fn test_unrecognized_kind_is_light() {
        let registry = registry_with(&[(7001, 0, "dynamic"), (7002, 0, "dynamic")]);
        let router = Router::new(BalancingStrategy::RequestAware, 1.2);
        let descriptor = request("PRINT poster.png");
        assert_eq!(descriptor.kind, RequestKind::Unrecognized("PRINT".to_string()));

        let decision = router.route(&registry.snapshot(), &descriptor).unwrap();
        assert_eq!(decision.policy, Policy::RoundRobin);
    }

    #[test]
    fn test_weighted_penalizes_static_without_excluding() {
        let registry = registry_with(&[(7001, 10, "static"), (7002, 11, "dynamic")]);
        let snapshot = registry.snapshot();

        // 10 * 1.2 = 12 > 11
        assert_eq!(weighted(&snapshot, 1.2).unwrap().listen_port, 7002);
        // Without the penalty the static worker wins
        assert_eq!(weighted(&snapshot, 1.0).unwrap().listen_port, 7001);

        let only_static = registry_with(&[(7005, 50, "static")]);
        assert_eq!(weighted(&only_static.snapshot(), 1.2).unwrap().listen_port, 7005);
    }

    #[test]
    fn test_weighted_tie_goes_to_first() {
        let registry = registry_with(&[(7001, 0, "static"), (7002, 0, "dynamic")]);
        let router = Router::new(BalancingStrategy::Weighted, 1.2);

        let decision = router
            .route(&registry.snapshot(), &request("VIDEO_STREAMING 10"))
            .unwrap();
        assert_eq!(decision.worker.listen_port, 7001);
        assert_eq!(decision.policy, Policy::Weighted);
    }

    #[test]
    fn test_least_load_strategy_ignores_request_kind() {
        let registry = registry_with(&[(7001, 3, "dynamic"), (7002, 1, "dynamic")]);
        let router = Router::new(BalancingStrategy::LeastLoad, 1.2);
        let snapshot = registry.snapshot();

        for _ in 0..3 {
            let decision = router.route(&snapshot, &request("DIRECTORY")).unwrap();
            assert_eq!(decision.worker.listen_port, 7002);
        }
    }
}
