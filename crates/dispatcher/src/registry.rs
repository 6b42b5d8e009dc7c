//! Server registry
//!
//! Authoritative table of connected workers. Every per-worker field lives in
//! one `WorkerEntry`, and the whole table sits behind a single mutex, so a
//! reader sees each worker either fully updated or not at all.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use switchyard_common::METRICS;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Registry-allocated worker identifier, independent of the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Latest known state of a registered worker
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerEntry {
    pub id: WorkerId,

    /// Port clients dial to reach the worker
    pub listen_port: u16,

    /// Latest self-reported load
    pub current_load: u64,

    /// Advisory tag declared at join time
    pub balancing_tag: String,

    /// Last registration, load update or ping
    pub last_heartbeat_at: Instant,

    pub registered_at: Instant,

    /// Remote address of the worker's dispatcher connection
    pub peer: String,
}

impl WorkerEntry {
    /// Time since the last heartbeat, as seen at `now`
    pub fn heartbeat_age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_heartbeat_at)
    }
}

struct Slot {
    entry: WorkerEntry,

    /// Cancelled on removal; the owning connection task drops its socket
    release: CancellationToken,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    workers: BTreeMap<WorkerId, Slot>,
}

/// Concurrency-safe worker table
#[derive(Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a worker with zero load and a fresh heartbeat.
    ///
    /// `release` is cancelled when the entry is removed, by whichever path.
    pub fn register(
        &self,
        listen_port: u16,
        balancing_tag: impl Into<String>,
        peer: impl Into<String>,
        release: CancellationToken,
    ) -> WorkerId {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        inner.next_id += 1;
        let id = WorkerId(inner.next_id);
        let entry = WorkerEntry {
            id,
            listen_port,
            current_load: 0,
            balancing_tag: balancing_tag.into(),
            last_heartbeat_at: now,
            registered_at: now,
            peer: peer.into(),
        };

        info!(
            "Registered {} (port={}, tag={}, peer={})",
            id, entry.listen_port, entry.balancing_tag, entry.peer
        );
        inner.workers.insert(id, Slot { entry, release });

        METRICS.dispatcher.workers_registered.inc();
        METRICS.dispatcher.active_workers.set(inner.workers.len() as i64);
        id
    }

    /// Record a load report. Returns `false` if the worker is unknown.
    pub fn update_load(&self, id: WorkerId, load: u64) -> bool {
        let mut inner = self.inner.lock();
        match inner.workers.get_mut(&id) {
            Some(slot) => {
                slot.entry.current_load = load;
                slot.entry.last_heartbeat_at = Instant::now();
                debug!("Updated {} load to {}", id, load);
                true
            }
            None => false,
        }
    }

    /// Refresh the heartbeat without touching the load
    pub fn touch(&self, id: WorkerId) -> bool {
        let mut inner = self.inner.lock();
        match inner.workers.get_mut(&id) {
            Some(slot) => {
                slot.entry.last_heartbeat_at = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Remove a worker and release its connection. Unknown ids are a no-op.
    pub fn remove(&self, id: WorkerId) -> Option<WorkerEntry> {
        let mut inner = self.inner.lock();
        let slot = inner.workers.remove(&id)?;
        METRICS.dispatcher.active_workers.set(inner.workers.len() as i64);
        drop(inner);

        slot.release.cancel();
        Some(slot.entry)
    }

    /// Remove a worker only if its heartbeat is still older than `timeout`
    /// at `now`. Re-checked under the lock so a heartbeat that raced the
    /// caller's snapshot keeps the worker registered.
    pub fn remove_if_stale(&self, id: WorkerId, now: Instant, timeout: Duration) -> Option<WorkerEntry> {
        let mut inner = self.inner.lock();
        let stale = inner
            .workers
            .get(&id)
            .is_some_and(|slot| slot.entry.heartbeat_age(now) > timeout);
        if !stale {
            return None;
        }

        let slot = inner.workers.remove(&id)?;
        METRICS.dispatcher.active_workers.set(inner.workers.len() as i64);
        drop(inner);

        slot.release.cancel();
        Some(slot.entry)
    }

    /// Point-in-time copy of every entry, in registration order
    pub fn snapshot(&self) -> Vec<WorkerEntry> {
        let inner = self.inner.lock();
        inner.workers.values().map(|slot| slot.entry.clone()).collect()
    }

    pub fn get(&self, id: WorkerId) -> Option<WorkerEntry> {
        self.inner.lock().workers.get(&id).map(|slot| slot.entry.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().workers.is_empty()
    }
}
