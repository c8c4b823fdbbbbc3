//! Three-phase topology switch engine
//!
//! Drives PREPARE -> QUIESCE -> COMMIT/ABORT against the router under a
//! single serializing lock, and publishes the active (topology, epoch) pair
//! through an atomic cell so readers never observe a torn pair.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::domain_types::QuiesceDeadlineMs;
use crate::messaging::domain_types::{DropReason, Epoch, Topology};
use crate::messaging::router::Router;

/// Pause between quiesce re-checks of the active queues.
const QUIESCE_POLL: Duration = Duration::from_millis(1);

/// Atomically published (topology, epoch) pair.
///
/// The pair is packed into one word (`epoch << 2 | topology code`) so that
/// `load` can never observe a topology from one commit and an epoch from
/// another. Written only by the router's commit, under its state lock, so
/// ingress validation and epoch stamping see one consistent snapshot; read
/// lock-free by any observer.
#[derive(Debug)]
pub struct TopologyCell {
    packed: AtomicU64,
}

impl TopologyCell {
    /// Creates a cell publishing `(topology, epoch 0)`.
    #[must_use]
    pub fn new(topology: Topology) -> Self {
        Self {
            packed: AtomicU64::new(topology.code()),
        }
    }

    /// Reads the published pair.
    #[must_use]
    pub fn load(&self) -> (Topology, Epoch) {
        let packed = self.packed.load(Ordering::Acquire);
        (Topology::from_code(packed & 0b11), Epoch::new(packed >> 2))
    }

    pub(crate) fn store(&self, topology: Topology, epoch: Epoch) {
        self.packed
            .store(epoch.as_u64() << 2 | topology.code(), Ordering::Release);
    }
}

impl Default for TopologyCell {
    fn default() -> Self {
        Self::new(Topology::Star)
    }
}

/// Per-phase timings and salvage counts for one switch attempt.
#[derive(Debug, Clone, Default)]
pub struct SwitchStats {
    /// Milliseconds spent in PREPARE.
    pub prepare_ms: u64,
    /// Milliseconds spent in QUIESCE (until commit or abort).
    pub quiesce_ms: u64,
    /// Milliseconds spent in the COMMIT or ABORT tail.
    pub commit_or_abort_ms: u64,
    /// Messages dropped while salvaging next-epoch queues on ABORT.
    pub dropped_by_reason: BTreeMap<DropReason, u64>,
}

/// Outcome of one `switch_to` invocation.
#[derive(Debug, Clone)]
pub struct SwitchReport {
    /// True when the switch committed; false when it aborted at the quiesce
    /// deadline.
    pub committed: bool,
    /// Topology in force after the attempt.
    pub topology: Topology,
    /// Active epoch after the attempt (bumped only on commit).
    pub epoch: Epoch,
    /// Phase timings and salvage counts.
    pub stats: SwitchStats,
}

/// Drives the switch protocol and owns publication of the active pair.
///
/// At most one switch is in flight per engine: `switch_to` serializes on an
/// internal lock. The router keeps accepting traffic throughout; ingress
/// lands in next-epoch queues from PREPARE until COMMIT or ABORT.
#[derive(Debug)]
pub struct SwitchEngine {
    router: Arc<Router>,
    cell: Arc<TopologyCell>,
    quiesce_deadline: Duration,
    switch_lock: tokio::sync::Mutex<()>,
}

impl SwitchEngine {
    /// Creates an engine over `router`, publishing through `cell`.
    #[must_use]
    pub fn new(router: Arc<Router>, cell: Arc<TopologyCell>, deadline: QuiesceDeadlineMs) -> Self {
        Self {
            router,
            cell,
            quiesce_deadline: deadline.as_duration(),
            switch_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Reads the active (topology, epoch) pair atomically.
    #[must_use]
    pub fn active(&self) -> (Topology, Epoch) {
        self.cell.load()
    }

    /// Runs one PREPARE -> QUIESCE -> COMMIT/ABORT cycle toward `target`.
    ///
    /// On COMMIT the epoch is bumped and every message enqueued since
    /// PREPARE becomes observable, and no earlier. On ABORT the epoch pair
    /// is unchanged and salvaged messages stay deliverable in FIFO order.
    pub async fn switch_to(&self, target: Topology) -> SwitchReport {
        let _guard = self.switch_lock.lock().await;

        let (from, _) = self.cell.load();
        let t0 = Instant::now();
        self.router.start_switch().await;
        let prepared = Instant::now();
        debug!(%from, %target, "switch prepared, quiescing active epoch");

        let deadline = prepared + self.quiesce_deadline;
        while self.router.active_has_pending().await {
            if Instant::now() >= deadline {
                let dropped = self.router.abort_switch().await;
                let done = Instant::now();
                let epoch = self.router.active_epoch();
                warn!(
                    %from,
                    %target,
                    %epoch,
                    salvage_drops = dropped.values().sum::<u64>(),
                    "quiesce deadline expired, switch aborted"
                );
                return SwitchReport {
                    committed: false,
                    topology: from,
                    epoch,
                    stats: SwitchStats {
                        prepare_ms: ms_between(t0, prepared),
                        quiesce_ms: ms_between(prepared, done),
                        commit_or_abort_ms: 0,
                        dropped_by_reason: dropped,
                    },
                };
            }
            sleep(QUIESCE_POLL).await;
        }

        let quiesced = Instant::now();
        // The router publishes the new (topology, epoch) pair into the cell
        // under its own lock as part of the commit.
        self.router.commit_switch(target).await;
        let epoch = self.router.active_epoch();
        let done = Instant::now();
        info!(%from, %target, %epoch, "topology switch committed");
        SwitchReport {
            committed: true,
            topology: target,
            epoch,
            stats: SwitchStats {
                prepare_ms: ms_between(t0, prepared),
                quiesce_ms: ms_between(prepared, quiesced),
                commit_or_abort_ms: ms_between(quiesced, done),
                dropped_by_reason: BTreeMap::new(),
            },
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn ms_between(start: Instant, end: Instant) -> u64 {
    end.duration_since(start).as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_round_trips_pairs() {
        let cell = TopologyCell::default();
        assert_eq!(cell.load(), (Topology::Star, Epoch::new(0)));
        cell.store(Topology::Chain, Epoch::new(7));
        assert_eq!(cell.load(), (Topology::Chain, Epoch::new(7)));
        cell.store(Topology::Flat, Epoch::new(8));
        assert_eq!(cell.load(), (Topology::Flat, Epoch::new(8)));
    }
}
