//! Switch admission control
//!
//! Wraps the switch engine with dwell-time and cooldown policy, serializes
//! switch requests, and publishes `TOPOLOGY_CHANGED` notifications through a
//! single-slot watch channel.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::domain_types::{CooldownSteps, DwellMinSteps};
use crate::messaging::domain_types::{Epoch, Topology};
use crate::messaging::errors::SwitchDenied;
use crate::messaging::switch::{SwitchEngine, SwitchReport};

/// Number of recent switches retained in [`CoordinatorStats`].
const HISTORY_LEN: usize = 10;

/// A committed topology change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopologyChanged {
    /// Topology before the commit.
    pub from: Topology,
    /// Topology after the commit.
    pub to: Topology,
    /// Epoch published by the commit.
    pub epoch: Epoch,
}

/// Counters and recent history snapshot.
#[derive(Debug, Clone)]
pub struct CoordinatorStats {
    /// Topology currently in force.
    pub active_topology: Topology,
    /// Target of the most recently denied request, if any.
    pub pending_target: Option<Topology>,
    /// Ticks since the last committed switch.
    pub steps_since_switch: u64,
    /// Ticks left in the current cooldown window.
    pub cooldown_remaining: u64,
    /// Most recent committed switches, oldest first.
    pub history: Vec<TopologyChanged>,
}

struct CoordState {
    steps_since_switch: u64,
    cooldown_remaining: u64,
    pending_target: Option<Topology>,
    history: VecDeque<TopologyChanged>,
}

/// Enforces dwell/cooldown policy around the switch engine.
///
/// Within a tick, `request_switch` admission runs against the counters as
/// they stand *before* that tick's [`step`](Self::step) bookkeeping. The
/// controller calls `step` once per tick after its decision, skipping it
/// when that tick's request committed: the commit reset the counters, so a
/// further `step` would shorten the cooldown window to one effective tick.
pub struct Coordinator {
    engine: Arc<SwitchEngine>,
    dwell_min_steps: u64,
    cooldown_steps: u64,
    state: std::sync::Mutex<CoordState>,
    request_lock: tokio::sync::Mutex<()>,
    event_tx: watch::Sender<Option<TopologyChanged>>,
}

impl Coordinator {
    /// Creates a coordinator over `engine` with the given policy knobs.
    #[must_use]
    pub fn new(engine: Arc<SwitchEngine>, dwell: DwellMinSteps, cooldown: CooldownSteps) -> Self {
        let (event_tx, _) = watch::channel(None);
        Self {
            engine,
            dwell_min_steps: dwell.as_u64(),
            cooldown_steps: cooldown.as_u64(),
            state: std::sync::Mutex::new(CoordState {
                steps_since_switch: 0,
                cooldown_remaining: 0,
                pending_target: None,
                history: VecDeque::with_capacity(HISTORY_LEN),
            }),
            request_lock: tokio::sync::Mutex::new(()),
            event_tx,
        }
    }

    /// Advances one logical scheduling tick: bumps `steps_since_switch` and
    /// decays the cooldown window (floor 0).
    pub fn step(&self) {
        let mut state = self.state.lock().expect("coordinator state lock");
        state.steps_since_switch += 1;
        state.cooldown_remaining = state.cooldown_remaining.saturating_sub(1);
    }

    /// Checks whether a switch request would be admitted right now.
    ///
    /// # Errors
    /// [`SwitchDenied::Cooldown`] while a commit's cooldown window is open,
    /// [`SwitchDenied::Dwell`] while the dwell minimum is unmet. Cooldown is
    /// checked first.
    pub fn can_switch(&self) -> Result<(), SwitchDenied> {
        let state = self.state.lock().expect("coordinator state lock");
        if state.cooldown_remaining > 0 {
            return Err(SwitchDenied::Cooldown {
                remaining: state.cooldown_remaining,
            });
        }
        if state.steps_since_switch < self.dwell_min_steps {
            return Err(SwitchDenied::Dwell {
                steps: state.steps_since_switch,
                required: self.dwell_min_steps,
            });
        }
        Ok(())
    }

    /// Requests a switch to `target`, subject to dwell/cooldown admission.
    ///
    /// Admitted requests are serialized; on a committed switch the counters
    /// reset, the cooldown window opens, and a [`TopologyChanged`] event is
    /// published. An admitted-but-aborted switch leaves counters and
    /// topology unchanged.
    ///
    /// # Errors
    /// [`SwitchDenied`] when admission refuses the request.
    pub async fn request_switch(&self, target: Topology) -> Result<SwitchReport, SwitchDenied> {
        if let Err(denied) = self.can_switch() {
            let mut state = self.state.lock().expect("coordinator state lock");
            state.pending_target = Some(target);
            debug!(%target, reason = denied.reason(), "switch request denied");
            return Err(denied);
        }

        let _guard = self.request_lock.lock().await;
        let (from, _) = self.engine.active();
        let report = self.engine.switch_to(target).await;
        if report.committed {
            let event = TopologyChanged {
                from,
                to: target,
                epoch: report.epoch,
            };
            {
                let mut state = self.state.lock().expect("coordinator state lock");
                state.steps_since_switch = 0;
                state.cooldown_remaining = self.cooldown_steps;
                state.pending_target = None;
                if state.history.len() == HISTORY_LEN {
                    state.history.pop_front();
                }
                state.history.push_back(event.clone());
            }
            info!(%from, %target, epoch = %event.epoch, "topology changed");
            self.event_tx.send_replace(Some(event));
        }
        Ok(report)
    }

    /// Waits for the next committed topology change.
    ///
    /// With a timeout, returns `None` if no change is published in time;
    /// without one, waits until a change arrives (or the coordinator is
    /// dropped).
    pub async fn wait_for_topology_change(
        &self,
        timeout: Option<Duration>,
    ) -> Option<TopologyChanged> {
        let mut rx = self.event_tx.subscribe();
        let changed = match timeout {
            Some(limit) => tokio::time::timeout(limit, rx.changed()).await.ok()?,
            None => rx.changed().await,
        };
        changed.ok()?;
        rx.borrow().clone()
    }

    /// Ticks spent in the current topology since the last commit.
    #[must_use]
    pub fn steps_since_switch(&self) -> u64 {
        self.state
            .lock()
            .expect("coordinator state lock")
            .steps_since_switch
    }

    /// Ticks left in the current cooldown window.
    #[must_use]
    pub fn cooldown_remaining(&self) -> u64 {
        self.state
            .lock()
            .expect("coordinator state lock")
            .cooldown_remaining
    }

    /// Snapshot of counters and recent switch history.
    #[must_use]
    pub fn stats(&self) -> CoordinatorStats {
        let (topology, _) = self.engine.active();
        let state = self.state.lock().expect("coordinator state lock");
        CoordinatorStats {
            active_topology: topology,
            pending_target: state.pending_target,
            steps_since_switch: state.steps_since_switch,
            cooldown_remaining: state.cooldown_remaining,
            history: state.history.iter().cloned().collect(),
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("Coordinator")
            .field("active_topology", &stats.active_topology)
            .field("steps_since_switch", &stats.steps_since_switch)
            .field("cooldown_remaining", &stats.cooldown_remaining)
            .finish_non_exhaustive()
    }
}
