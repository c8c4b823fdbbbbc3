//! Feature extraction for the switching policy
//!
//! Produces the 8-vector consumed by the bandit: topology one-hot, dwell
//! progress, role shares over a sliding window, and token headroom. All
//! outputs are finite; shares are zero when nothing has been observed.

use std::collections::VecDeque;

use crate::domain_types::{AgentId, DwellMinSteps, FeatureWindow};
use crate::messaging::domain_types::{Topology, roles};

/// Dimensionality of the feature vector.
pub const FEATURE_DIM: usize = 8;

/// The bandit's context vector.
pub type FeatureVector = [f64; FEATURE_DIM];

/// Per-step message counts for the tracked roles.
#[derive(Debug, Clone, Copy, Default)]
struct RoleCounts {
    planner: u64,
    coder: u64,
    runner: u64,
    critic: u64,
}

impl RoleCounts {
    fn total(self) -> u64 {
        self.planner + self.coder + self.runner + self.critic
    }
}

/// Sliding-window counters feeding the feature vector.
///
/// `observe` increments the current step's role counters; `step` commits
/// them into the ring (evicting the oldest entry at capacity) and resets
/// the current counters. Shares are computed over the union of ring
/// contents and the not-yet-committed current step.
#[derive(Debug)]
pub struct FeatureSource {
    dwell_min_steps: u64,
    window: usize,
    ring: VecDeque<RoleCounts>,
    current: RoleCounts,
    topology: Topology,
    steps_since_switch: u64,
    token_used: u64,
    token_budget: u64,
}

impl FeatureSource {
    /// Creates a source with the given dwell normalizer and window size.
    #[must_use]
    pub fn new(dwell: DwellMinSteps, window: FeatureWindow) -> Self {
        let window = window.as_usize();
        Self {
            dwell_min_steps: dwell.as_u64(),
            window,
            ring: VecDeque::with_capacity(window),
            current: RoleCounts::default(),
            topology: Topology::Star,
            steps_since_switch: 0,
            token_used: 0,
            token_budget: 0,
        }
    }

    /// Counts one message from `sender` against the current step.
    ///
    /// Senders outside the tracked roles (summarizer, system) are ignored.
    pub fn observe(&mut self, sender: &AgentId) {
        match sender.as_str() {
            roles::PLANNER => self.current.planner += 1,
            roles::CODER => self.current.coder += 1,
            roles::RUNNER => self.current.runner += 1,
            roles::CRITIC => self.current.critic += 1,
            _ => {}
        }
    }

    /// Commits the current step's counts into the sliding window.
    pub fn step(&mut self) {
        if self.ring.len() == self.window {
            self.ring.pop_front();
        }
        self.ring.push_back(self.current);
        self.current = RoleCounts::default();
    }

    /// Updates token usage against the episode budget.
    pub fn set_budget(&mut self, used: u64, budget: u64) {
        self.token_used = used;
        self.token_budget = budget;
    }

    /// Updates the topology scalars.
    pub fn set_topology(&mut self, topology: Topology, steps_since_switch: u64) {
        self.topology = topology;
        self.steps_since_switch = steps_since_switch;
    }

    /// Builds the 8-vector.
    ///
    /// - f0..f2: topology one-hot (exactly one is 1.0)
    /// - f3: `min(1, steps_since_switch / max(1, dwell_min_steps))`
    /// - f4..f6: shares of planner / coder+runner / critic messages
    /// - f7: token headroom `max(0, 1 - used/budget)`, zero when budget is 0
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn vector(&self) -> FeatureVector {
        let one_hot = |t: Topology| if self.topology == t { 1.0 } else { 0.0 };

        let dwell_norm = (self.steps_since_switch as f64
            / self.dwell_min_steps.max(1) as f64)
            .min(1.0);

        let mut planner = self.current.planner;
        let mut coder_runner = self.current.coder + self.current.runner;
        let mut critic = self.current.critic;
        let mut total = self.current.total();
        for counts in &self.ring {
            planner += counts.planner;
            coder_runner += counts.coder + counts.runner;
            critic += counts.critic;
            total += counts.total();
        }
        let share = |count: u64| {
            if total > 0 {
                count as f64 / total as f64
            } else {
                0.0
            }
        };

        let headroom = if self.token_budget > 0 {
            (1.0 - self.token_used as f64 / self.token_budget as f64).max(0.0)
        } else {
            0.0
        };

        [
            one_hot(Topology::Star),
            one_hot(Topology::Chain),
            one_hot(Topology::Flat),
            dwell_norm,
            share(planner),
            share(coder_runner),
            share(critic),
            headroom,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::domain_types::{DwellMinSteps, FeatureWindow};

    fn source() -> FeatureSource {
        FeatureSource::new(
            DwellMinSteps::try_new(2).unwrap(),
            FeatureWindow::try_new(4).unwrap(),
        )
    }

    fn agent(name: &str) -> AgentId {
        AgentId::try_new(name.to_string()).unwrap()
    }

    #[test]
    fn topology_one_hot_is_exactly_one_of_three() {
        let mut src = source();
        for (topo, expect) in [
            (Topology::Star, [1.0, 0.0, 0.0]),
            (Topology::Chain, [0.0, 1.0, 0.0]),
            (Topology::Flat, [0.0, 0.0, 1.0]),
        ] {
            src.set_topology(topo, 0);
            let x = src.vector();
            assert_eq!(&x[0..3], &expect);
            assert_relative_eq!(x[0] + x[1] + x[2], 1.0);
        }
    }

    #[test]
    fn dwell_progress_clips_at_one() {
        let mut src = source();
        src.set_topology(Topology::Star, 1);
        assert_relative_eq!(src.vector()[3], 0.5);
        src.set_topology(Topology::Star, 2);
        assert_relative_eq!(src.vector()[3], 1.0);
        src.set_topology(Topology::Star, 50);
        assert_relative_eq!(src.vector()[3], 1.0);
    }

    #[test]
    fn shares_cover_ring_and_current_step() {
        let mut src = source();
        src.observe(&agent("planner"));
        src.observe(&agent("coder"));
        src.step();
        // Current step not yet committed still counts.
        src.observe(&agent("runner"));
        src.observe(&agent("critic"));

        let x = src.vector();
        assert_relative_eq!(x[4], 0.25); // planner
        assert_relative_eq!(x[5], 0.5); // coder + runner
        assert_relative_eq!(x[6], 0.25); // critic
    }

    #[test]
    fn shares_are_zero_without_traffic() {
        let src = source();
        let x = src.vector();
        assert_eq!(&x[4..7], &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn untracked_senders_are_ignored() {
        let mut src = source();
        src.observe(&agent("summarizer"));
        src.observe(&agent("system"));
        assert_eq!(&src.vector()[4..7], &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn window_evicts_oldest_step() {
        let mut src = source();
        src.observe(&agent("planner"));
        src.step();
        for _ in 0..4 {
            src.observe(&agent("critic"));
            src.step();
        }
        let x = src.vector();
        assert_relative_eq!(x[4], 0.0); // planner step evicted
        assert_relative_eq!(x[6], 1.0);
    }

    #[test]
    fn headroom_tracks_budget_and_floors_at_zero() {
        let mut src = source();
        assert_relative_eq!(src.vector()[7], 0.0); // zero budget
        src.set_budget(2_500, 10_000);
        assert_relative_eq!(src.vector()[7], 0.75);
        src.set_budget(20_000, 10_000);
        assert_relative_eq!(src.vector()[7], 0.0);
    }

    #[test]
    fn vector_is_always_finite() {
        let mut src = source();
        src.set_budget(u64::MAX, 1);
        src.set_topology(Topology::Flat, u64::MAX);
        assert!(src.vector().iter().all(|v| v.is_finite()));
    }
}
