//! Deterministic reward computation
//!
//! Step rewards are a fixed linear combination of phase advancement, test
//! pass-rate movement, token spend, and a flat switching cost, plus a
//! terminal bonus on success. Recomputing from a logged
//! `(phase_advance, delta_pass_rate, delta_tokens, switch_committed)` tuple
//! reconstructs the step reward exactly.

use serde::{Deserialize, Serialize};

/// Episode phase, in strictly increasing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Task decomposition.
    Planning,
    /// Implementation.
    Coding,
    /// Test execution.
    Testing,
    /// Review of results.
    Critique,
    /// Terminal state.
    Done,
}

impl Phase {
    /// Parses a lowercase phase name; unknown names yield `None` and
    /// contribute no advancement.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "planning" => Some(Self::Planning),
            "coding" => Some(Self::Coding),
            "testing" => Some(Self::Testing),
            "critique" => Some(Self::Critique),
            "done" => Some(Self::Done),
            _ => None,
        }
    }
}

/// Environment state snapshot used for reward computation.
#[derive(Debug, Clone, Default)]
pub struct StepState {
    /// Current phase, if recognized.
    pub phase: Option<Phase>,
    /// Test pass rate in `[0, 1]`.
    pub test_pass_rate: f64,
    /// Cumulative tokens spent.
    pub tokens_used: u64,
    /// True when a topology switch committed since the previous snapshot.
    pub switch_committed: bool,
}

/// Reward weights. The defaults are the runtime's fixed constants.
#[derive(Debug, Clone, Copy)]
pub struct RewardAccumulator {
    /// Bonus for advancing a phase.
    pub phase_advance_reward: f64,
    /// Scale on pass-rate deltas.
    pub test_pass_scale: f64,
    /// Cost per token spent.
    pub token_cost: f64,
    /// Flat cost charged when a switch committed.
    pub switch_cost: f64,
    /// Terminal bonus on success.
    pub terminal_bonus: f64,
}

impl Default for RewardAccumulator {
    fn default() -> Self {
        Self {
            phase_advance_reward: 0.3,
            test_pass_scale: 0.7,
            token_cost: 1e-4,
            switch_cost: 0.05,
            terminal_bonus: 1.0,
        }
    }
}

impl RewardAccumulator {
    /// Computes the step reward from consecutive state snapshots.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn step_reward(&self, prev: &StepState, curr: &StepState) -> f64 {
        let mut reward = 0.0;

        if Self::phase_advanced(prev, curr) {
            reward += self.phase_advance_reward;
        }

        reward += self.test_pass_scale * (curr.test_pass_rate - prev.test_pass_rate);

        let delta_tokens = curr.tokens_used as i64 - prev.tokens_used as i64;
        reward -= self.token_cost * delta_tokens as f64;

        if curr.switch_committed {
            reward -= self.switch_cost;
        }

        reward
    }

    /// True when `curr` is strictly later than `prev` in the phase order.
    /// Unknown phases never count as advancement.
    #[must_use]
    pub fn phase_advanced(prev: &StepState, curr: &StepState) -> bool {
        match (prev.phase, curr.phase) {
            (Some(p), Some(c)) => c > p,
            _ => false,
        }
    }

    /// Terminal bonus: `terminal_bonus` on success, zero otherwise.
    #[must_use]
    pub fn final_bonus(&self, success: bool) -> f64 {
        if success { self.terminal_bonus } else { 0.0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn state(phase: Option<Phase>, pass: f64, tokens: u64, switched: bool) -> StepState {
        StepState {
            phase,
            test_pass_rate: pass,
            tokens_used: tokens,
            switch_committed: switched,
        }
    }

    #[test]
    fn phase_advance_earns_bonus() {
        let acc = RewardAccumulator::default();
        let prev = state(Some(Phase::Planning), 0.0, 0, false);
        let curr = state(Some(Phase::Coding), 0.0, 0, false);
        assert_relative_eq!(acc.step_reward(&prev, &curr), 0.3);
    }

    #[test]
    fn phase_regression_earns_nothing() {
        let acc = RewardAccumulator::default();
        let prev = state(Some(Phase::Critique), 0.0, 0, false);
        let curr = state(Some(Phase::Coding), 0.0, 0, false);
        assert_relative_eq!(acc.step_reward(&prev, &curr), 0.0);
    }

    #[test]
    fn unknown_phase_contributes_no_advancement() {
        let acc = RewardAccumulator::default();
        assert!(Phase::parse("daydreaming").is_none());
        let prev = state(None, 0.0, 0, false);
        let curr = state(Some(Phase::Done), 0.0, 0, false);
        assert!(!RewardAccumulator::phase_advanced(&prev, &curr));
        assert_relative_eq!(acc.step_reward(&prev, &curr), 0.0);
    }

    #[test]
    fn combined_formula_is_linear() {
        let acc = RewardAccumulator::default();
        let prev = state(Some(Phase::Coding), 0.25, 1_000, false);
        let curr = state(Some(Phase::Testing), 0.75, 1_500, true);
        // 0.3 + 0.7 * 0.5 - 1e-4 * 500 - 0.05
        assert_relative_eq!(acc.step_reward(&prev, &curr), 0.3 + 0.35 - 0.05 - 0.05);
    }

    #[test]
    fn token_refunds_are_rewarded() {
        let acc = RewardAccumulator::default();
        let prev = state(None, 0.0, 2_000, false);
        let curr = state(None, 0.0, 1_000, false);
        assert_relative_eq!(acc.step_reward(&prev, &curr), 0.1);
    }

    #[test]
    fn terminal_bonus_only_on_success() {
        let acc = RewardAccumulator::default();
        assert_relative_eq!(acc.final_bonus(true), 1.0);
        assert_relative_eq!(acc.final_bonus(false), 0.0);
    }
}
