//! Epsilon-greedy ridge-linear contextual bandit
//!
//! Four actions (stay, star, chain, flat) over 8-dimensional contexts.
//! Per-action ridge models are maintained through Sherman-Morrison inverse
//! updates, so no matrix inversion ever runs at decision time. The
//! exploration RNG is private to the instance and seeded explicitly; the
//! process-global RNG is never touched.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::RuntimeConfig;
use crate::controller::features::{FEATURE_DIM, FeatureVector};
use crate::messaging::domain_types::Topology;

/// Number of bandit actions.
pub const N_ACTIONS: usize = 4;

/// A switching action: hold the current topology or move to a named one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// No switch requested.
    Stay,
    /// Request the star topology.
    Star,
    /// Request the chain topology.
    Chain,
    /// Request the flat topology.
    Flat,
}

impl Action {
    /// Model index of the action.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Stay => 0,
            Self::Star => 1,
            Self::Chain => 2,
            Self::Flat => 3,
        }
    }

    /// Action for a model index; out-of-range indexes map to `Stay`.
    #[must_use]
    pub fn from_index(index: usize) -> Self {
        match index {
            1 => Self::Star,
            2 => Self::Chain,
            3 => Self::Flat,
            _ => Self::Stay,
        }
    }

    /// The topology this action names, if it names one.
    #[must_use]
    pub fn topology(self) -> Option<Topology> {
        match self {
            Self::Stay => None,
            Self::Star => Some(Topology::Star),
            Self::Chain => Some(Topology::Chain),
            Self::Flat => Some(Topology::Flat),
        }
    }

    /// Lowercase wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stay => "stay",
            Self::Star => "star",
            Self::Chain => "chain",
            Self::Flat => "flat",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Linear epsilon decay over the decision count, clamped to `[end, start]`.
#[derive(Debug, Clone, Copy)]
pub struct EpsilonSchedule {
    start: f64,
    end: f64,
    decay_steps: u64,
}

impl EpsilonSchedule {
    /// Creates a schedule decaying from `start` to `end` over `decay_steps`
    /// decisions.
    #[must_use]
    pub fn new(start: f64, end: f64, decay_steps: u64) -> Self {
        Self {
            start,
            end,
            decay_steps: decay_steps.max(1),
        }
    }

    /// Epsilon at decision count `k`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn at(&self, k: u64) -> f64 {
        if k >= self.decay_steps {
            return self.end;
        }
        let progress = k as f64 / self.decay_steps as f64;
        (self.start - (self.start - self.end) * progress).clamp(self.end, self.start)
    }
}

/// Result of one `decide` call.
#[derive(Debug, Clone, Copy)]
pub struct Decision {
    /// Chosen action.
    pub action: Action,
    /// Epsilon in force when the coin was flipped.
    pub epsilon: f64,
    /// Wall-clock decision latency in milliseconds.
    pub ms: f64,
}

/// Per-action ridge model: cached inverse, response vector, weights.
#[derive(Debug, Clone)]
struct ActionModel {
    a_inv: [[f64; FEATURE_DIM]; FEATURE_DIM],
    b: [f64; FEATURE_DIM],
    w: [f64; FEATURE_DIM],
    visits: u64,
}

impl ActionModel {
    fn new(lambda: f64) -> Self {
        let mut a_inv = [[0.0; FEATURE_DIM]; FEATURE_DIM];
        for (i, row) in a_inv.iter_mut().enumerate() {
            row[i] = 1.0 / lambda;
        }
        Self {
            a_inv,
            b: [0.0; FEATURE_DIM],
            w: [0.0; FEATURE_DIM],
            visits: 0,
        }
    }
}

/// Snapshot of bandit counters and schedule parameters.
#[derive(Debug, Clone, Serialize)]
pub struct BanditStats {
    /// Decisions made so far.
    pub total_decisions: u64,
    /// Per-action visit counts, indexed by [`Action::index`].
    pub action_visits: [u64; N_ACTIONS],
    /// Epsilon at the current decision count.
    pub current_epsilon: f64,
    /// Schedule start value.
    pub epsilon_start: f64,
    /// Schedule end value.
    pub epsilon_end: f64,
    /// Schedule decay horizon.
    pub epsilon_decay_steps: u64,
    /// Seed of the private RNG.
    pub seed: u64,
}

/// Epsilon-greedy ridge-linear policy over `{stay, star, chain, flat}`.
///
/// Deterministic: given the same seed and an identical decide/update call
/// sequence, the action sequence is bit-stable.
#[derive(Debug)]
pub struct BanditSwitch {
    models: [ActionModel; N_ACTIONS],
    schedule: EpsilonSchedule,
    decision_count: u64,
    rng: StdRng,
    seed: u64,
}

impl BanditSwitch {
    /// Creates a bandit from the configured schedule, regularization, and
    /// seed.
    #[must_use]
    pub fn new(config: &RuntimeConfig) -> Self {
        Self::with_seed(config, config.bandit_seed)
    }

    /// Creates a bandit with an explicit seed, overriding the configured one.
    #[must_use]
    pub fn with_seed(config: &RuntimeConfig, seed: u64) -> Self {
        let lambda = config.ridge_lambda.as_f64();
        Self {
            models: std::array::from_fn(|_| ActionModel::new(lambda)),
            schedule: EpsilonSchedule::new(
                config.epsilon_start.as_f64(),
                config.epsilon_end.as_f64(),
                config.epsilon_decay_steps,
            ),
            decision_count: 0,
            rng: StdRng::seed_from_u64(seed),
            seed,
        }
    }

    /// Seed of the private RNG, for logging.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Decisions made so far.
    #[must_use]
    pub fn decision_count(&self) -> u64 {
        self.decision_count
    }

    /// Picks an action for context `x`.
    ///
    /// With probability epsilon the action is uniform over all four;
    /// otherwise it is the argmax of the per-action linear scores, ties
    /// broken toward the lowest index.
    pub fn decide(&mut self, x: &FeatureVector) -> Decision {
        let start = Instant::now();
        let epsilon = self.schedule.at(self.decision_count);

        let action = if self.rng.r#gen::<f64>() < epsilon {
            Action::from_index(self.rng.gen_range(0..N_ACTIONS))
        } else {
            let mut best = 0;
            let mut best_score = dot(&self.models[0].w, x);
            for (index, model) in self.models.iter().enumerate().skip(1) {
                let score = dot(&model.w, x);
                if score > best_score {
                    best = index;
                    best_score = score;
                }
            }
            Action::from_index(best)
        };

        self.decision_count += 1;
        self.models[action.index()].visits += 1;

        Decision {
            action,
            epsilon,
            ms: start.elapsed().as_secs_f64() * 1e3,
        }
    }

    /// Folds an observed reward into the chosen action's model.
    ///
    /// Sherman-Morrison keeps the cached inverse exact:
    /// `(A + xx^T)^-1 = A^-1 - (A^-1 x)(A^-1 x)^T / (1 + x^T A^-1 x)`.
    pub fn update(&mut self, x: &FeatureVector, action: Action, reward: f64) {
        let model = &mut self.models[action.index()];

        let mut ax = [0.0; FEATURE_DIM];
        for (i, row) in model.a_inv.iter().enumerate() {
            ax[i] = dot(row, x);
        }
        let denom = 1.0 + dot(x, &ax);
        for i in 0..FEATURE_DIM {
            for j in 0..FEATURE_DIM {
                model.a_inv[i][j] -= ax[i] * ax[j] / denom;
            }
        }

        for i in 0..FEATURE_DIM {
            model.b[i] += reward * x[i];
        }
        for (i, row) in model.a_inv.iter().enumerate() {
            model.w[i] = dot(row, &model.b);
        }
    }

    /// Snapshot of counters and schedule parameters.
    #[must_use]
    pub fn stats(&self) -> BanditStats {
        BanditStats {
            total_decisions: self.decision_count,
            action_visits: std::array::from_fn(|i| self.models[i].visits),
            current_epsilon: self.schedule.at(self.decision_count),
            epsilon_start: self.schedule.start,
            epsilon_end: self.schedule.end,
            epsilon_decay_steps: self.schedule.decay_steps,
            seed: self.seed,
        }
    }
}

fn dot(a: &[f64; FEATURE_DIM], b: &[f64; FEATURE_DIM]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
