//! Per-tick controller glue
//!
//! Closes the decide -> switch -> observe loop: reads the feature vector,
//! asks the bandit for an action, requests a topology switch through the
//! coordinator when the action names a different topology, and records one
//! decision per tick. Reward updates are decoupled: the environment supplies
//! consecutive state snapshots between ticks and the observed reward is fed
//! back into the bandit against the tick's context.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::RuntimeConfig;
use crate::controller::bandit::{Action, BanditStats, BanditSwitch};
use crate::controller::features::{FeatureSource, FeatureVector};
use crate::controller::reward::{RewardAccumulator, StepState};
use crate::domain_types::AgentId;
use crate::messaging::coordinator::Coordinator;
use crate::messaging::domain_types::{Epoch, Topology};
use crate::messaging::switch::SwitchEngine;

/// Errors surfaced when flushing decision or reward logs.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// File I/O failed.
    #[error("i/o error: {source}")]
    Io {
        /// Underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Record serialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serde error.
        #[from]
        source: serde_json::Error,
    },
}

/// Switch outcome recorded on a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchOutcomeRecord {
    /// True when the tick issued a switch request.
    pub attempted: bool,
    /// True when that request committed.
    pub committed: bool,
    /// Epoch after the tick (bumped only on commit).
    pub epoch: Epoch,
    /// Denial or abort reason, when the attempt did not commit.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
}

/// One line of the decision log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Tick number, starting at 1.
    pub step: u64,
    /// Topology in force when the decision was made.
    pub topology: Topology,
    /// Context vector the bandit saw.
    pub x: FeatureVector,
    /// Chosen action.
    pub action: Action,
    /// Epsilon in force for the exploration coin.
    pub epsilon: f64,
    /// Bandit decision latency in milliseconds.
    pub bandit_ms: f64,
    /// Full tick latency in milliseconds.
    pub tick_ms: f64,
    /// Switch request outcome.
    pub switch: SwitchOutcomeRecord,
}

/// One line of the reward log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardRecord {
    /// Tick the reward applies to.
    pub step: u64,
    /// Pass-rate movement between snapshots.
    pub delta_pass_rate: f64,
    /// Token spend between snapshots.
    pub delta_tokens: i64,
    /// True when the phase advanced.
    pub phase_advance: bool,
    /// True when a switch committed in the interval.
    pub switch_committed: bool,
    /// The computed step reward.
    pub r_step: f64,
}

/// Controller counters plus a bandit snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStats {
    /// Ticks executed.
    pub steps: u64,
    /// Decision records held.
    pub decisions: usize,
    /// Reward records held.
    pub rewards: usize,
    /// Bandit counters and schedule.
    pub bandit: BanditStats,
}

/// Per-tick glue between features, bandit, and coordinator.
pub struct Controller {
    bandit: BanditSwitch,
    features: FeatureSource,
    coordinator: Arc<Coordinator>,
    switch: Arc<SwitchEngine>,
    accumulator: RewardAccumulator,
    decisions: Vec<DecisionRecord>,
    rewards: Vec<RewardRecord>,
    step_count: u64,
}

impl Controller {
    /// Creates a controller over the wired message plane, building the
    /// policy and feature source from the configuration.
    #[must_use]
    pub fn new(
        switch: Arc<SwitchEngine>,
        coordinator: Arc<Coordinator>,
        config: &RuntimeConfig,
    ) -> Self {
        Self::with_policy(
            BanditSwitch::new(config),
            FeatureSource::new(config.dwell_min_steps, config.feature_window),
            coordinator,
            switch,
        )
    }

    /// Creates a controller around an existing policy and feature source,
    /// e.g. one whose models were trained elsewhere.
    #[must_use]
    pub fn with_policy(
        bandit: BanditSwitch,
        features: FeatureSource,
        coordinator: Arc<Coordinator>,
        switch: Arc<SwitchEngine>,
    ) -> Self {
        Self {
            bandit,
            features,
            coordinator,
            switch,
            accumulator: RewardAccumulator::default(),
            decisions: Vec::new(),
            rewards: Vec::new(),
            step_count: 0,
        }
    }

    /// Counts a routed message against the current step's role shares.
    pub fn observe_message(&mut self, sender: &AgentId) {
        self.features.observe(sender);
    }

    /// Updates token usage against the episode budget.
    pub fn set_budget(&mut self, used: u64, budget: u64) {
        self.features.set_budget(used, budget);
    }

    /// Executes one controller tick and returns the recorded decision.
    ///
    /// An action naming the current topology is equivalent to `stay`: no
    /// request is issued. Dwell/cooldown denials and quiesce aborts are
    /// recorded with a reason and leave the topology unchanged; they never
    /// fail the tick.
    ///
    /// Coordinator bookkeeping runs once per tick, except on a tick whose
    /// switch committed: the commit already reset the counters, and an
    /// extra `step` would erode the cooldown window by one tick.
    pub async fn tick(&mut self) -> DecisionRecord {
        let tick_start = Instant::now();
        self.step_count += 1;

        let (topology, epoch) = self.switch.active();
        let steps_since = self.coordinator.steps_since_switch();
        self.features.set_topology(topology, steps_since);
        let x = self.features.vector();

        let decision = self.bandit.decide(&x);
        let mut record = DecisionRecord {
            step: self.step_count,
            topology,
            x,
            action: decision.action,
            epsilon: decision.epsilon,
            bandit_ms: decision.ms,
            tick_ms: 0.0,
            switch: SwitchOutcomeRecord {
                attempted: false,
                committed: false,
                epoch,
                reason: None,
            },
        };

        if let Some(target) = decision.action.topology() {
            if target != topology {
                record.switch.attempted = true;
                match self.coordinator.request_switch(target).await {
                    Ok(report) if report.committed => {
                        record.switch.committed = true;
                        record.switch.epoch = report.epoch;
                    }
                    Ok(_aborted) => {
                        record.switch.reason = Some("quiesce_timeout".to_string());
                    }
                    Err(denied) => {
                        record.switch.reason = Some(denied.reason().to_string());
                    }
                }
            }
        }

        record.tick_ms = tick_start.elapsed().as_secs_f64() * 1e3;
        debug!(
            step = record.step,
            action = %record.action,
            attempted = record.switch.attempted,
            committed = record.switch.committed,
            "controller tick"
        );
        self.decisions.push(record.clone());
        self.features.step();
        if !record.switch.committed {
            self.coordinator.step();
        }
        record
    }

    /// Computes the step reward between snapshots and feeds it back into the
    /// bandit against the most recent decision's context.
    pub fn update_reward(&mut self, prev: &StepState, curr: &StepState) -> f64 {
        let reward = self.accumulator.step_reward(prev, curr);

        if let Some(last) = self.decisions.last() {
            let x = last.x;
            let action = last.action;
            self.bandit.update(&x, action, reward);
        }

        #[allow(clippy::cast_possible_wrap)]
        self.rewards.push(RewardRecord {
            step: self.step_count,
            delta_pass_rate: curr.test_pass_rate - prev.test_pass_rate,
            delta_tokens: curr.tokens_used as i64 - prev.tokens_used as i64,
            phase_advance: RewardAccumulator::phase_advanced(prev, curr),
            switch_committed: curr.switch_committed,
            r_step: reward,
        });
        reward
    }

    /// Terminal bonus for the episode outcome.
    #[must_use]
    pub fn final_bonus(&self, success: bool) -> f64 {
        self.accumulator.final_bonus(success)
    }

    /// Decision records, oldest first.
    #[must_use]
    pub fn decisions(&self) -> &[DecisionRecord] {
        &self.decisions
    }

    /// Reward records, oldest first.
    #[must_use]
    pub fn rewards(&self) -> &[RewardRecord] {
        &self.rewards
    }

    /// Counters plus a bandit snapshot.
    #[must_use]
    pub fn stats(&self) -> ControllerStats {
        ControllerStats {
            steps: self.step_count,
            decisions: self.decisions.len(),
            rewards: self.rewards.len(),
            bandit: self.bandit.stats(),
        }
    }

    /// Writes the decision log, and optionally the reward log, as JSON
    /// Lines.
    ///
    /// # Errors
    /// Returns [`ControllerError`] on I/O or serialization failure.
    pub fn flush_jsonl(
        &self,
        decisions_path: &Path,
        rewards_path: Option<&Path>,
    ) -> Result<(), ControllerError> {
        write_jsonl(decisions_path, &self.decisions)?;
        if let Some(path) = rewards_path {
            write_jsonl(path, &self.rewards)?;
        }
        Ok(())
    }
}

fn write_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<(), ControllerError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    for record in records {
        serde_json::to_writer(&mut file, record)?;
        file.write_all(b"\n")?;
    }
    file.flush()?;
    Ok(())
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("step_count", &self.step_count)
            .field("decisions", &self.decisions.len())
            .field("rewards", &self.rewards.len())
            .finish_non_exhaustive()
    }
}
