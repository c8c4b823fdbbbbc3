//! Switching controller
//!
//! The learned policy loop over the message plane: a sliding-window
//! [`FeatureSource`] produces 8-dimensional contexts, the
//! [`BanditSwitch`] picks among `{stay, star, chain, flat}`, the
//! [`Controller`] requests switches through the coordinator on its own tick
//! cadence, and the [`RewardAccumulator`] turns consecutive environment
//! snapshots into the reward that closes the loop.

pub mod bandit;
pub mod controller;
pub mod features;
pub mod reward;

pub use bandit::{Action, BanditStats, BanditSwitch, Decision, EpsilonSchedule, N_ACTIONS};
pub use controller::{
    Controller, ControllerError, ControllerStats, DecisionRecord, RewardRecord,
    SwitchOutcomeRecord,
};
pub use features::{FEATURE_DIM, FeatureSource, FeatureVector};
pub use reward::{Phase, RewardAccumulator, StepState};
