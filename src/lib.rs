//! # APEX - Topology-Switching Message Runtime
//!
//! APEX routes messages among a fixed set of role agents (planner, coder,
//! runner, critic, summarizer) under one of three interaction topologies
//! (star, chain, flat), and switches topologies mid-episode under a learned
//! policy while preserving ordering and delivery guarantees.
//!
//! ## Core components
//!
//! - [`messaging::Router`]: per-recipient bounded FIFO queues with TTL,
//!   retry, epoch stamping, and topology validation at ingress.
//! - [`messaging::SwitchEngine`]: the PREPARE -> QUIESCE -> COMMIT/ABORT
//!   switch protocol that mutates the routing epoch atomically.
//! - [`messaging::Coordinator`]: dwell/cooldown admission around switch
//!   requests, with `TOPOLOGY_CHANGED` notifications.
//! - [`messaging::TopologyGuard`]: stateless sender/recipient pair and
//!   fanout validation per topology.
//! - [`controller::BanditSwitch`]: an epsilon-greedy ridge-linear contextual
//!   bandit over `{stay, star, chain, flat}`, fed by an 8-dimensional
//!   [`controller::FeatureSource`] and closed by a deterministic
//!   [`controller::RewardAccumulator`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use apex::config::RuntimeConfig;
//! use apex::controller::Controller;
//! use apex::domain_types::AgentId;
//! use apex::messaging::{MessagePlane, Topology};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RuntimeConfig::default();
//! let team = ["planner", "coder", "runner", "critic"]
//!     .iter()
//!     .map(|r| AgentId::try_new((*r).to_string()))
//!     .collect::<Result<Vec<_>, _>>()?;
//! let plane = MessagePlane::new(team, Topology::Star, &config)?;
//! let mut controller = Controller::new(
//!     plane.switch.clone(),
//!     plane.coordinator.clone(),
//!     &config,
//! );
//!
//! let record = controller.tick().await;
//! println!("step {} chose {}", record.step, record.action);
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees
//!
//! - A dequeued message never carries an epoch newer than the active one.
//! - Across a committed switch, all epoch-N messages enqueued before COMMIT
//!   are delivered before any epoch-(N+1) message.
//! - On ABORT, salvaged next-epoch messages land behind the recipient's
//!   active tail in their original relative order.
//! - Message ids are unique per process lifetime; broadcast copies get
//!   freshly minted ids.
//! - Bandit decisions are bit-stable given the same seed and call sequence.

pub mod agents;
pub mod config;
pub mod controller;
pub mod domain_types;
pub mod integrations;
pub mod messaging;

pub use agents::{Agent, ScriptedAgent, scripted_team};
pub use config::{ConfigError, RuntimeConfig, RuntimeConfigBuilder};
pub use controller::{Action, BanditSwitch, Controller, FeatureSource, RewardAccumulator};
pub use domain_types::{AgentId, EpisodeId};
pub use messaging::{
    Coordinator, Epoch, Message, MessageId, MessagePlane, Payload, Recipient, RouteOutcome, Router,
    RouterError, SwitchEngine, Topology, TopologyGuard,
};
