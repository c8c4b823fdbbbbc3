//! Message plane for the APEX runtime
//!
//! Routes messages among a closed set of role agents under one of three
//! interaction topologies (star, chain, flat) and switches topologies
//! mid-episode without breaking ordering or delivery guarantees:
//!
//! - [`Router`]: per-recipient bounded FIFO queues with TTL, retry, epoch
//!   stamping, and topology validation at ingress.
//! - [`SwitchEngine`]: the PREPARE -> QUIESCE -> COMMIT/ABORT protocol that
//!   mutates the routing epoch atomically.
//! - [`Coordinator`]: dwell/cooldown admission around switch requests, one
//!   switch in flight, `TOPOLOGY_CHANGED` notifications.
//! - [`TopologyGuard`]: stateless validation of sender/recipient pairs and
//!   broadcast fanout per topology.
//!
//! Ordering guarantees: per (sender, recipient) pair within one epoch,
//! delivery order equals route order; across a committed switch, every
//! epoch-N message enqueued before COMMIT is delivered before any
//! epoch-(N+1) message; on ABORT, salvaged next-epoch messages land behind
//! the recipient's active tail in their original relative order.

pub mod coordinator;
pub mod domain_types;
pub mod errors;
pub mod router;
pub mod switch;
pub mod topology_guard;

pub use coordinator::{Coordinator, CoordinatorStats, TopologyChanged};
pub use domain_types::{
    DropReason, EXT_REQUEST_ID_KEY, Epoch, Message, MessageId, Payload, Recipient, Topology, roles,
};
pub use errors::{AgentError, MessageError, RouterError, SwitchDenied, TopologyViolation};
pub use router::{BroadcastDelivery, RouteOutcome, RouteReceipt, Router};
pub use switch::{SwitchEngine, SwitchReport, SwitchStats, TopologyCell};
pub use topology_guard::TopologyGuard;

use std::sync::Arc;

use crate::config::RuntimeConfig;
use crate::domain_types::AgentId;

/// The wired message plane: router, switch engine, and coordinator sharing
/// one published (topology, epoch) pair.
#[derive(Debug)]
pub struct MessagePlane {
    /// Epoch-gated router.
    pub router: Arc<Router>,
    /// Three-phase switch engine.
    pub switch: Arc<SwitchEngine>,
    /// Dwell/cooldown admission wrapper.
    pub coordinator: Arc<Coordinator>,
}

impl MessagePlane {
    /// Wires a message plane over `recipients`, starting in `initial`
    /// topology at epoch 0.
    ///
    /// # Errors
    /// Returns [`RouterError::NoRecipients`] when the recipient set is empty.
    pub fn new(
        recipients: impl IntoIterator<Item = AgentId>,
        initial: Topology,
        config: &RuntimeConfig,
    ) -> Result<Self, RouterError> {
        let cell = Arc::new(TopologyCell::new(initial));
        let router = Arc::new(Router::new(recipients, config, Arc::clone(&cell))?);
        let switch = Arc::new(SwitchEngine::new(
            Arc::clone(&router),
            cell,
            config.quiesce_deadline_ms,
        ));
        let coordinator = Arc::new(Coordinator::new(
            Arc::clone(&switch),
            config.dwell_min_steps,
            config.cooldown_steps,
        ));
        Ok(Self {
            router,
            switch,
            coordinator,
        })
    }
}
