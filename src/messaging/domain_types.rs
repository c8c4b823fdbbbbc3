//! Domain types for the messaging plane
//!
//! Message envelope, epoch and topology values, and the drop-reason
//! taxonomy. The envelope payload stays a schemaless string-keyed map; the
//! routing-relevant fields are strongly typed.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use uuid::Uuid;

// Re-export base domain types used throughout the messaging plane.
pub use crate::domain_types::{
    AgentId, EpisodeId, FanoutLimit, MaxAttempts, MessageTtlSecs, PayloadCapBytes, QueueCapacity,
    QuiesceDeadlineMs,
};
use crate::messaging::errors::MessageError;

/// Fixed role identifiers recognized by the topology rules.
pub mod roles {
    /// The planner role; hub of the star topology.
    pub const PLANNER: &str = "planner";
    /// The coder role.
    pub const CODER: &str = "coder";
    /// The runner role.
    pub const RUNNER: &str = "runner";
    /// The critic role.
    pub const CRITIC: &str = "critic";
    /// The summarizer role; optional in the chain cycle.
    pub const SUMMARIZER: &str = "summarizer";
    /// Sentinel sender exempt from topology rules, used for kickoff.
    pub const SYSTEM: &str = "system";
}

/// Unique identifier for a message.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new random (128-bit) message ID.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Monotonic routing epoch, bumped on every committed topology switch.
///
/// Epochs are router-authoritative: the value a caller places on a message
/// is overwritten at ingress.
#[nutype(
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Serialize,
        Deserialize,
        Display,
        Default,
        From,
        Into
    ),
    default = 0
)]
pub struct Epoch(u64);

impl Epoch {
    /// Gets the value as u64.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.into_inner()
    }

    /// The epoch that follows this one.
    #[must_use]
    pub fn next(&self) -> Self {
        Self::new(self.into_inner() + 1)
    }
}

/// Interaction topology governing which (sender, recipient) pairs are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    /// Hub-and-spoke around the planner.
    Star,
    /// Strict pipeline cycle planner -> coder -> runner -> critic ->
    /// (summarizer ->) planner.
    Chain,
    /// Any distinct pair, broadcast capped by the fanout limit.
    Flat,
}

impl Topology {
    /// Lowercase wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Star => "star",
            Self::Chain => "chain",
            Self::Flat => "flat",
        }
    }

    /// Compact code used when packing a (topology, epoch) pair into one
    /// atomic word.
    #[must_use]
    pub(crate) fn code(self) -> u64 {
        match self {
            Self::Star => 0,
            Self::Chain => 1,
            Self::Flat => 2,
        }
    }

    pub(crate) fn from_code(code: u64) -> Self {
        match code {
            1 => Self::Chain,
            2 => Self::Flat,
            _ => Self::Star,
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topology {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "star" => Ok(Self::Star),
            "chain" => Ok(Self::Chain),
            "flat" => Ok(Self::Flat),
            other => Err(format!("unknown topology: {other}")),
        }
    }
}

/// Message destination: a single agent or the broadcast sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Recipient {
    /// Unicast to one agent from the router's closed set.
    Agent(AgentId),
    /// Fanout to every recipient except the sender.
    Broadcast,
}

impl Recipient {
    /// Wraps an agent id as a unicast recipient.
    #[must_use]
    pub fn agent(id: AgentId) -> Self {
        Self::Agent(id)
    }

    /// True for the broadcast sentinel.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Self::Broadcast)
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Agent(id) => write!(f, "{id}"),
            Self::Broadcast => f.write_str("BROADCAST"),
        }
    }
}

/// Why a message was dropped instead of delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// The recipient's bounded queue was at capacity.
    QueueFull,
    /// The message was past its TTL at dequeue.
    Expired,
    /// The recipient was not in the router's closed set.
    InvalidRecipient,
    /// The retry cap was exhausted.
    MaxAttempts,
    /// The active topology forbade the pair or fanout.
    TopologyViolation,
}

impl DropReason {
    /// Snake-case wire name, as recorded in drop counters.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::QueueFull => "queue_full",
            Self::Expired => "expired",
            Self::InvalidRecipient => "invalid_recipient",
            Self::MaxAttempts => "max_attempts",
            Self::TopologyViolation => "topology_violation",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Schemaless string-keyed payload carried by every message.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Payload key under which an external envelope's own message id is kept.
///
/// External ids are never substituted for the internal [`MessageId`].
pub const EXT_REQUEST_ID_KEY: &str = "ext_request_id";

/// A routed message.
///
/// Exclusively owned by the [`Router`](crate::messaging::Router) from
/// successful ingress until dequeue, then by the receiving agent. `topo_epoch`
/// is stamped by the router at ingress; any caller-set value is overwritten.
#[derive(Debug, Clone)]
pub struct Message {
    /// Episode this message belongs to.
    pub episode_id: EpisodeId,
    /// Globally unique id, generated by the constructor.
    pub msg_id: MessageId,
    /// Sending agent.
    pub sender: AgentId,
    /// Destination agent or broadcast sentinel.
    pub recipient: Recipient,
    /// Routing epoch stamped at ingress.
    pub topo_epoch: Epoch,
    /// Opaque string-keyed payload.
    pub payload: Payload,
    /// Delivery attempt counter, starting at 0.
    pub attempt: u32,
    /// Monotonic creation timestamp; refreshed on retry.
    pub created: Instant,
    /// Expiry deadline, computed at ingress as `created + TTL` when unset.
    pub expires: Option<Instant>,
    /// True once a retry has put the message back into a queue.
    pub redelivered: bool,
    /// Set when the message is dropped; a dropped message is never delivered.
    pub drop_reason: Option<DropReason>,
}

impl Message {
    /// Builds a message with a freshly generated [`MessageId`], enforcing the
    /// default payload size cap.
    ///
    /// # Errors
    /// Returns [`MessageError::PayloadTooLarge`] when the serialized payload
    /// exceeds the cap.
    pub fn new(
        episode_id: EpisodeId,
        sender: AgentId,
        recipient: Recipient,
        payload: Payload,
    ) -> Result<Self, MessageError> {
        Self::with_cap(episode_id, sender, recipient, payload, PayloadCapBytes::default())
    }

    /// Builds a message enforcing an explicit payload size cap.
    ///
    /// # Errors
    /// Returns [`MessageError::PayloadTooLarge`] when the serialized payload
    /// exceeds `cap`.
    pub fn with_cap(
        episode_id: EpisodeId,
        sender: AgentId,
        recipient: Recipient,
        payload: Payload,
        cap: PayloadCapBytes,
    ) -> Result<Self, MessageError> {
        let size = serde_json::to_vec(&payload)?.len();
        if size > cap.as_usize() {
            return Err(MessageError::PayloadTooLarge {
                size,
                cap: cap.as_usize(),
            });
        }
        Ok(Self {
            episode_id,
            msg_id: MessageId::generate(),
            sender,
            recipient,
            topo_epoch: Epoch::default(),
            payload,
            attempt: 0,
            created: Instant::now(),
            expires: None,
            redelivered: false,
            drop_reason: None,
        })
    }

    /// Records the message id of an external envelope inside the payload.
    ///
    /// The internal [`MessageId`] is left untouched.
    pub fn record_external_request_id(&mut self, ext_id: impl Into<String>) {
        self.payload.insert(
            EXT_REQUEST_ID_KEY.to_string(),
            serde_json::Value::String(ext_id.into()),
        );
    }
}
