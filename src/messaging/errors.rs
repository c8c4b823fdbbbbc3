//! Error types surfaced by the messaging plane
//!
//! Tagged variants mirror the runtime's drop-reason taxonomy: validator
//! errors are reported to the caller and never retried by the router, while
//! `QueueFull` is retryable by sender policy up to the attempt cap.

use thiserror::Error;

use crate::domain_types::AgentId;
use crate::messaging::domain_types::{MessageId, Topology};

/// Errors surfaced from message construction.
#[derive(Debug, Error)]
pub enum MessageError {
    /// The serialized payload exceeds the configured cap.
    #[error("payload too large: {size} bytes (cap: {cap} bytes)")]
    PayloadTooLarge {
        /// Serialized payload size in bytes.
        size: usize,
        /// Configured cap in bytes.
        cap: usize,
    },

    /// The payload could not be serialized for the size check.
    #[error("payload serialization failed: {source}")]
    Serialization {
        /// Underlying serde error.
        #[from]
        source: serde_json::Error,
    },
}

/// A (sender, recipient) pair or broadcast that the active topology forbids.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("topology violation under {topology}: {sender} -> {recipient}: {rule}")]
pub struct TopologyViolation {
    /// Topology in force when the message was validated.
    pub topology: Topology,
    /// Sending agent.
    pub sender: AgentId,
    /// Recipient, or `BROADCAST` for fanout violations.
    pub recipient: String,
    /// Human-readable rule that failed.
    pub rule: String,
}

/// Errors surfaced from `route`, `dequeue`, and `retry`.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The recipient is not in the router's closed agent set.
    #[error("unknown recipient: {agent}")]
    InvalidRecipient {
        /// The unknown recipient, as written on the message.
        agent: String,
    },

    /// The recipient's bounded queue is at capacity.
    #[error("queue full for {agent} (capacity {capacity})")]
    QueueFull {
        /// Recipient whose queue overflowed.
        agent: AgentId,
        /// Configured per-recipient capacity.
        capacity: usize,
    },

    /// The message violates the active topology's routing rules.
    #[error(transparent)]
    TopologyViolation(#[from] TopologyViolation),

    /// The message has exhausted its delivery attempts.
    #[error("message {msg_id} exceeded {max_attempts} delivery attempts")]
    MaxAttempts {
        /// The exhausted message.
        msg_id: MessageId,
        /// The configured attempt cap.
        max_attempts: u32,
    },

    /// The router was constructed with an empty recipient set.
    #[error("router requires at least one recipient")]
    NoRecipients,
}

/// A switch request refused by the coordinator's admission policy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SwitchDenied {
    /// A previous commit's cooldown window is still open.
    #[error("switch denied: cooldown ({remaining} steps remaining)")]
    Cooldown {
        /// Steps left before switches are admissible again.
        remaining: u64,
    },

    /// The current topology has not been held long enough.
    #[error("switch denied: dwell not satisfied ({steps} of {required} steps)")]
    Dwell {
        /// Steps spent in the current topology.
        steps: u64,
        /// Minimum steps required.
        required: u64,
    },
}

impl SwitchDenied {
    /// Short reason tag recorded in decision logs.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Cooldown { .. } => "cooldown",
            Self::Dwell { .. } => "dwell",
        }
    }
}

/// Errors surfaced from agent message handlers.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The handler failed to construct an outbound message.
    #[error("agent {agent} failed to build a message: {source}")]
    Message {
        /// The agent whose handler failed.
        agent: AgentId,
        /// Underlying construction error.
        #[source]
        source: MessageError,
    },
}
