//! Base domain types for the APEX runtime
//!
//! Strongly-typed domain values shared across the messaging plane and the
//! controller, defined to prevent primitive obsession and keep configuration
//! scalars validated at the edges.

use nutype::nutype;
use uuid::Uuid;

/// Identifier of an agent participating in an episode.
///
/// Agents come from a closed set fixed at [`Router`](crate::messaging::Router)
/// construction. The well-known role names live in
/// [`roles`](crate::messaging::roles).
#[nutype(
    validate(len_char_min = 1, len_char_max = 64),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Serialize,
        Deserialize,
        Display,
        AsRef,
        Deref,
        TryFrom,
        Into
    )
)]
pub struct AgentId(String);

impl AgentId {
    /// Borrows the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self
    }
}

/// Identifier shared by all messages of one logical episode.
#[nutype(
    validate(len_char_min = 1, len_char_max = 128),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        AsRef,
        TryFrom,
        Into
    )
)]
pub struct EpisodeId(String);

impl EpisodeId {
    /// Creates a fresh random episode identifier.
    ///
    /// # Panics
    /// Never panics: a UUID string is always within the length bounds.
    #[must_use]
    pub fn generate() -> Self {
        Self::try_new(Uuid::new_v4().to_string()).expect("uuid fits episode id bounds")
    }
}

/// Per-recipient queue capacity.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 10_000
)]
pub struct QueueCapacity(usize);

impl QueueCapacity {
    /// Gets the value as usize.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Retry cap; a `retry` past this count reports the message dropped.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 100),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 5
)]
pub struct MaxAttempts(u32);

impl MaxAttempts {
    /// Gets the value as u32.
    #[must_use]
    pub fn as_u32(&self) -> u32 {
        self.into_inner()
    }
}

/// Message time-to-live in seconds, enforced on dequeue.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 86_400),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 60
)]
pub struct MessageTtlSecs(u64);

impl MessageTtlSecs {
    /// Converts to a [`std::time::Duration`].
    #[must_use]
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.into_inner())
    }
}

/// Serialized payload size cap in bytes, enforced at message construction.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 16_777_216),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 524_288
)]
pub struct PayloadCapBytes(usize);

impl PayloadCapBytes {
    /// Gets the value as usize.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Maximum milliseconds the quiesce phase waits for the active epoch to
/// drain before the switch is aborted.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 60_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 50
)]
pub struct QuiesceDeadlineMs(u64);

impl QuiesceDeadlineMs {
    /// Converts to a [`std::time::Duration`].
    #[must_use]
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.into_inner())
    }
}

/// Minimum ticks the current topology must be held before another switch is
/// admissible.
#[nutype(
    validate(less_or_equal = 10_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 2
)]
pub struct DwellMinSteps(u64);

impl DwellMinSteps {
    /// Gets the value as u64.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.into_inner()
    }
}

/// Ticks after a committed switch during which further switches are refused.
#[nutype(
    validate(less_or_equal = 10_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 2
)]
pub struct CooldownSteps(u64);

impl CooldownSteps {
    /// Gets the value as u64.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.into_inner()
    }
}

/// Broadcast fanout cap for the flat topology.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 64),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 2
)]
pub struct FanoutLimit(usize);

impl FanoutLimit {
    /// Gets the value as usize.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Episode token budget, the denominator of the headroom feature.
#[nutype(
    validate(less_or_equal = 100_000_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 10_000
)]
pub struct TokenBudget(u64);

impl TokenBudget {
    /// Gets the value as u64.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.into_inner()
    }
}

/// Sliding-window size for the role-share features.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 4096),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 32
)]
pub struct FeatureWindow(usize);

impl FeatureWindow {
    /// Gets the value as usize.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// An exploration probability in `[0, 1]`.
#[nutype(
    validate(finite, greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        PartialOrd,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct ExplorationRate(f64);

impl ExplorationRate {
    /// Gets the value as f64.
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        self.into_inner()
    }
}

/// Ridge regularization strength for the bandit's per-action models.
#[nutype(
    validate(finite, greater = 0.0, less_or_equal = 1_000.0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        PartialOrd,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct RidgeLambda(f64);

impl RidgeLambda {
    /// Gets the value as f64.
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        self.into_inner()
    }
}
