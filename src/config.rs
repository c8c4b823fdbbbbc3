//! Runtime configuration
//!
//! Validated settings for the message plane and the switching controller,
//! with a builder for custom values and JSON save/load for reproducible
//! runs. Every knob is a validated domain type; the defaults match the
//! documented runtime defaults.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain_types::{
    CooldownSteps, DwellMinSteps, ExplorationRate, FanoutLimit, FeatureWindow, MaxAttempts,
    MessageTtlSecs, PayloadCapBytes, QueueCapacity, QuiesceDeadlineMs, RidgeLambda, TokenBudget,
};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field combination failed validation.
    #[error("invalid configuration: {field} - {reason}")]
    Validation {
        /// Offending field.
        field: String,
        /// What was wrong with it.
        reason: String,
    },

    /// File I/O failed while saving or loading.
    #[error("i/o error: {source}")]
    Io {
        /// Underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// JSON (de)serialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serde error.
        #[from]
        source: serde_json::Error,
    },
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // Message plane
    /// Per-recipient queue capacity.
    pub queue_cap_per_agent: QueueCapacity,
    /// Message TTL enforced on dequeue.
    pub message_ttl: MessageTtlSecs,
    /// Retry cap.
    pub max_attempts: MaxAttempts,
    /// Serialized payload cap enforced at construction.
    pub payload_cap_bytes: PayloadCapBytes,

    // Switch protocol
    /// Max quiesce wait before a switch aborts.
    pub quiesce_deadline_ms: QuiesceDeadlineMs,
    /// Minimum ticks in a topology before a switch is admissible.
    pub dwell_min_steps: DwellMinSteps,
    /// Ticks after a commit during which switches are refused.
    pub cooldown_steps: CooldownSteps,
    /// Flat-topology broadcast cap.
    pub fanout_limit: FanoutLimit,

    // Controller
    /// Token budget, the denominator of the headroom feature.
    pub episode_token_budget: TokenBudget,
    /// Sliding-window size for role shares.
    pub feature_window: FeatureWindow,
    /// Exploration rate at decision 0.
    pub epsilon_start: ExplorationRate,
    /// Exploration rate floor.
    pub epsilon_end: ExplorationRate,
    /// Decisions over which epsilon decays linearly.
    pub epsilon_decay_steps: u64,
    /// Ridge regularization for the bandit models.
    pub ridge_lambda: RidgeLambda,
    /// Seed for the bandit's private RNG; recorded so runs are reproducible.
    pub bandit_seed: u64,
}

impl RuntimeConfig {
    /// Configuration with small queues for fast tests.
    ///
    /// # Panics
    /// Panics if a hardcoded value is out of range for its domain type.
    #[must_use]
    pub fn testing() -> Self {
        Self {
            queue_cap_per_agent: QueueCapacity::try_new(1_000).unwrap(),
            ..Self::default()
        }
    }

    /// Starts a builder from the defaults.
    #[must_use]
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::new()
    }

    /// Validates cross-field consistency.
    ///
    /// # Errors
    /// Returns [`ConfigError::Validation`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.epsilon_end.as_f64() > self.epsilon_start.as_f64() {
            return Err(ConfigError::Validation {
                field: "epsilon_end".to_string(),
                reason: "must not exceed epsilon_start".to_string(),
            });
        }
        if self.epsilon_decay_steps == 0 {
            return Err(ConfigError::Validation {
                field: "epsilon_decay_steps".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.message_ttl.as_duration() <= self.quiesce_deadline_ms.as_duration() {
            return Err(ConfigError::Validation {
                field: "message_ttl".to_string(),
                reason: "must exceed the quiesce deadline".to_string(),
            });
        }
        Ok(())
    }

    /// Saves the configuration to a JSON file.
    ///
    /// # Errors
    /// Returns [`ConfigError`] on I/O or serialization failure.
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Loads and validates a configuration from a JSON file.
    ///
    /// # Errors
    /// Returns [`ConfigError`] on I/O, parse, or validation failure.
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for RuntimeConfig {
    /// The documented runtime defaults.
    fn default() -> Self {
        Self {
            queue_cap_per_agent: QueueCapacity::default(),
            message_ttl: MessageTtlSecs::default(),
            max_attempts: MaxAttempts::default(),
            payload_cap_bytes: PayloadCapBytes::default(),
            quiesce_deadline_ms: QuiesceDeadlineMs::default(),
            dwell_min_steps: DwellMinSteps::default(),
            cooldown_steps: CooldownSteps::default(),
            fanout_limit: FanoutLimit::default(),
            episode_token_budget: TokenBudget::default(),
            feature_window: FeatureWindow::default(),
            epsilon_start: ExplorationRate::try_new(0.20).expect("valid default"),
            epsilon_end: ExplorationRate::try_new(0.05).expect("valid default"),
            epsilon_decay_steps: 5_000,
            ridge_lambda: RidgeLambda::try_new(1e-2).expect("valid default"),
            bandit_seed: 42,
        }
    }
}

/// Builder for custom runtime configurations.
#[derive(Debug)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    /// Starts from the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
        }
    }

    /// Sets the per-recipient queue capacity.
    #[must_use]
    pub fn queue_cap_per_agent(mut self, cap: QueueCapacity) -> Self {
        self.config.queue_cap_per_agent = cap;
        self
    }

    /// Sets the message TTL.
    #[must_use]
    pub fn message_ttl(mut self, ttl: MessageTtlSecs) -> Self {
        self.config.message_ttl = ttl;
        self
    }

    /// Sets the retry cap.
    #[must_use]
    pub fn max_attempts(mut self, attempts: MaxAttempts) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    /// Sets the payload size cap.
    #[must_use]
    pub fn payload_cap_bytes(mut self, cap: PayloadCapBytes) -> Self {
        self.config.payload_cap_bytes = cap;
        self
    }

    /// Sets the quiesce deadline.
    #[must_use]
    pub fn quiesce_deadline_ms(mut self, deadline: QuiesceDeadlineMs) -> Self {
        self.config.quiesce_deadline_ms = deadline;
        self
    }

    /// Sets the dwell minimum.
    #[must_use]
    pub fn dwell_min_steps(mut self, dwell: DwellMinSteps) -> Self {
        self.config.dwell_min_steps = dwell;
        self
    }

    /// Sets the cooldown window.
    #[must_use]
    pub fn cooldown_steps(mut self, cooldown: CooldownSteps) -> Self {
        self.config.cooldown_steps = cooldown;
        self
    }

    /// Sets the flat-topology fanout cap.
    #[must_use]
    pub fn fanout_limit(mut self, limit: FanoutLimit) -> Self {
        self.config.fanout_limit = limit;
        self
    }

    /// Sets the episode token budget.
    #[must_use]
    pub fn episode_token_budget(mut self, budget: TokenBudget) -> Self {
        self.config.episode_token_budget = budget;
        self
    }

    /// Sets the feature window size.
    #[must_use]
    pub fn feature_window(mut self, window: FeatureWindow) -> Self {
        self.config.feature_window = window;
        self
    }

    /// Sets the epsilon schedule endpoints.
    #[must_use]
    pub fn epsilon_schedule(
        mut self,
        start: ExplorationRate,
        end: ExplorationRate,
        decay_steps: u64,
    ) -> Self {
        self.config.epsilon_start = start;
        self.config.epsilon_end = end;
        self.config.epsilon_decay_steps = decay_steps;
        self
    }

    /// Sets the ridge regularization strength.
    #[must_use]
    pub fn ridge_lambda(mut self, lambda: RidgeLambda) -> Self {
        self.config.ridge_lambda = lambda;
        self
    }

    /// Sets the bandit RNG seed.
    #[must_use]
    pub fn bandit_seed(mut self, seed: u64) -> Self {
        self.config.bandit_seed = seed;
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    /// Returns [`ConfigError::Validation`] for inconsistent values.
    pub fn build(self) -> Result<RuntimeConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for RuntimeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
