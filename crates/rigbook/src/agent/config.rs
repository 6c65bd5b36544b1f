//! Configuration for the [`Orchestrator`](super::machine::Orchestrator).
//!
//! Every field has a working default; override through struct fields or the
//! builder methods:
//!
//! ```ignore
//! let config = OrchestratorConfig::new("z-ai/glm-5")
//!     .with_retry_budget(3)
//!     .with_max_calls(12)
//!     .with_turn_timeout(Duration::from_secs(60));
//! ```

use crate::DEFAULT_MODEL;
use crate::api::retry::RetryConfig;
use crate::context::compressor::CompressionConfig;
use std::time::Duration;

/// Retryable failures tolerated per turn before giving up.
pub const DEFAULT_RETRY_BUDGET: u32 = 2;

/// Reasoning and tool calls allowed in one turn.
pub const DEFAULT_MAX_CALLS: u32 = 16;

pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(120);

pub const DEFAULT_SCHEMA_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Recorded in logs; the engine carries its own model.
    pub model: String,
    /// Value `retry_count` is reset to after every success.
    pub retry_budget: u32,
    /// Combined reasoning + tool invocations per turn.
    pub max_calls: u32,
    /// Wall-clock limit for one turn.
    pub turn_timeout: Duration,
    pub compression: CompressionConfig,
    pub schema_ttl: Duration,
    /// Retry policy for the schema read in `SchemaPrefetch`.
    pub schema_retry: RetryConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL)
    }
}

impl OrchestratorConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            retry_budget: DEFAULT_RETRY_BUDGET,
            max_calls: DEFAULT_MAX_CALLS,
            turn_timeout: DEFAULT_TURN_TIMEOUT,
            compression: CompressionConfig::default(),
            schema_ttl: DEFAULT_SCHEMA_TTL,
            schema_retry: RetryConfig::default(),
        }
    }

    pub fn with_retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = budget;
        self
    }

    pub fn with_max_calls(mut self, max: u32) -> Self {
        self.max_calls = max;
        self
    }

    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = timeout;
        self
    }

    pub fn with_compression(mut self, compression: CompressionConfig) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_schema_ttl(mut self, ttl: Duration) -> Self {
        self.schema_ttl = ttl;
        self
    }

    pub fn with_schema_retry(mut self, retry: RetryConfig) -> Self {
        self.schema_retry = retry;
        self
    }
}
