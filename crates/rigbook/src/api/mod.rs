//! Everything between the orchestrator and the outside world's flaky edges.
//!
//! - [`engine`]: the [`ReasoningEngine`] seam and its OpenRouter implementation.
//! - [`retry`]: backoff wrapper driven by [`Classify`](crate::error::Classify),
//!   plus string classifiers for HTTP failures.
//! - [`tracing`]: per-turn correlation IDs.

pub mod engine;
pub mod retry;
pub mod tracing;

pub use engine::{EngineReply, OpenRouterEngine, ReasoningEngine};
pub use retry::{RetryConfig, retry_async};
pub use tracing::{generate_span_id, generate_trace_id};
