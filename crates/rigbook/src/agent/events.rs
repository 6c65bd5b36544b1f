//! Events and handlers for the [`Orchestrator`](super::machine::Orchestrator).
//!
//! The orchestrator reports every stage transition, tool outcome and
//! failure through [`OrchestratorEvent`]. Callers implement [`EventHandler`]
//! to observe them for logging, metrics or test assertions.
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |

use crate::agent::machine::Stage;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub enum OrchestratorEvent<'a> {
    TurnStarted {
        thread_id: &'a str,
        trace_id: &'a str,
    },
    StageEntered(Stage),
    /// The schema came from the cache rather than the store.
    SchemaCacheHit,
    Compressed {
        dropped: usize,
    },
    /// A compression pass left history unchanged.
    CompressionSkipped {
        reason: &'a str,
    },
    ToolExecuting {
        name: &'a str,
        arguments: &'a str,
    },
    ToolResult {
        name: &'a str,
        call_id: &'a str,
        result: &'a str,
    },
    /// A retryable failure that will be retried.
    RetryableFailure {
        stage: Stage,
        error: &'a str,
        retries_left: u32,
    },
    /// The turn is ending in `ErrorTerminal`.
    Failed {
        stage: Stage,
        error: &'a str,
    },
    Finished {
        calls: u32,
    },
}

/// Handler for orchestrator events. The default implementation ignores
/// everything.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &OrchestratorEvent<'_>) {
        let _ = event;
    }
}

pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// ```ignore
/// let handler = FnEventHandler::new(|event| {
///     if let OrchestratorEvent::Failed { stage, error } = event {
///         eprintln!("{stage:?}: {error}");
///     }
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&OrchestratorEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&OrchestratorEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&OrchestratorEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &OrchestratorEvent<'_>) {
        (self.0)(event)
    }
}

/// An event handler that logs events via `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &OrchestratorEvent<'_>) {
        match event {
            OrchestratorEvent::TurnStarted {
                thread_id,
                trace_id,
            } => {
                info!("[{trace_id}] turn started on thread {thread_id}");
            }
            OrchestratorEvent::StageEntered(stage) => {
                debug!("Stage: {stage:?}");
            }
            OrchestratorEvent::SchemaCacheHit => {
                debug!("Schema served from cache");
            }
            OrchestratorEvent::Compressed { dropped } => {
                info!("History compressed: {dropped} message(s) folded into the summary");
            }
            OrchestratorEvent::CompressionSkipped { reason } => {
                debug!("Compression skipped: {reason}");
            }
            OrchestratorEvent::ToolExecuting { name, .. } => {
                debug!("Executing tool: {name}");
            }
            OrchestratorEvent::ToolResult { name, result, .. } => {
                debug!("Tool {name} result: {} bytes", result.len());
            }
            OrchestratorEvent::RetryableFailure {
                stage,
                error,
                retries_left,
            } => {
                warn!("Retryable failure in {stage:?} ({retries_left} retries left): {error}");
            }
            OrchestratorEvent::Failed { stage, error } => {
                error!("Turn failed in {stage:?}: {error}");
            }
            OrchestratorEvent::Finished { calls } => {
                info!("Turn finished after {calls} call(s)");
            }
        }
    }
}
