//! The conversation orchestration state machine.
//!
//! One user message drives one turn through these stages:
//!
//! ```text
//! Start -> SchemaPrefetch -> [Compress] -> Reason -> Act -> [Compress] -> Reason -> ... -> Terminal
//!                 \                          \        \
//!                  +------------------------- +--------+--> ErrorTerminal
//! ```
//!
//! Routing is a function of the current stage, its outcome and the state:
//!
//! - success resets `retry_count` to the budget and moves forward;
//! - a retryable failure with `retry_count > 0` decrements it and re-enters
//!   the same stage;
//! - a fatal failure, or a retryable one with no retries left, goes to
//!   `ErrorTerminal`, which appends exactly one apology and resets the
//!   error state.
//!
//! `Act` re-derives its work from the conversation (the latest assistant
//! tool-call message minus calls that already have results), so a retried
//! `Act` never replays a call that already succeeded.
//!
//! Each turn is bounded by a wall-clock budget and a call budget (reasoning
//! plus tool calls). Running out of either is fatal.

use crate::Message;
use crate::agent::checkpoint::CheckpointStore;
use crate::agent::config::OrchestratorConfig;
use crate::agent::events::{EventHandler, LoggingHandler, OrchestratorEvent};
use crate::agent::prompt::{APOLOGY, booking_system_prompt};
use crate::agent::schema_cache::SchemaCache;
use crate::agent::state::ConversationState;
use crate::api::engine::{EngineReply, ReasoningEngine};
use crate::api::retry::retry_async;
use crate::api::tracing::{generate_span_id, generate_trace_id};
use crate::context::compressor::{CompressionOutcome, Compressor, should_compress};
use crate::error::ToolFailure;
use crate::store::AllocationStore;
use crate::tools::ToolRegistry;
use chrono::Local;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Stage {
    Start,
    SchemaPrefetch,
    Compress,
    Reason,
    Act,
    Terminal,
    ErrorTerminal,
}

/// Outcome of one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnResult {
    pub trace_id: String,
    /// Final assistant text, or the apology after a failure.
    pub reply: String,
    /// Every stage entered, in order, ending in `Terminal` or `ErrorTerminal`.
    pub trace: Vec<Stage>,
    /// Reasoning plus tool calls made this turn.
    pub calls: u32,
}

impl TurnResult {
    pub fn failed(&self) -> bool {
        self.trace.last() == Some(&Stage::ErrorTerminal)
    }
}

/// Mutable bookkeeping for one turn.
struct Turn {
    deadline: Instant,
    calls: u32,
    /// Set once a compression pass leaves history unchanged, so a failing
    /// summarizer is not re-invoked before every reasoning step.
    compression_exhausted: bool,
}

pub struct Orchestrator {
    engine: Arc<dyn ReasoningEngine>,
    tools: Arc<ToolRegistry>,
    store: Arc<dyn AllocationStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    schema_cache: Arc<SchemaCache>,
    compressor: Compressor,
    events: Arc<dyn EventHandler>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        engine: Arc<dyn ReasoningEngine>,
        tools: Arc<ToolRegistry>,
        store: Arc<dyn AllocationStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            engine,
            tools,
            store,
            checkpoints,
            schema_cache: Arc::new(SchemaCache::new(config.schema_ttl)),
            compressor: Compressor::new(config.compression.clone()),
            events: Arc::new(LoggingHandler),
            config,
        }
    }

    /// Share one schema cache between orchestrators.
    pub fn with_schema_cache(mut self, cache: Arc<SchemaCache>) -> Self {
        self.schema_cache = cache;
        self
    }

    pub fn with_event_handler(mut self, handler: impl EventHandler + 'static) -> Self {
        self.events = Arc::new(handler);
        self
    }

    pub fn schema_cache(&self) -> &Arc<SchemaCache> {
        &self.schema_cache
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Load the thread, run one turn for `input`, and save the thread back.
    ///
    /// Checkpoint failures are logged and never fail the turn: an unreadable
    /// checkpoint starts a fresh conversation, and a failed save loses only
    /// this turn's history.
    pub async fn handle_message(&self, thread_id: &str, input: &str) -> TurnResult {
        let mut state = match self.checkpoints.load(thread_id).await {
            Ok(Some(state)) => state,
            Ok(None) => ConversationState::new(thread_id, self.config.retry_budget),
            Err(e) => {
                warn!("Failed to load checkpoint for thread {thread_id}, starting fresh: {e}");
                ConversationState::new(thread_id, self.config.retry_budget)
            }
        };

        let result = self.run_turn(&mut state, input).await;

        if let Err(e) = self.checkpoints.save(&state).await {
            warn!("Failed to save checkpoint for thread {thread_id}: {e}");
        }
        result
    }

    /// Run one turn against in-memory state.
    pub async fn run_turn(&self, state: &mut ConversationState, input: &str) -> TurnResult {
        let trace_id = generate_trace_id();
        self.events.on_event(&OrchestratorEvent::TurnStarted {
            thread_id: &state.thread_id,
            trace_id: &trace_id,
        });
        info!(
            "[{trace_id}] thread {} ({}): new message ({} chars)",
            state.thread_id,
            self.config.model,
            input.chars().count()
        );

        state.messages.push(Message::user(input));
        state.retry_count = self.config.retry_budget;
        state.clear_error();

        let mut turn = Turn {
            deadline: Instant::now() + self.config.turn_timeout,
            calls: 0,
            compression_exhausted: false,
        };
        let mut trace = Vec::new();
        let mut stage = Stage::Start;

        loop {
            debug!(span_id = %generate_span_id(&trace_id, trace.len()), "entering {stage:?}");
            trace.push(stage);
            self.events.on_event(&OrchestratorEvent::StageEntered(stage));

            let outcome = match stage {
                Stage::Start => Ok(Stage::SchemaPrefetch),
                Stage::SchemaPrefetch => self.prefetch_schema(state, &mut turn).await,
                Stage::Compress => self.compress(state, &mut turn).await,
                Stage::Reason => self.reason(state, &mut turn).await,
                Stage::Act => self.act(state, &mut turn).await,
                Stage::Terminal => {
                    state.retry_count = self.config.retry_budget;
                    self.events
                        .on_event(&OrchestratorEvent::Finished { calls: turn.calls });
                    let reply = state
                        .messages
                        .last()
                        .map(|m| m.content_str().to_string())
                        .unwrap_or_default();
                    return TurnResult {
                        trace_id,
                        reply,
                        trace,
                        calls: turn.calls,
                    };
                }
                Stage::ErrorTerminal => {
                    self.fail_turn(state);
                    return TurnResult {
                        trace_id,
                        reply: APOLOGY.to_string(),
                        trace,
                        calls: turn.calls,
                    };
                }
            };

            stage = self.route(state, stage, outcome);
        }
    }

    /// Next stage after `stage` produced `outcome`.
    fn route(
        &self,
        state: &mut ConversationState,
        stage: Stage,
        outcome: Result<Stage, ToolFailure>,
    ) -> Stage {
        let failure = match outcome {
            Ok(next) => {
                state.retry_count = self.config.retry_budget;
                state.clear_error();
                return next;
            }
            Err(failure) => failure,
        };

        state.error = Some(failure.message().to_string());
        state.error_stage = Some(format!("{stage:?}"));

        if failure.is_retryable() && state.retry_count > 0 {
            state.retry_count -= 1;
            self.events.on_event(&OrchestratorEvent::RetryableFailure {
                stage,
                error: failure.message(),
                retries_left: state.retry_count,
            });
            return stage;
        }

        self.events.on_event(&OrchestratorEvent::Failed {
            stage,
            error: failure.message(),
        });
        Stage::ErrorTerminal
    }

    /// `Compress` when the window is over a threshold, else `Reason`.
    fn before_reason(&self, state: &ConversationState, turn: &Turn) -> Stage {
        if !turn.compression_exhausted && should_compress(&state.messages, self.compressor.config())
        {
            Stage::Compress
        } else {
            Stage::Reason
        }
    }

    /// Await `fut` within what is left of the turn's wall-clock budget.
    async fn bounded<T>(&self, turn: &Turn, fut: impl Future<Output = T>) -> Result<T, ToolFailure> {
        let remaining = turn.deadline.saturating_duration_since(Instant::now());
        tokio::time::timeout(remaining, fut).await.map_err(|_| {
            ToolFailure::Fatal(format!(
                "turn exceeded its time budget of {:.0}s",
                self.config.turn_timeout.as_secs_f64()
            ))
        })
    }

    fn spend_call(&self, turn: &mut Turn) -> Result<(), ToolFailure> {
        if turn.calls >= self.config.max_calls {
            return Err(ToolFailure::Fatal(format!(
                "turn exceeded its budget of {} reasoning/tool calls",
                self.config.max_calls
            )));
        }
        turn.calls += 1;
        Ok(())
    }

    async fn prefetch_schema(
        &self,
        state: &mut ConversationState,
        turn: &mut Turn,
    ) -> Result<Stage, ToolFailure> {
        if let Some(schema) = self.schema_cache.get() {
            self.events.on_event(&OrchestratorEvent::SchemaCacheHit);
            state.schema = Some(schema);
            return Ok(self.before_reason(state, turn));
        }

        let read = retry_async(&self.config.schema_retry, "schema read", || {
            self.store.describe_schema()
        });
        let description = self
            .bounded(turn, read)
            .await?
            .map_err(|e| ToolFailure::Fatal(format!("failed to load database schema: {e}")))?;

        let rendered = description.render();
        self.schema_cache.put(rendered.clone());
        state.schema = Some(rendered);
        Ok(self.before_reason(state, turn))
    }

    async fn compress(
        &self,
        state: &mut ConversationState,
        turn: &mut Turn,
    ) -> Result<Stage, ToolFailure> {
        let pass = self
            .compressor
            .compress(self.engine.as_ref(), &state.messages, &state.summary);
        match self.bounded(turn, pass).await? {
            CompressionOutcome::Compressed { summary, prune } => {
                state.summary = summary;
                state.messages.drain(..prune.drop_before);
                self.events.on_event(&OrchestratorEvent::Compressed {
                    dropped: prune.drop_before,
                });
            }
            CompressionOutcome::Unchanged(reason) => {
                turn.compression_exhausted = true;
                self.events.on_event(&OrchestratorEvent::CompressionSkipped {
                    reason: &format!("{reason:?}"),
                });
            }
        }
        Ok(Stage::Reason)
    }

    async fn reason(
        &self,
        state: &mut ConversationState,
        turn: &mut Turn,
    ) -> Result<Stage, ToolFailure> {
        self.spend_call(turn)?;

        let system = booking_system_prompt(
            state.schema.as_deref(),
            &state.summary,
            Local::now().date_naive(),
        );
        let mut prompt = Vec::with_capacity(state.messages.len() + 1);
        prompt.push(Message::system(system));
        prompt.extend(state.messages.iter().cloned());
        let definitions = self.tools.definitions();

        let reply = self
            .bounded(turn, self.engine.invoke(&prompt, &definitions))
            .await??;

        match reply {
            EngineReply::Text(text) => {
                state.messages.push(Message::assistant_text(text));
                Ok(Stage::Terminal)
            }
            EngineReply::ToolCalls(calls) => {
                debug!("{} tool call(s) requested", calls.len());
                state.messages.push(Message::assistant_tool_calls(calls));
                Ok(Stage::Act)
            }
        }
    }

    async fn act(
        &self,
        state: &mut ConversationState,
        turn: &mut Turn,
    ) -> Result<Stage, ToolFailure> {
        for call in state.pending_calls() {
            self.spend_call(turn)?;
            let name = call.function.name.as_str();
            let arguments = call.function.arguments.as_str();
            self.events
                .on_event(&OrchestratorEvent::ToolExecuting { name, arguments });

            let output = self
                .bounded(turn, self.tools.dispatch(name, arguments))
                .await??;

            self.events.on_event(&OrchestratorEvent::ToolResult {
                name,
                call_id: &call.id,
                result: &output,
            });
            state.messages.push(Message::tool_result(call.id.clone(), output));
        }
        Ok(self.before_reason(state, turn))
    }

    /// `ErrorTerminal`: close any unanswered tool calls so the history stays
    /// well-formed, append the apology and reset the error state.
    fn fail_turn(&self, state: &mut ConversationState) {
        let error = state.error.clone().unwrap_or_else(|| "unknown error".into());
        let stage = state.error_stage.clone().unwrap_or_default();
        error!(
            "Turn on thread {} failed in {stage}: {error} (retries left: {})",
            state.thread_id, state.retry_count
        );

        for call in state.pending_calls() {
            state
                .messages
                .push(Message::tool_result(call.id, format!("Error: {error}")));
        }
        state.messages.push(Message::assistant_text(APOLOGY));
        state.retry_count = self.config.retry_budget;
        state.clear_error();
    }
}
