//! Concurrency-safe test rig booking with a conversational front end.
//!
//! `rigbook` schedules indivisible, date-bounded bookings of physical test
//! resources (dynamometer rigs and the like) to test subjects (vehicles)
//! under compatibility constraints, and guarantees that no resource is ever
//! double-booked even when many requests race for it. Correctness rests on
//! transactional row locks in the relational store, never on in-process
//! mutexes, so any number of service instances can allocate against the same
//! database.
//!
//! On top of the allocation engine sits a conversational agent: a bounded
//! reasoning / tool-call state machine that talks to an LLM through the
//! [OpenRouter](https://openrouter.ai/) chat completions API, retries
//! transient failures within a budget, and compacts long histories into a
//! validated structured summary.
//!
//! # Getting started
//!
//! ```ignore
//! use rigbook::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(PgStore::connect(&std::env::var("DATABASE_URL")?, 10).await?);
//!     let service = Arc::new(AllocationService::new(store.clone(), AllocatorConfig::default()));
//!     let tools = Arc::new(allocation_tools(service)?);
//!
//!     let engine = OpenRouterEngine::new(
//!         OpenRouterClient::new(std::env::var("OPENROUTER_KEY")?)?,
//!         DEFAULT_MODEL,
//!     );
//!     let orchestrator = Orchestrator::new(
//!         Arc::new(engine),
//!         tools,
//!         store,
//!         Arc::new(MemoryCheckpointStore::new()),
//!         OrchestratorConfig::default(),
//!     )
//!     .with_event_handler(LoggingHandler);
//!
//!     let turn = orchestrator
//!         .handle_message("thread-1", "Book a brake test for VIN 1FT-001 on 2024-01-15")
//!         .await;
//!     println!("{}", turn.reply);
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Book a resource:** [`Allocator::try_allocate`](schedule::Allocator::try_allocate)
//!   runs the check-lock-check-act protocol over ordered candidates, with
//!   optional backup windows. [`AllocationService`](schedule::AllocationService)
//!   is the service boundary the tools call.
//! - **Overlap rules:** [`Window`](schedule::Window) owns the single inclusive
//!   overlap predicate; [`schedule::conflicts`] scans for violations.
//! - **Storage:** [`AllocationStore`](store::AllocationStore) and
//!   [`StoreTx`](store::StoreTx) are the seams; [`PgStore`](store::PgStore)
//!   uses Postgres row locks and [`MemoryStore`](store::MemoryStore) emulates
//!   them for tests.
//! - **Retry and failure classes:** [`error::Classify`] and
//!   [`api::retry::retry_async`].
//! - **The conversation loop:** [`Orchestrator`](agent::Orchestrator) and its
//!   [`Stage`](agent::Stage)s. Observe it via
//!   [`EventHandler`](agent::events::EventHandler).
//! - **Context compaction:** [`context::compressor`].
//! - **Tools exposed to the model:** [`tools::ToolId`] and
//!   [`tools::allocation_tools`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`schedule`] | Windows, compatibility classes, candidate search, allocation transactions, conflict scan, service boundary |
//! | [`store`] | Store traits, Postgres and in-memory implementations |
//! | [`agent`] | Orchestration state machine, state, config, events, checkpoints, schema cache |
//! | [`context`] | Token estimates, structured summaries, history compression |
//! | [`tools`] | Closed tool catalog, registry, allocation tool handlers |
//! | [`api`] | Reasoning engine seam, retry with backoff, trace IDs |
//! | [`error`] | Failure taxonomy shared by the store, the allocator and the agent |

pub mod agent;
pub mod api;
pub mod context;
pub mod domain;
pub mod error;
pub mod prelude;
pub mod schedule;
pub mod store;
pub mod tools;

use crate::error::EngineError;
use reqwest::StatusCode;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

pub use schemars;

// ── Constants ──────────────────────────────────────────────────────

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default model for the booking agent.
pub const DEFAULT_MODEL: &str = "z-ai/glm-5";

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`. Used for tool parameters and for validating
/// compressed summaries.
///
/// # Example
///
/// ```
/// use rigbook::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct LookupArgs {
///     code: String,
///     #[serde(default)]
///     test_type: Option<String>,
/// }
///
/// let schema = json_schema_for::<LookupArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"code".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Request types ──────────────────────────────────────────────────

/// Chat completion request body; unset fields are left out.
#[derive(Serialize, Debug, Default)]
pub struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDef>,
}

/// Output constraint. The summary pass asks for a bare JSON object.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    JsonObject,
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        };
        f.write_str(label)
    }
}

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn text(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(MessageRole::User, content)
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self::text(MessageRole::Assistant, content)
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: None,
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::text(MessageRole::Tool, content)
        }
    }

    /// Text content, or `""` for tool-call-only messages.
    pub fn content_str(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    /// Tool calls requested by this message, if it is an assistant tool-call turn.
    pub fn requested_calls(&self) -> &[ToolCall] {
        match (&self.role, &self.tool_calls) {
            (MessageRole::Assistant, Some(calls)) => calls,
            _ => &[],
        }
    }
}

// ── Tool types ─────────────────────────────────────────────────────

/// The type of a tool definition. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ToolType {
    #[serde(rename = "function")]
    Function,
}

/// Tool definition sent to the API (OpenAI function-calling format).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub function: FunctionDef,
}

impl ToolDef {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: ToolType::Function,
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The type of a tool call. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum CallType {
    #[serde(rename = "function")]
    Function,
}

/// A tool call returned by the model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub function: FunctionCallData,
}

impl ToolCall {
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            call_type: CallType::Function,
            function: FunctionCallData {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FunctionCallData {
    pub name: String,
    pub arguments: String,
}

// ── Response types ─────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct CompletionBody {
    choices: Option<Vec<Choice>>,
    error: Option<ErrorBody>,
    usage: Option<Usage>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Deserialize, Debug)]
struct ErrorBody {
    message: String,
}

#[derive(Deserialize, Debug)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

/// The first choice of a completion, flattened.
#[derive(Debug, Default)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
}

/// Longest slice of an error body kept in an [`EngineError`] message.
const ERROR_BODY_LIMIT: usize = 500;

fn clip(body: &str) -> &str {
    body.get(..body.floor_char_boundary(ERROR_BODY_LIMIT)).unwrap_or(body)
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for the OpenRouter chat completions API.
///
/// Failures come back already classified: throttling, 5xx and network
/// errors are [`EngineError::Transient`], other non-2xx statuses are
/// [`EngineError::Permanent`], and a response that cannot be read as a
/// completion is [`EngineError::Unrecognized`].
pub struct OpenRouterClient {
    http: reqwest::Client,
    api_key: String,
    timeout: Duration,
}

impl OpenRouterClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, EngineError> {
        Self::with_timeout(api_key, Duration::from_secs(120))
    }

    /// Client whose requests give up after `timeout`.
    pub fn with_timeout(api_key: impl Into<String>, timeout: Duration) -> Result<Self, EngineError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("rigbook/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Permanent(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            timeout,
        })
    }

    pub async fn chat(&self, body: &ChatRequest) -> Result<ChatCompletion, EngineError> {
        debug!(
            "LLM request: model={} messages={} tools={}",
            body.model.as_deref().unwrap_or("(default)"),
            body.messages.len(),
            body.tools.len(),
        );

        let started = Instant::now();
        let response = self
            .http
            .post(OPENROUTER_URL)
            .bearer_auth(&self.api_key)
            .header("X-Title", "rigbook")
            .json(body)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.request_error(e))?;
        debug!(
            "LLM response: HTTP {status} in {:.1}s ({} bytes)",
            started.elapsed().as_secs_f64(),
            text.len()
        );

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(EngineError::Transient(format!("HTTP {status}: {}", clip(&text))));
        }
        if !status.is_success() {
            return Err(EngineError::Permanent(format!("HTTP {status}: {}", clip(&text))));
        }

        let parsed: CompletionBody = serde_json::from_str(&text).map_err(|e| {
            EngineError::Unrecognized(format!("unreadable completion ({e}): {}", clip(&text)))
        })?;
        if let Some(err) = parsed.error {
            return Err(EngineError::from_message(err.message));
        }
        if let Some(usage) = parsed.usage {
            trace!(
                "Token usage: prompt={} completion={}",
                usage.prompt_tokens.unwrap_or(0),
                usage.completion_tokens.unwrap_or(0)
            );
        }

        let Some(choice) = parsed.choices.into_iter().flatten().next() else {
            return Ok(ChatCompletion::default());
        };
        Ok(ChatCompletion {
            content: choice.message.content,
            tool_calls: choice.message.tool_calls.unwrap_or_default(),
            finish_reason: choice.finish_reason,
        })
    }

    fn request_error(&self, e: reqwest::Error) -> EngineError {
        if e.is_timeout() {
            EngineError::Timeout(self.timeout)
        } else {
            EngineError::Transient(format!("request failed: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors() {
        let sys = Message::system("hello");
        assert_eq!(sys.role, MessageRole::System);
        assert_eq!(sys.content_str(), "hello");

        let tool = Message::tool_result("call-1", "result");
        assert_eq!(tool.role, MessageRole::Tool);
        assert_eq!(tool.tool_call_id.as_deref(), Some("call-1"));
        assert!(tool.requested_calls().is_empty());
    }

    #[test]
    fn requested_calls_only_on_assistant_turns() {
        let call = ToolCall::function("c1", "detect_conflicts", "{}");
        let msg = Message::assistant_tool_calls(vec![call.clone()]);
        assert_eq!(msg.requested_calls(), &[call]);
        assert_eq!(msg.content_str(), "");
    }

    #[test]
    fn chat_request_omits_unset_fields() {
        let req = ChatRequest {
            model: Some("test-model".into()),
            messages: vec![Message::user("hi")],
            max_tokens: Some(100),
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("tools").is_none());
        assert!(json.get("temperature").is_none());
        assert!(json.get("response_format").is_none());
        assert_eq!(json["max_tokens"], 100);

        let summary = ChatRequest {
            response_format: Some(ResponseFormat::JsonObject),
            ..Default::default()
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["response_format"], serde_json::json!({"type": "json_object"}));
    }

    #[test]
    fn message_roundtrips_through_checkpoint_json() {
        let msg = Message::assistant_tool_calls(vec![ToolCall::function(
            "c9",
            "auto_allocate",
            r#"{"subject":"V1"}"#,
        )]);
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn completion_body_tolerates_null_fields() {
        let body: CompletionBody = serde_json::from_str(
            r#"{"choices":[{"message":{"content":"hi","tool_calls":null},"finish_reason":"stop"}],"usage":null}"#,
        )
        .unwrap();
        let choice = body.choices.unwrap().remove(0);
        assert_eq!(choice.message.content.as_deref(), Some("hi"));
        assert!(choice.message.tool_calls.is_none());
    }

    #[test]
    fn error_bodies_are_clipped_on_char_boundaries() {
        let body = "é".repeat(400);
        let clipped = clip(&body);
        assert!(clipped.len() <= ERROR_BODY_LIMIT);
        assert!(clipped.chars().all(|c| c == 'é'));
        assert_eq!(clip("short"), "short");
    }
}
