//! The reasoning engine seam.
//!
//! The orchestrator and the context compressor only ever see
//! [`ReasoningEngine`]. [`OpenRouterEngine`] is the production implementation;
//! tests script replies with their own implementations.

use crate::error::EngineError;
use crate::{ChatRequest, Message, OpenRouterClient, ResponseFormat, ToolCall, ToolDef};
use std::future::Future;
use std::pin::Pin;
use tracing::debug;

/// Boxed future returned by [`ReasoningEngine`] methods.
pub type EngineFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EngineError>> + Send + 'a>>;

/// What the engine decided to do with the current history.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineReply {
    /// A final user-facing answer.
    Text(String),
    /// One or more tool invocations to run before reasoning again.
    ToolCalls(Vec<ToolCall>),
}

pub trait ReasoningEngine: Send + Sync {
    /// Decide the next step given the full prompt and the tool catalog.
    fn invoke<'a>(&'a self, messages: &'a [Message], tools: &'a [ToolDef])
    -> EngineFuture<'a, EngineReply>;

    /// Single-shot completion without tools; used for summaries.
    fn complete<'a>(&'a self, system: &'a str, user: &'a str) -> EngineFuture<'a, String>;
}

/// [`ReasoningEngine`] backed by the OpenRouter chat completions API.
pub struct OpenRouterEngine {
    client: OpenRouterClient,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenRouterEngine {
    pub fn new(client: OpenRouterClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            max_tokens: 2048,
            temperature: 0.0,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

impl ReasoningEngine for OpenRouterEngine {
    fn invoke<'a>(
        &'a self,
        messages: &'a [Message],
        tools: &'a [ToolDef],
    ) -> EngineFuture<'a, EngineReply> {
        Box::pin(async move {
            let body = ChatRequest {
                model: Some(self.model.clone()),
                messages: messages.to_vec(),
                max_tokens: Some(self.max_tokens),
                temperature: Some(self.temperature),
                tools: tools.to_vec(),
                ..Default::default()
            };
            let completion = self.client.chat(&body).await?;

            if !completion.tool_calls.is_empty() {
                return Ok(EngineReply::ToolCalls(completion.tool_calls));
            }
            match completion.content {
                Some(text) if !text.trim().is_empty() => Ok(EngineReply::Text(text)),
                _ => {
                    debug!(
                        "Empty completion (finish_reason={:?})",
                        completion.finish_reason
                    );
                    Err(EngineError::Unrecognized(
                        "model returned neither text nor tool calls".into(),
                    ))
                }
            }
        })
    }

    fn complete<'a>(&'a self, system: &'a str, user: &'a str) -> EngineFuture<'a, String> {
        Box::pin(async move {
            let body = ChatRequest {
                model: Some(self.model.clone()),
                messages: vec![Message::system(system), Message::user(user)],
                max_tokens: Some(self.max_tokens),
                response_format: Some(ResponseFormat::JsonObject),
                ..Default::default()
            };
            let completion = self.client.chat(&body).await?;
            completion
                .content
                .ok_or_else(|| EngineError::Unrecognized("empty completion".into()))
        })
    }
}
