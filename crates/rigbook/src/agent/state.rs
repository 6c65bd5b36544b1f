//! Per-thread conversation state.

use crate::Message;
use crate::context::summary::Summary;
use serde::{Deserialize, Serialize};

/// Everything the orchestrator remembers about one thread between turns.
///
/// The schema description is a cache of store metadata and is never
/// persisted; it is re-read through the schema cache on the next turn.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConversationState {
    pub thread_id: String,
    /// Bounded window of recent messages; older ones live in `summary`.
    pub messages: Vec<Message>,
    pub summary: Summary,
    /// Retryable failures still tolerated this turn.
    pub retry_count: u32,
    pub error: Option<String>,
    /// Stage that produced `error`.
    pub error_stage: Option<String>,
    #[serde(skip)]
    pub schema: Option<String>,
}

impl ConversationState {
    pub fn new(thread_id: impl Into<String>, retry_budget: u32) -> Self {
        Self {
            thread_id: thread_id.into(),
            messages: Vec::new(),
            summary: Summary::default(),
            retry_count: retry_budget,
            error: None,
            error_stage: None,
            schema: None,
        }
    }

    /// Tool calls from the most recent assistant tool-call message that have
    /// no result yet, in request order.
    pub fn pending_calls(&self) -> Vec<crate::ToolCall> {
        let Some(pos) = self
            .messages
            .iter()
            .rposition(|m| !m.requested_calls().is_empty())
        else {
            return Vec::new();
        };
        let answered: Vec<&str> = self.messages[pos + 1..]
            .iter()
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        self.messages[pos]
            .requested_calls()
            .iter()
            .filter(|c| !answered.contains(&c.id.as_str()))
            .cloned()
            .collect()
    }

    pub fn clear_error(&mut self) {
        self.error = None;
        self.error_stage = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolCall;

    #[test]
    fn pending_calls_skip_answered_ones() {
        let mut state = ConversationState::new("t", 2);
        state.messages.push(Message::user("book V1"));
        state.messages.push(Message::assistant_tool_calls(vec![
            ToolCall::function("a", "get_datetime_now", "{}"),
            ToolCall::function("b", "auto_allocate", "{}"),
        ]));
        state.messages.push(Message::tool_result("a", "{}"));

        let pending = state.pending_calls();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "b");

        state.messages.push(Message::tool_result("b", "{}"));
        assert!(state.pending_calls().is_empty());
    }

    #[test]
    fn schema_is_not_persisted() {
        let mut state = ConversationState::new("t", 2);
        state.schema = Some("resources(id bigint)".into());
        let json = serde_json::to_string(&state).unwrap();
        let back: ConversationState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.schema, None);
        assert_eq!(back.thread_id, "t");
    }
}
