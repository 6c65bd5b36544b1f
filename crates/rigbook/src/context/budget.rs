//! Rough token accounting for compression decisions.
//!
//! No tokenizer is involved; the estimate only has to be stable enough to
//! trigger compaction at about the right size.

use crate::Message;

/// Characters per token. Most tokenizers average 3-4 chars per token for
/// English text; 3.5 is the middle ground.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Role markers and separators the API adds around each message.
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

fn chars_to_tokens(chars: usize) -> usize {
    (chars as f64 / DEFAULT_CHARS_PER_TOKEN).ceil() as usize
}

/// Estimated tokens for one message, including tool-call names and arguments.
pub fn estimate_message_tokens(message: &Message) -> usize {
    let call_chars: usize = message
        .requested_calls()
        .iter()
        .map(|c| c.function.name.len() + c.function.arguments.len())
        .sum();
    MESSAGE_OVERHEAD_TOKENS + chars_to_tokens(message.content_str().len() + call_chars)
}

pub fn estimate_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolCall;

    #[test]
    fn empty_history_is_free() {
        assert_eq!(estimate_tokens(&[]), 0);
    }

    #[test]
    fn estimate_scales_with_content() {
        let short = estimate_message_tokens(&Message::user("hi"));
        let long = estimate_message_tokens(&Message::user("x".repeat(3_500)));
        assert_eq!(long, MESSAGE_OVERHEAD_TOKENS + 1_000);
        assert!(short < long);
    }

    #[test]
    fn tool_call_arguments_count() {
        let call = ToolCall::function("c1", "auto_allocate", "y".repeat(700));
        let msg = Message::assistant_tool_calls(vec![call]);
        assert!(estimate_message_tokens(&msg) > 200);
    }
}
