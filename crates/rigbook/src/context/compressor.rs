//! Bounded compaction of conversation history into a [`Summary`].
//!
//! One engine call folds the prior summary and the older part of the
//! history into a new structured summary. The result only takes effect if it
//! validates; every failure leaves history untouched (fail-open). A recent
//! tail of roughly `tail_tokens` stays verbatim and never starts on a tool
//! result whose call was pruned.

use crate::api::engine::ReasoningEngine;
use crate::context::budget::{estimate_message_tokens, estimate_tokens};
use crate::context::summary::Summary;
use crate::{Message, MessageRole};
use std::fmt::Write;
use tracing::{debug, info, warn};

const SUMMARY_PROMPT: &str = "\
You maintain the running memory of a test-rig booking assistant. Merge the \
existing summary with the new messages into one JSON object with exactly these keys:
- \"decisions\": array of strings. Bookings made, cancellations, confirmed choices.
- \"constraints\": array of strings. Dates, subjects (by VIN or id), test types, limits the user set.
- \"open_tasks\": array of strings. Requests not yet completed.
- \"context\": string. Anything else needed to continue.

Rules:
- Only include facts explicitly stated in the messages or the existing summary.
- Keep allocation ids, resource names, VINs and dates verbatim.
- Never drop an item from the existing summary unless a new message supersedes it.
- Reply with the JSON object only.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionConfig {
    /// Compress once the window holds at least this many messages.
    pub compress_after_messages: usize,
    /// Compress once the window is estimated above this many tokens.
    pub compress_above_tokens: usize,
    /// Token budget for the verbatim tail kept after compression.
    pub tail_tokens: usize,
    /// Upper bound on messages in the tail.
    pub max_tail_messages: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            compress_after_messages: 10,
            compress_above_tokens: 8_000,
            tail_tokens: 800,
            max_tail_messages: 4,
        }
    }
}

/// Drop `messages[..drop_before]`; the summary now covers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneInstruction {
    pub drop_before: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    EmptyHistory,
    /// The whole history fits in the tail.
    NothingToDrop,
    EngineFailed(String),
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompressionOutcome {
    Compressed {
        summary: Summary,
        prune: PruneInstruction,
    },
    Unchanged(SkipReason),
}

pub fn should_compress(messages: &[Message], config: &CompressionConfig) -> bool {
    messages.len() >= config.compress_after_messages
        || estimate_tokens(messages) > config.compress_above_tokens
}

/// Index where the retained tail begins.
///
/// Walks back from the newest message until the token or message budget is
/// spent (the newest message is always kept), then widens the tail so it
/// never opens on a tool result separated from its assistant call.
pub fn tail_start(messages: &[Message], config: &CompressionConfig) -> usize {
    let mut start = messages.len();
    let mut used = 0;
    while start > 0 {
        let cost = estimate_message_tokens(&messages[start - 1]);
        let kept = messages.len() - start;
        if kept > 0 && (used + cost > config.tail_tokens || kept >= config.max_tail_messages) {
            break;
        }
        used += cost;
        start -= 1;
    }
    while start > 0 && start < messages.len() && messages[start].role == MessageRole::Tool {
        start -= 1;
    }
    start
}

#[derive(Debug, Clone, Default)]
pub struct Compressor {
    config: CompressionConfig,
}

impl Compressor {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// `(system, user)` prompt pair for the summary call.
    pub fn build_request(&self, span: &[Message], prior: &Summary) -> (String, String) {
        let mut content = String::new();
        let prior_json = serde_json::to_string_pretty(prior).unwrap_or_else(|_| "{}".into());
        content.push_str("=== EXISTING SUMMARY ===\n");
        content.push_str(&prior_json);
        content.push_str("\n\n=== NEW MESSAGES TO SUMMARIZE ===\n");

        for msg in span {
            let role = &msg.role;
            if msg.content.is_some() {
                let _ = writeln!(content, "[{role}]: {}\n", msg.content_str());
            }
            for call in msg.requested_calls() {
                let _ = writeln!(
                    content,
                    "[{role} -> {}]: {}\n",
                    call.function.name, call.function.arguments
                );
            }
        }

        (SUMMARY_PROMPT.to_string(), content)
    }

    /// Fold the older part of `history` into `prior`.
    ///
    /// Never errors: any failure is reported as
    /// [`CompressionOutcome::Unchanged`] and history must be left as is.
    pub async fn compress(
        &self,
        engine: &dyn ReasoningEngine,
        history: &[Message],
        prior: &Summary,
    ) -> CompressionOutcome {
        if history.is_empty() {
            return CompressionOutcome::Unchanged(SkipReason::EmptyHistory);
        }
        let drop_before = tail_start(history, &self.config);
        if drop_before == 0 {
            debug!("Compression skipped: {} message(s) all fit in the tail", history.len());
            return CompressionOutcome::Unchanged(SkipReason::NothingToDrop);
        }

        let (system, user) = self.build_request(&history[..drop_before], prior);
        let raw = match engine.complete(&system, &user).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Summarization failed, keeping messages intact: {e}");
                return CompressionOutcome::Unchanged(SkipReason::EngineFailed(e.to_string()));
            }
        };

        let summary = match Summary::parse_validated(&raw)
            .and_then(|s| s.ensure_supersedes(prior).map(|()| s))
        {
            Ok(s) => s,
            Err(e) => {
                warn!("Summary rejected, keeping messages intact: {e}");
                return CompressionOutcome::Unchanged(SkipReason::Rejected(e.to_string()));
            }
        };

        info!(
            "Compressed {drop_before} message(s) into summary ({} decision(s), {} open task(s))",
            summary.decisions.len(),
            summary.open_tasks.len()
        );
        CompressionOutcome::Compressed {
            summary,
            prune: PruneInstruction { drop_before },
        }
    }
}
