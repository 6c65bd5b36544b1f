//! Correlation IDs for conversation turns.
//!
//! Each orchestrator turn gets a `trace_id`; every stage transition within the
//! turn gets a `span_id` derived from it, so log lines from the allocator and
//! the tool layer can be tied back to the turn that caused them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Generate a unique trace ID for one conversation turn.
pub fn generate_trace_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("tr-{ts:x}-{count:04x}")
}

/// Span ID for the `step`-th stage visited within a turn.
pub fn generate_span_id(trace_id: &str, step: usize) -> String {
    format!("{trace_id}:s{step}")
}
