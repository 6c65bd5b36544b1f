//! Context window management for long booking conversations.
//!
//! - **[`budget`]** estimates token usage without a tokenizer.
//! - **[`summary`]** is the structured running summary and the schema gate
//!   every replacement must pass.
//! - **[`compressor`]** folds older messages into a new summary with one
//!   engine call and tells the caller which prefix to prune.
//!
//! Compression is fail-open: if the engine errors or returns something that
//! does not validate, history is left exactly as it was.

pub mod budget;
pub mod compressor;
pub mod summary;

pub use budget::{DEFAULT_CHARS_PER_TOKEN, estimate_message_tokens, estimate_tokens};
pub use compressor::{
    CompressionConfig, CompressionOutcome, Compressor, PruneInstruction, SkipReason,
    should_compress, tail_start,
};
pub use summary::{Summary, SummaryError};
