//! Conversation runtime: the [`Orchestrator`] state machine and its
//! supporting modules.
//!
//! - [`machine`]: [`Orchestrator`], [`Stage`] and [`TurnResult`]. Start here.
//! - [`config`]: [`OrchestratorConfig`] with the retry budget, call and time
//!   budgets, compression thresholds, schema TTL.
//! - [`state`]: [`ConversationState`], the per-thread record.
//! - [`events`]: [`EventHandler`] and [`OrchestratorEvent`] for observing
//!   turns. Includes [`LoggingHandler`], [`NoopHandler`] and
//!   [`FnEventHandler`].
//! - [`checkpoint`]: [`CheckpointStore`] with in-memory and file
//!   implementations.
//! - [`schema_cache`]: [`SchemaCache`], the TTL cache shared across threads.
//! - [`prompt`]: system prompt assembly.

pub mod checkpoint;
pub mod config;
pub mod events;
pub mod machine;
pub mod prompt;
pub mod schema_cache;
pub mod state;

pub use checkpoint::{
    CheckpointError, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore,
};
pub use config::OrchestratorConfig;
pub use events::{EventHandler, FnEventHandler, LoggingHandler, NoopHandler, OrchestratorEvent};
pub use machine::{Orchestrator, Stage, TurnResult};
pub use schema_cache::SchemaCache;
pub use state::ConversationState;
