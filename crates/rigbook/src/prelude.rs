//! Convenience re-exports for common `rigbook` types.
//!
//! ```ignore
//! use rigbook::prelude::*;
//! ```
//!
//! Pulls in what a typical deployment wires together: the stores, the
//! allocation service, the tool catalog, the OpenRouter engine and the
//! orchestrator with its config, checkpoints and event handlers. Internals
//! such as the compressor or the store transaction traits are imported from
//! their modules when needed.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{DEFAULT_MODEL, Message, OpenRouterClient, ToolDef, json_schema_for};

// ── Allocation engine ───────────────────────────────────────────────
pub use crate::domain::{Allocation, AllocationStatus, Resource, Subject, SubjectRef};
pub use crate::error::{Classification, Classify, ServiceError, StoreError, ToolFailure};
pub use crate::schedule::{
    AllocationOutcome, AllocationRequest, AllocationService, AllocatorConfig, Booking, Window,
};
pub use crate::store::{AllocationStore, MemoryStore, PgStore};

// ── Agent runtime ───────────────────────────────────────────────────
pub use crate::agent::{
    CheckpointStore, EventHandler, FileCheckpointStore, FnEventHandler, LoggingHandler,
    MemoryCheckpointStore, NoopHandler, Orchestrator, OrchestratorConfig, OrchestratorEvent,
    SchemaCache, Stage, TurnResult,
};
pub use crate::api::{OpenRouterEngine, ReasoningEngine, RetryConfig};

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::{ToolId, ToolRegistry, allocation_tools};
