//! The tool surface the orchestrator dispatches into.
//!
//! - [`registry`]: the closed [`ToolId`] catalog, the [`ToolHandler`] trait,
//!   closure-based [`FnHandler`], and [`ToolRegistry`], which refuses to build
//!   unless every id has exactly one handler.
//! - [`allocation`]: the booking tools over
//!   [`AllocationService`](crate::schedule::AllocationService).
//!
//! Tool failures are [`ToolFailure`](crate::error::ToolFailure)s: retryable
//! ones send the orchestrator back through its retry budget, fatal ones end
//! the turn with an apology.

pub mod allocation;
pub mod registry;

pub use allocation::allocation_tools;
pub use registry::{
    DEFAULT_MAX_RESULT_BYTES, FnHandler, RegistryError, ToolFuture, ToolHandler, ToolId,
    ToolRegistry, ToolRegistryBuilder, truncate_result,
};
