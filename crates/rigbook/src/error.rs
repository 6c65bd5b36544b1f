//! Failure taxonomy shared by the store, the allocator and the agent.
//!
//! Every error type that can reach a retry loop implements [`Classify`]. The
//! retry utility and the tool layer both read the same [`Classification`], so a
//! lock-wait timeout deep in the store and a 503 from the reasoning engine are
//! handled by one set of rules:
//!
//! - [`Classification::Retryable`]: back off and try again.
//! - [`Classification::NonRetryable`]: surface immediately.
//! - [`Classification::Unrecognized`]: treated as retryable, logged distinctly.
//!
//! A negative allocation result ([`NoCandidate`](crate::schedule::AllocationOutcome::NoCandidate))
//! is an outcome, not an error, and never appears here.

use crate::api::retry::{is_permanent_error, is_transient_error};
use crate::schedule::window::WindowError;
use std::time::Duration;
use thiserror::Error;

/// How a failure should be treated by retry loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Retryable,
    NonRetryable,
    Unrecognized,
}

impl Classification {
    /// Unrecognized failures are retried; only explicit permanent ones are not.
    pub fn is_retryable(self) -> bool {
        !matches!(self, Classification::NonRetryable)
    }
}

/// Implemented by every error that can flow through [`retry_async`](crate::api::retry::retry_async).
pub trait Classify {
    fn classification(&self) -> Classification;
}

// ── Store ──────────────────────────────────────────────────────────

/// Failure talking to the relational store.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    /// Lock-wait timeouts, serialization failures, dropped connections.
    #[error("transient store failure: {0}")]
    Transient(String),
    /// Constraint violations, undecodable rows, bad configuration.
    #[error("store rejected operation: {0}")]
    Permanent(String),
    #[error("{entity} {key} not found")]
    NotFound { entity: &'static str, key: String },
    #[error("unexpected store failure: {0}")]
    Unrecognized(String),
}

impl Classify for StoreError {
    fn classification(&self) -> Classification {
        match self {
            StoreError::Transient(_) => Classification::Retryable,
            StoreError::Permanent(_) | StoreError::NotFound { .. } => Classification::NonRetryable,
            StoreError::Unrecognized(_) => Classification::Unrecognized,
        }
    }
}

// ── Service ────────────────────────────────────────────────────────

/// Failure at the allocation service boundary.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<WindowError> for ServiceError {
    fn from(e: WindowError) -> Self {
        ServiceError::Validation(e.to_string())
    }
}

impl Classify for ServiceError {
    fn classification(&self) -> Classification {
        match self {
            ServiceError::Validation(_) | ServiceError::NotFound(_) => {
                Classification::NonRetryable
            }
            ServiceError::Store(e) => e.classification(),
        }
    }
}

// ── Reasoning engine ───────────────────────────────────────────────

/// Failure invoking the reasoning engine.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("transient engine failure: {0}")]
    Transient(String),
    #[error("engine rejected request: {0}")]
    Permanent(String),
    #[error("engine call timed out after {0:?}")]
    Timeout(Duration),
    #[error("engine failure: {0}")]
    Unrecognized(String),
}

impl EngineError {
    /// Classify a free-form error message, such as the `error` object an API
    /// returns inside an otherwise successful response.
    pub fn from_message(message: String) -> Self {
        if is_permanent_error(&message) {
            EngineError::Permanent(message)
        } else if is_transient_error(&message) {
            EngineError::Transient(message)
        } else {
            EngineError::Unrecognized(message)
        }
    }
}

impl Classify for EngineError {
    fn classification(&self) -> Classification {
        match self {
            EngineError::Transient(_) | EngineError::Timeout(_) => Classification::Retryable,
            EngineError::Permanent(_) => Classification::NonRetryable,
            EngineError::Unrecognized(_) => Classification::Unrecognized,
        }
    }
}

// ── Tools ──────────────────────────────────────────────────────────

/// Outcome of a failed tool invocation, as seen by the orchestrator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolFailure {
    #[error("{0}")]
    Retryable(String),
    #[error("{0}")]
    Fatal(String),
}

impl ToolFailure {
    /// Map any classified error onto the two-way tool outcome.
    pub fn from_classified<E: Classify + std::fmt::Display>(error: &E) -> Self {
        if error.classification().is_retryable() {
            ToolFailure::Retryable(error.to_string())
        } else {
            ToolFailure::Fatal(error.to_string())
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ToolFailure::Retryable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            ToolFailure::Retryable(m) | ToolFailure::Fatal(m) => m,
        }
    }
}

impl Classify for ToolFailure {
    fn classification(&self) -> Classification {
        match self {
            ToolFailure::Retryable(_) => Classification::Retryable,
            ToolFailure::Fatal(_) => Classification::NonRetryable,
        }
    }
}

impl From<ServiceError> for ToolFailure {
    fn from(e: ServiceError) -> Self {
        ToolFailure::from_classified(&e)
    }
}

impl From<EngineError> for ToolFailure {
    fn from(e: EngineError) -> Self {
        ToolFailure::from_classified(&e)
    }
}
