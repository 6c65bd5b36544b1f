//! Closed tool catalog and validated dispatch.
//!
//! Every tool the orchestrator can call is a [`ToolId`] variant. A
//! [`ToolRegistry`] is only constructible with exactly one handler per id, so
//! a catalog with a missing or duplicated tool fails at startup instead of at
//! call time. Dispatch validates arguments against the handler's JSON Schema
//! before the handler runs.

use crate::ToolDef;
use crate::error::ToolFailure;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, trace};

/// Maximum size (in bytes) for tool output before truncation.
pub const DEFAULT_MAX_RESULT_BYTES: usize = 30_000;

/// Boxed future returned by [`ToolHandler::call`].
pub type ToolFuture = Pin<Box<dyn Future<Output = Result<String, ToolFailure>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ToolId {
    GetDatetimeNow,
    FindAvailableResources,
    AutoAllocate,
    CheckSubjectAllocations,
    DetectConflicts,
    CompletedTestsCount,
    GetTestsByStatus,
    MaintenanceCheck,
    CancelAllocation,
}

impl ToolId {
    pub const ALL: [ToolId; 9] = [
        ToolId::GetDatetimeNow,
        ToolId::FindAvailableResources,
        ToolId::AutoAllocate,
        ToolId::CheckSubjectAllocations,
        ToolId::DetectConflicts,
        ToolId::CompletedTestsCount,
        ToolId::GetTestsByStatus,
        ToolId::MaintenanceCheck,
        ToolId::CancelAllocation,
    ];

    /// Name the reasoning engine sees and calls.
    pub fn as_str(self) -> &'static str {
        match self {
            ToolId::GetDatetimeNow => "get_datetime_now",
            ToolId::FindAvailableResources => "find_available_resources",
            ToolId::AutoAllocate => "auto_allocate",
            ToolId::CheckSubjectAllocations => "check_subject_allocations",
            ToolId::DetectConflicts => "detect_conflicts",
            ToolId::CompletedTestsCount => "completed_tests_count",
            ToolId::GetTestsByStatus => "get_tests_by_status",
            ToolId::MaintenanceCheck => "maintenance_check",
            ToolId::CancelAllocation => "cancel_allocation",
        }
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolId {
    type Err = ToolFailure;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| ToolFailure::Fatal(format!("unknown tool '{s}'")))
    }
}

/// One executable tool.
///
/// Uses a boxed future so that the trait is dyn-compatible. Handlers own
/// whatever they need (typically an `Arc` to a service) so the future is
/// `'static`.
pub trait ToolHandler: Send + Sync {
    fn id(&self) -> ToolId;

    /// The definition sent to the reasoning engine. Its `parameters` schema
    /// is also what dispatch validates arguments against.
    fn definition(&self) -> ToolDef;

    /// Run with already-validated JSON arguments.
    fn call(&self, arguments: serde_json::Value) -> ToolFuture;
}

/// Type-erased async handler for [`FnHandler`].
type ErasedHandler = Box<dyn Fn(serde_json::Value) -> ToolFuture + Send + Sync>;

/// A closure-based handler that deserializes arguments into `A` and derives
/// its parameter schema from `A`.
///
/// ```ignore
/// #[derive(Deserialize, JsonSchema)]
/// struct CancelArgs {
///     /// Allocation id to cancel.
///     allocation_id: i64,
/// }
///
/// let handler = FnHandler::new::<CancelArgs, _, _>(
///     ToolId::CancelAllocation,
///     "Cancel a scheduled allocation by id.",
///     move |args| {
///         let service = Arc::clone(&service);
///         async move { /* ... */ }
///     },
/// );
/// ```
pub struct FnHandler {
    id: ToolId,
    def: ToolDef,
    handler: ErasedHandler,
}

impl FnHandler {
    pub fn new<A, F, Fut>(id: ToolId, description: &str, handler: F) -> Self
    where
        A: serde::de::DeserializeOwned + schemars::JsonSchema + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ToolFailure>> + Send + 'static,
    {
        let erased = move |raw: serde_json::Value| -> ToolFuture {
            match serde_json::from_value::<A>(raw) {
                Ok(args) => Box::pin(handler(args)),
                Err(e) => Box::pin(async move {
                    Err(ToolFailure::Fatal(format!("invalid tool arguments: {e}")))
                }),
            }
        };

        Self {
            id,
            def: ToolDef::new(id.as_str(), description, crate::json_schema_for::<A>()),
            handler: Box::new(erased),
        }
    }
}

impl ToolHandler for FnHandler {
    fn id(&self) -> ToolId {
        self.id
    }

    fn definition(&self) -> ToolDef {
        self.def.clone()
    }

    fn call(&self, arguments: serde_json::Value) -> ToolFuture {
        (self.handler)(arguments)
    }
}

impl fmt::Debug for FnHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").field("id", &self.id).finish()
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no handler registered for tool '{0}'")]
    MissingHandler(ToolId),
    #[error("more than one handler registered for tool '{0}'")]
    DuplicateHandler(ToolId),
    #[error("tool '{tool}' has an invalid parameter schema: {message}")]
    InvalidSchema { tool: ToolId, message: String },
}

struct Entry {
    handler: Box<dyn ToolHandler>,
    validator: jsonschema::Validator,
}

#[derive(Default)]
pub struct ToolRegistryBuilder {
    handlers: Vec<Box<dyn ToolHandler>>,
    max_result_bytes: Option<usize>,
}

impl ToolRegistryBuilder {
    pub fn with(mut self, handler: impl ToolHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn with_max_result_bytes(mut self, max: usize) -> Self {
        self.max_result_bytes = Some(max);
        self
    }

    /// Fails unless every [`ToolId`] has exactly one handler with a
    /// compilable schema.
    pub fn build(self) -> Result<ToolRegistry, RegistryError> {
        let mut entries = BTreeMap::new();
        for handler in self.handlers {
            let id = handler.id();
            if entries.contains_key(&id) {
                return Err(RegistryError::DuplicateHandler(id));
            }
            let schema = handler.definition().function.parameters;
            let validator =
                jsonschema::validator_for(&schema).map_err(|e| RegistryError::InvalidSchema {
                    tool: id,
                    message: e.to_string(),
                })?;
            entries.insert(id, Entry { handler, validator });
        }
        if let Some(missing) = ToolId::ALL.into_iter().find(|id| !entries.contains_key(id)) {
            return Err(RegistryError::MissingHandler(missing));
        }

        Ok(ToolRegistry {
            entries,
            max_result_bytes: self.max_result_bytes.unwrap_or(DEFAULT_MAX_RESULT_BYTES),
        })
    }
}

/// The complete tool catalog. See the module docs for the construction rule.
pub struct ToolRegistry {
    entries: BTreeMap<ToolId, Entry>,
    max_result_bytes: usize,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.entries.keys().collect::<Vec<_>>())
            .field("max_result_bytes", &self.max_result_bytes)
            .finish()
    }
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    /// Definitions for the reasoning engine, in [`ToolId`] order.
    pub fn definitions(&self) -> Vec<ToolDef> {
        self.entries
            .values()
            .map(|e| e.handler.definition())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Execute a tool call by name.
    ///
    /// Unknown names, unparseable JSON and schema violations are
    /// [`ToolFailure::Fatal`] without the handler running. Empty arguments
    /// are read as `{}`, which some engines send for parameterless tools.
    pub async fn dispatch(&self, name: &str, arguments: &str) -> Result<String, ToolFailure> {
        let id: ToolId = name.parse()?;
        let entry = self
            .entries
            .get(&id)
            .ok_or_else(|| ToolFailure::Fatal(format!("unknown tool '{name}'")))?;

        let raw = if arguments.trim().is_empty() { "{}" } else { arguments };
        let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| {
            ToolFailure::Fatal(format!("invalid JSON arguments for tool '{id}': {e}"))
        })?;

        let errors: Vec<String> = entry
            .validator
            .iter_errors(&value)
            .map(|e| format!("{}: {e}", e.instance_path()))
            .collect();
        if !errors.is_empty() {
            return Err(ToolFailure::Fatal(format!(
                "argument validation failed for tool '{id}': {}",
                errors.join("; ")
            )));
        }

        log_tool_call(id.as_str(), raw);
        let start = std::time::Instant::now();
        let result = entry.handler.call(value).await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(output) => {
                debug!("Tool {id} completed in {elapsed_ms:.0}ms ({} bytes)", output.len());
                trace!("Tool {id} result: {output}");
                Ok(truncate_result(output, self.max_result_bytes))
            }
            Err(failure) => {
                debug!("Tool {id} failed in {elapsed_ms:.0}ms: {failure}");
                Err(failure)
            }
        }
    }
}

/// Log a tool call at INFO level with a truncated preview of arguments.
pub fn log_tool_call(name: &str, arguments: &str) {
    let args_preview: String = arguments.chars().take(120).collect();
    info!(
        "[tool] {}({args_preview}{})",
        name,
        if arguments.chars().count() > 120 { "..." } else { "" }
    );
    trace!("[tool] {name} arguments: {arguments}");
}

/// Truncate a string to at most `max` bytes on a char boundary, appending a
/// notice if trimmed.
pub fn truncate_result(mut s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let total = s.len();
    s.truncate(s.floor_char_boundary(max));
    s.push_str(&format!("...\n[truncated: {total} bytes total]"));
    s
}
