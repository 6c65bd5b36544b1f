//! The booking tools exposed to the reasoning engine.
//!
//! Each tool is a thin [`FnHandler`] over [`AllocationService`]: typed
//! arguments in, a JSON document out. Service errors become
//! [`ToolFailure`]s through their classification, so a lock timeout is
//! retried by the orchestrator and an unknown VIN is not.

use crate::domain::{AllocationId, AllocationStatus, SubjectRef};
use crate::error::{ServiceError, ToolFailure};
use crate::schedule::{AllocationOutcome, AllocationRequest, AllocationService, Window};
use crate::tools::registry::{FnHandler, RegistryError, ToolId, ToolRegistry};
use chrono::{Local, NaiveDate};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;

#[derive(Deserialize, JsonSchema)]
pub struct NoArgs {}

#[derive(Deserialize, JsonSchema)]
pub struct FindAvailableArgs {
    /// Subject id (number) or VIN code (string).
    pub subject: SubjectRef,
    /// First day of the window, YYYY-MM-DD.
    pub start_date: NaiveDate,
    /// Last day of the window (inclusive), YYYY-MM-DD.
    pub end_date: NaiveDate,
    /// Test to run, e.g. "brake" or "emissions".
    pub test_type: String,
}

fn default_days() -> u32 {
    1
}

#[derive(Deserialize, JsonSchema)]
pub struct AutoAllocateArgs {
    /// Subject id (number) or VIN code (string).
    pub subject: SubjectRef,
    /// First day of the booking, YYYY-MM-DD.
    pub start_date: NaiveDate,
    /// Booking length in days (1-30). Defaults to 1.
    #[serde(default = "default_days")]
    pub days: u32,
    /// Test to run, e.g. "brake" or "emissions".
    pub test_type: String,
    /// Try later windows if the requested one is fully booked.
    #[serde(default)]
    pub backup: bool,
    /// How many days forward a backup window may move.
    #[serde(default)]
    pub max_backup_days: Option<u32>,
}

#[derive(Deserialize, JsonSchema)]
pub struct SubjectArgs {
    /// Subject id (number) or VIN code (string).
    pub subject: SubjectRef,
}

#[derive(Deserialize, JsonSchema)]
pub struct StatusArgs {
    /// One of "scheduled", "completed", "cancelled".
    pub status: AllocationStatus,
}

#[derive(Deserialize, JsonSchema)]
pub struct CancelArgs {
    /// Id of the scheduled allocation to cancel.
    pub allocation_id: AllocationId,
}

fn to_json<T: Serialize>(value: &T) -> Result<String, ToolFailure> {
    serde_json::to_string(value)
        .map_err(|e| ToolFailure::Fatal(format!("failed to encode tool result: {e}")))
}

/// Builds a handler whose closure receives its own clone of the service.
fn service_tool<A, F, Fut>(
    service: &Arc<AllocationService>,
    id: ToolId,
    description: &str,
    run: F,
) -> FnHandler
where
    A: serde::de::DeserializeOwned + JsonSchema + Send + 'static,
    F: Fn(Arc<AllocationService>, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, ToolFailure>> + Send + 'static,
{
    let service = Arc::clone(service);
    FnHandler::new::<A, _, _>(id, description, move |args| run(Arc::clone(&service), args))
}

/// The complete booking catalog over `service`.
pub fn allocation_tools(service: Arc<AllocationService>) -> Result<ToolRegistry, RegistryError> {
    ToolRegistry::builder()
        .with(FnHandler::new::<NoArgs, _, _>(
            ToolId::GetDatetimeNow,
            "Current local date and time. Use it to resolve relative dates such as \
             'next Monday' before booking.",
            |_| async {
                let now = Local::now();
                to_json(&json!({
                    "now": now.to_rfc3339(),
                    "date": now.date_naive(),
                    "weekday": now.format("%A").to_string(),
                }))
            },
        ))
        .with(service_tool(
            &service,
            ToolId::FindAvailableResources,
            "List enabled resources compatible with the subject and test type that are free \
             for the whole inclusive window. Does not book anything.",
            |service, args: FindAvailableArgs| async move {
                let window =
                    Window::for_request(args.start_date, args.end_date).map_err(ServiceError::from)?;
                let found = service
                    .find_available(&args.subject, window, &args.test_type)
                    .await?;
                to_json(&json!({ "window": window, "resources": found }))
            },
        ))
        .with(service_tool(
            &service,
            ToolId::AutoAllocate,
            "Book the first free compatible resource for the subject. With backup=true, \
             later windows of the same length are tried when the requested one is full.",
            |service, args: AutoAllocateArgs| async move {
                let request = AllocationRequest {
                    subject: args.subject,
                    start: args.start_date,
                    days: args.days,
                    test_type: args.test_type,
                    backup: args.backup,
                    max_backup_days: args.max_backup_days,
                };
                let outcome = service.auto_allocate(&request).await?;
                let message = match &outcome {
                    AllocationOutcome::Allocated(booking) => booking.message(),
                    AllocationOutcome::NoCandidate => {
                        "No compatible resource is free in the requested window.".to_string()
                    }
                };
                to_json(&json!({ "result": outcome, "message": message }))
            },
        ))
        .with(service_tool(
            &service,
            ToolId::CheckSubjectAllocations,
            "All allocations of one subject, with resource names and statuses.",
            |service, args: SubjectArgs| async move {
                to_json(&service.subject_allocations(&args.subject).await?)
            },
        ))
        .with(service_tool(
            &service,
            ToolId::DetectConflicts,
            "Scan every resource for overlapping active allocations. An empty list means \
             no double bookings.",
            |service, _: NoArgs| async move {
                let conflicts = service.detect_conflicts().await?;
                to_json(&json!({ "count": conflicts.len(), "conflicts": conflicts }))
            },
        ))
        .with(service_tool(
            &service,
            ToolId::CompletedTestsCount,
            "Number of allocations whose test has completed.",
            |service, _: NoArgs| async move {
                to_json(&json!({ "completed": service.completed_tests_count().await? }))
            },
        ))
        .with(service_tool(
            &service,
            ToolId::GetTestsByStatus,
            "Allocations with the given status, with resource names and windows.",
            |service, args: StatusArgs| async move {
                to_json(&service.allocations_by_status(args.status).await?)
            },
        ))
        .with(service_tool(
            &service,
            ToolId::MaintenanceCheck,
            "Enabled resources that are outside their availability window today.",
            |service, _: NoArgs| async move {
                to_json(&service.maintenance_check(Local::now().date_naive()).await?)
            },
        ))
        .with(service_tool(
            &service,
            ToolId::CancelAllocation,
            "Cancel a scheduled allocation by id. Completed or already cancelled \
             allocations cannot be cancelled.",
            |service, args: CancelArgs| async move {
                to_json(&service.cancel_allocation(args.allocation_id).await?)
            },
        ))
        .build()
}
