//! The allocation service boundary.
//!
//! Resolves subjects, validates windows before any allocation logic runs,
//! wraps store reads in the retry utility, and turns every store failure into
//! a [`ServiceError`] whose classification the tool layer can act on.

use crate::api::retry::{RetryConfig, retry_async};
use crate::domain::{
    Allocation, AllocationId, AllocationStatus, CancelOutcome, Resource, Subject, SubjectRef,
};
use crate::error::ServiceError;
use crate::schedule::allocator::{AllocationOutcome, Allocator, AllocatorConfig};
use crate::schedule::candidates::find_candidates;
use crate::schedule::conflicts::{Conflict, detect_conflicts};
use crate::schedule::window::{MAX_ALLOCATION_DAYS, Window};
use crate::store::AllocationStore;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// A request to book one subject for one test.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AllocationRequest {
    pub subject: SubjectRef,
    pub start: NaiveDate,
    /// Inclusive length in days.
    pub days: u32,
    pub test_type: String,
    /// Allow shifting the window forward when the requested one is full.
    pub backup: bool,
    /// Overrides the configured shift limit for this request.
    pub max_backup_days: Option<u32>,
}

/// One allocation with its resource's display name.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ScheduledTest {
    #[serde(flatten)]
    pub allocation: Allocation,
    pub resource_name: String,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct SubjectSchedule {
    pub subject: Subject,
    pub allocations: Vec<ScheduledTest>,
}

pub struct AllocationService {
    store: Arc<dyn AllocationStore>,
    allocator: Allocator,
    read_retry: RetryConfig,
}

impl AllocationService {
    pub fn new(store: Arc<dyn AllocationStore>, config: AllocatorConfig) -> Self {
        let read_retry = config.retry.clone();
        Self {
            allocator: Allocator::new(Arc::clone(&store), config),
            store,
            read_retry,
        }
    }

    pub fn store(&self) -> &Arc<dyn AllocationStore> {
        &self.store
    }

    pub async fn resolve_subject(&self, subject: &SubjectRef) -> Result<Subject, ServiceError> {
        retry_async(&self.read_retry, "subject lookup", || self.store.subject(subject))
            .await?
            .ok_or_else(|| ServiceError::NotFound(subject.to_string()))
    }

    pub async fn find_available(
        &self,
        subject: &SubjectRef,
        window: Window,
        test_type: &str,
    ) -> Result<Vec<Resource>, ServiceError> {
        let test_type = require_test_type(test_type)?;
        let subject = self.resolve_subject(subject).await?;
        let found = retry_async(&self.read_retry, "candidate search", || {
            find_candidates(self.store.as_ref(), &subject, test_type, window)
        })
        .await?;
        Ok(found)
    }

    pub async fn auto_allocate(
        &self,
        request: &AllocationRequest,
    ) -> Result<AllocationOutcome, ServiceError> {
        let window = Window::from_duration(request.start, request.days)?;
        window.ensure_bookable()?;
        let test_type = require_test_type(&request.test_type)?;
        let allocator = match request.max_backup_days {
            Some(days) if days > MAX_ALLOCATION_DAYS => {
                return Err(ServiceError::Validation(format!(
                    "max_backup_days {days} exceeds {MAX_ALLOCATION_DAYS}"
                )));
            }
            Some(days) => self.allocator.clone().with_max_backup_days(days),
            None => self.allocator.clone(),
        };

        let subject = self.resolve_subject(&request.subject).await?;
        info!(
            "Allocation request: subject {} test {test_type} window {window} backup={}",
            subject.code, request.backup
        );
        let outcome = allocator
            .try_allocate(&subject, window, test_type, request.backup)
            .await?;
        Ok(outcome)
    }

    pub async fn subject_allocations(
        &self,
        subject: &SubjectRef,
    ) -> Result<SubjectSchedule, ServiceError> {
        let subject = self.resolve_subject(subject).await?;
        let allocations = retry_async(&self.read_retry, "subject allocations", || {
            self.store.allocations_for_subject(subject.id)
        })
        .await?;
        let names = self.resource_names().await?;
        let allocations = allocations
            .into_iter()
            .map(|allocation| ScheduledTest {
                resource_name: names
                    .get(&allocation.resource_id)
                    .cloned()
                    .unwrap_or_else(|| format!("resource #{}", allocation.resource_id)),
                allocation,
            })
            .collect();
        Ok(SubjectSchedule {
            subject,
            allocations,
        })
    }

    pub async fn detect_conflicts(&self) -> Result<Vec<Conflict>, ServiceError> {
        let active = retry_async(&self.read_retry, "active allocations", || {
            self.store.active_allocations()
        })
        .await?;
        let conflicts = detect_conflicts(&active);
        if !conflicts.is_empty() {
            warn!("{} double-booking conflict(s) detected", conflicts.len());
        }
        Ok(conflicts)
    }

    pub async fn completed_tests_count(&self) -> Result<i64, ServiceError> {
        let n = retry_async(&self.read_retry, "completed count", || {
            self.store.count_by_status(AllocationStatus::Completed)
        })
        .await?;
        Ok(n)
    }

    pub async fn allocations_by_status(
        &self,
        status: AllocationStatus,
    ) -> Result<Vec<ScheduledTest>, ServiceError> {
        let rows = retry_async(&self.read_retry, "allocations by status", || {
            self.store.allocations_by_status(status)
        })
        .await?;
        let names = self.resource_names().await?;
        Ok(rows
            .into_iter()
            .map(|allocation| ScheduledTest {
                resource_name: names
                    .get(&allocation.resource_id)
                    .cloned()
                    .unwrap_or_default(),
                allocation,
            })
            .collect())
    }

    /// Enabled resources that are outside their availability window on `today`.
    pub async fn maintenance_check(&self, today: NaiveDate) -> Result<Vec<Resource>, ServiceError> {
        let all = retry_async(&self.read_retry, "resource list", || self.store.resources()).await?;
        Ok(all
            .into_iter()
            .filter(|r| r.needs_maintenance_on(today))
            .collect())
    }

    pub async fn cancel_allocation(&self, id: AllocationId) -> Result<Allocation, ServiceError> {
        let outcome = retry_async(&self.read_retry, "cancel allocation", || {
            self.store.cancel_allocation(id)
        })
        .await?;
        match outcome {
            CancelOutcome::Cancelled(allocation) => {
                info!("Cancelled allocation {id}");
                Ok(allocation)
            }
            CancelOutcome::NotFound => Err(ServiceError::NotFound(format!("allocation {id}"))),
            CancelOutcome::NotCancellable(allocation) => Err(ServiceError::Validation(format!(
                "allocation {id} is {} and cannot be cancelled",
                allocation.status
            ))),
        }
    }

    async fn resource_names(&self) -> Result<HashMap<i64, String>, ServiceError> {
        let resources =
            retry_async(&self.read_retry, "resource list", || self.store.resources()).await?;
        Ok(resources.into_iter().map(|r| (r.id, r.name)).collect())
    }
}

fn require_test_type(test_type: &str) -> Result<&str, ServiceError> {
    let trimmed = test_type.trim();
    if trimmed.is_empty() {
        Err(ServiceError::Validation("test_type must not be empty".into()))
    } else {
        Ok(trimmed)
    }
}
