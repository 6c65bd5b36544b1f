//! Check-lock-check-act allocation.
//!
//! For each candidate, in its own transaction:
//!
//! 1. `lock_resource` takes the row lock (first locker wins).
//! 2. Enabled, compatibility, availability and active overlap are re-checked
//!    under the lock, because the candidate list was read without one.
//! 3. Clean: insert and commit. Otherwise: roll back and try the next one.
//!
//! A candidate whose transaction keeps failing after its retries is rolled
//! back and skipped; nothing it wrote survives. If the requested window is
//! exhausted and backups are allowed, the same search runs on the window
//! shifted forward by 1..=`max_backup_days` days.

use crate::api::retry::{RetryConfig, retry_async};
use crate::domain::{Allocation, NewAllocation, Resource, Subject};
use crate::error::StoreError;
use crate::schedule::compat::CompatibilityClass;
use crate::schedule::window::Window;
use crate::store::{AllocationStore, CandidateQuery, StoreTx};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default number of one-day shifts tried when backups are allowed.
pub const DEFAULT_MAX_BACKUP_DAYS: u32 = 7;

#[derive(Debug, Clone, PartialEq)]
pub struct AllocatorConfig {
    /// Applied to the candidate search and to each candidate transaction.
    pub retry: RetryConfig,
    pub max_backup_days: u32,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            max_backup_days: DEFAULT_MAX_BACKUP_DAYS,
        }
    }
}

impl AllocatorConfig {
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_backup_days(mut self, days: u32) -> Self {
        self.max_backup_days = days;
        self
    }
}

/// A committed booking.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct Booking {
    pub allocation: Allocation,
    pub resource: Resource,
    pub window: Window,
    pub used_backup: bool,
    /// Days the window was moved forward; 0 for the requested window.
    pub shift_days: u32,
}

impl Booking {
    pub fn message(&self) -> String {
        if self.used_backup {
            format!(
                "Allocated with backup shift of {} day(s).",
                self.shift_days
            )
        } else {
            "Allocated in requested window.".to_string()
        }
    }
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AllocationOutcome {
    Allocated(Booking),
    /// Every candidate in every permitted window was taken or unsuitable.
    NoCandidate,
}

impl AllocationOutcome {
    pub fn booking(&self) -> Option<&Booking> {
        match self {
            AllocationOutcome::Allocated(b) => Some(b),
            AllocationOutcome::NoCandidate => None,
        }
    }
}

/// Why a candidate was passed over after taking its lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    Vanished,
    Disabled,
    Incompatible,
    Unavailable,
    Conflict,
}

enum Attempt {
    Committed(Allocation, Resource),
    Rejected(Rejection),
}

/// Allocation transaction manager. Cheap to clone.
#[derive(Clone)]
pub struct Allocator {
    store: Arc<dyn AllocationStore>,
    config: AllocatorConfig,
}

impl Allocator {
    pub fn new(store: Arc<dyn AllocationStore>, config: AllocatorConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    pub fn with_max_backup_days(mut self, days: u32) -> Self {
        self.config.max_backup_days = days;
        self
    }

    /// Book a compatible resource for `subject` in `window`, or in a backup
    /// window if `allow_backup`. Exhaustion is [`AllocationOutcome::NoCandidate`];
    /// errors are reserved for failures reading the candidate list.
    pub async fn try_allocate(
        &self,
        subject: &Subject,
        window: Window,
        test_type: &str,
        allow_backup: bool,
    ) -> Result<AllocationOutcome, StoreError> {
        let class = CompatibilityClass::derive(subject, test_type);
        let max_shift = if allow_backup {
            self.config.max_backup_days
        } else {
            0
        };

        for shift in 0..=max_shift {
            let Ok(probe) = window.shifted(shift) else {
                break;
            };
            if let Some(booking) = self.allocate_in_window(subject, &class, probe, shift).await? {
                return Ok(AllocationOutcome::Allocated(booking));
            }
            if shift == 0 && allow_backup {
                debug!("Nothing free for subject {} in {window}; trying backup windows", subject.code);
            }
        }

        info!(
            "No available resource for subject {} ({}) in {window} (backup: {allow_backup})",
            subject.code, class.test_type
        );
        Ok(AllocationOutcome::NoCandidate)
    }

    async fn allocate_in_window(
        &self,
        subject: &Subject,
        class: &CompatibilityClass,
        window: Window,
        shift: u32,
    ) -> Result<Option<Booking>, StoreError> {
        let query = CandidateQuery {
            class: class.clone(),
            window,
        };
        let candidates = retry_async(&self.config.retry, "candidate search", || {
            self.store.find_candidates(&query)
        })
        .await?;

        for candidate in candidates {
            let new = NewAllocation {
                resource_id: candidate.id,
                subject_id: subject.id,
                test_type: class.test_type.clone(),
                window,
            };
            let result = retry_async(&self.config.retry, "allocation attempt", || {
                self.attempt(&new, class)
            })
            .await;

            match result {
                Ok(Attempt::Committed(allocation, resource)) => {
                    info!(
                        "Allocated {} to subject {} in {window} (allocation {}, shift {shift})",
                        resource.name, subject.code, allocation.id
                    );
                    return Ok(Some(Booking {
                        allocation,
                        resource,
                        window,
                        used_backup: shift > 0,
                        shift_days: shift,
                    }));
                }
                Ok(Attempt::Rejected(reason)) => {
                    debug!(
                        "Candidate {} ({}) rejected under lock: {reason:?}",
                        candidate.id, candidate.name
                    );
                }
                Err(e) => {
                    warn!(
                        "Allocation attempt on {} ({}) failed: {e}; trying next candidate",
                        candidate.id, candidate.name
                    );
                }
            }
        }
        Ok(None)
    }

    /// One transaction against one candidate.
    async fn attempt(
        &self,
        new: &NewAllocation,
        class: &CompatibilityClass,
    ) -> Result<Attempt, StoreError> {
        let mut tx = self.store.begin().await?;
        match check_and_insert(tx.as_mut(), new, class).await {
            Ok(Attempt::Rejected(reason)) => {
                tx.rollback().await?;
                Ok(Attempt::Rejected(reason))
            }
            Ok(committed) => {
                tx.commit().await?;
                Ok(committed)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    debug!("Rollback after failed attempt also failed: {rollback_err}");
                }
                Err(e)
            }
        }
    }
}

async fn check_and_insert(
    tx: &mut dyn StoreTx,
    new: &NewAllocation,
    class: &CompatibilityClass,
) -> Result<Attempt, StoreError> {
    let Some(resource) = tx.lock_resource(new.resource_id).await? else {
        return Ok(Attempt::Rejected(Rejection::Vanished));
    };
    if !resource.enabled {
        return Ok(Attempt::Rejected(Rejection::Disabled));
    }
    if !class.is_admitted_by(&resource.capabilities) {
        return Ok(Attempt::Rejected(Rejection::Incompatible));
    }
    if !resource.is_available_for(&new.window) {
        return Ok(Attempt::Rejected(Rejection::Unavailable));
    }
    if tx.has_active_overlap(resource.id, new.window).await? {
        return Ok(Attempt::Rejected(Rejection::Conflict));
    }
    let allocation = tx.insert_allocation(new).await?;
    Ok(Attempt::Committed(allocation, resource))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AllocationStatus, Capabilities};
    use crate::store::MemoryStore;
    use chrono::NaiveDate;
    use std::time::Duration;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn rig(id: i64, name: &str) -> Resource {
        Resource {
            id,
            name: name.into(),
            capabilities: Capabilities {
                weight_classes: vec!["<10K".into()],
                drive_types: vec!["AWD".into()],
                test_types: vec!["brake".into()],
            },
            enabled: true,
            available_from: None,
            available_to: None,
        }
    }

    fn subject() -> Subject {
        Subject {
            id: 1,
            code: "V1".into(),
            weight_lbs: 4_800,
            drive_type: "AWD".into(),
        }
    }

    fn fast_config() -> AllocatorConfig {
        AllocatorConfig::default().with_retry(
            RetryConfig::default().with_delays(Duration::from_millis(1), Duration::from_millis(2)),
        )
    }

    fn allocator(store: &MemoryStore) -> Allocator {
        Allocator::new(Arc::new(store.clone()), fast_config())
    }

    fn book(store: &MemoryStore, resource_id: i64, window: Window) {
        store.add_allocation(
            NewAllocation {
                resource_id,
                subject_id: 99,
                test_type: "brake".into(),
                window,
            },
            AllocationStatus::Scheduled,
        );
    }

    #[tokio::test]
    async fn picks_first_candidate_by_name() {
        let store = MemoryStore::new();
        store.add_resource(rig(2, "Rig-B"));
        store.add_resource(rig(1, "Rig-A"));
        let window = Window::new(d("2024-01-15"), d("2024-01-15")).unwrap();

        let outcome = allocator(&store)
            .try_allocate(&subject(), window, "brake", false)
            .await
            .unwrap();
        let booking = outcome.booking().unwrap();
        assert_eq!(booking.resource.name, "Rig-A");
        assert!(!booking.used_backup);
        assert_eq!(booking.message(), "Allocated in requested window.");
    }

    #[tokio::test]
    async fn falls_back_to_next_free_backup_window() {
        let store = MemoryStore::new();
        store.add_resource(rig(1, "Rig-1"));
        book(&store, 1, Window::new(d("2024-01-15"), d("2024-01-17")).unwrap());
        let window = Window::new(d("2024-01-15"), d("2024-01-16")).unwrap();

        let outcome = allocator(&store)
            .try_allocate(&subject(), window, "brake", true)
            .await
            .unwrap();
        let booking = outcome.booking().unwrap();
        assert!(booking.used_backup);
        assert_eq!(booking.shift_days, 3);
        assert_eq!(booking.window, Window::new(d("2024-01-18"), d("2024-01-19")).unwrap());
        assert_eq!(booking.message(), "Allocated with backup shift of 3 day(s).");
    }

    #[tokio::test]
    async fn backup_search_is_bounded() {
        let store = MemoryStore::new();
        store.add_resource(rig(1, "Rig-1"));
        book(&store, 1, Window::new(d("2024-01-15"), d("2024-01-30")).unwrap());
        let window = Window::new(d("2024-01-15"), d("2024-01-15")).unwrap();

        let outcome = allocator(&store)
            .with_max_backup_days(3)
            .try_allocate(&subject(), window, "brake", true)
            .await
            .unwrap();
        assert_eq!(outcome, AllocationOutcome::NoCandidate);
    }

    #[tokio::test]
    async fn transient_begin_failures_are_retried() {
        let store = MemoryStore::new();
        store.add_resource(rig(1, "Rig-1"));
        store.fail_next_begins(2);
        let window = Window::new(d("2024-02-01"), d("2024-02-02")).unwrap();

        let outcome = allocator(&store)
            .try_allocate(&subject(), window, "brake", false)
            .await
            .unwrap();
        assert!(outcome.booking().is_some());
        assert_eq!(store.begin_calls(), 3);
    }

    #[tokio::test]
    async fn persistent_failure_moves_to_next_candidate() {
        let store = MemoryStore::new();
        store.add_resource(rig(1, "Rig-A"));
        store.add_resource(rig(2, "Rig-B"));
        // Exhausts the three attempts spent on Rig-A.
        store.fail_next_begins(3);
        let window = Window::new(d("2024-02-01"), d("2024-02-01")).unwrap();

        let outcome = allocator(&store)
            .try_allocate(&subject(), window, "brake", false)
            .await
            .unwrap();
        assert_eq!(outcome.booking().unwrap().resource.name, "Rig-B");
        assert_eq!(store.allocations().len(), 1);
    }

    #[tokio::test]
    async fn candidate_search_failure_surfaces_as_error() {
        let store = MemoryStore::new();
        store.add_resource(rig(1, "Rig-1"));
        store.fail_next_candidate_searches(10);
        let window = Window::new(d("2024-02-01"), d("2024-02-01")).unwrap();

        let err = allocator(&store)
            .try_allocate(&subject(), window, "brake", false)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Transient(_)));
    }
}
