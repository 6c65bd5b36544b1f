//! In-process [`AllocationStore`] with row-lock semantics.
//!
//! Each resource row has its own `tokio::sync::Mutex`; a [`StoreTx`] holds the
//! owned guard from `lock_resource` until commit or rollback, exactly like a
//! Postgres `FOR UPDATE` lock held to end of transaction. Inserts are buffered
//! in the transaction and only become visible on commit.
//!
//! Fault injection (`fail_next_*`) makes the next N calls of an operation
//! fail with [`StoreError::Transient`].

use super::{
    AllocationStore, CandidateQuery, ColumnDescription, SchemaDescription, StoreFuture, StoreTx,
    TableDescription,
};
use crate::domain::{
    Allocation, AllocationId, AllocationStatus, CancelOutcome, NewAllocation, Resource,
    ResourceId, Subject, SubjectId, SubjectRef,
};
use crate::error::StoreError;
use crate::schedule::window::Window;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::trace;

/// Default time a transaction waits for a row lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Tables {
    resources: BTreeMap<ResourceId, Resource>,
    subjects: BTreeMap<SubjectId, Subject>,
    allocations: BTreeMap<AllocationId, Allocation>,
}

#[derive(Default)]
struct FaultCounter {
    remaining: AtomicU32,
    calls: AtomicU32,
}

impl FaultCounter {
    fn trip(&self, op: &str) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let tripped = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(StoreError::Transient(format!("injected {op} failure")))
        } else {
            Ok(())
        }
    }
}

#[derive(Default)]
struct Faults {
    begin: FaultCounter,
    candidates: FaultCounter,
    schema: FaultCounter,
}

struct Inner {
    tables: Mutex<Tables>,
    row_locks: Mutex<HashMap<ResourceId, Arc<tokio::sync::Mutex<()>>>>,
    next_allocation_id: AtomicI64,
    faults: Faults,
    lock_timeout: Duration,
    lock_latency: Duration,
}

impl Inner {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_lock(&self, id: ResourceId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(id).or_default())
    }

    fn active_overlap(&self, id: ResourceId, window: &Window) -> bool {
        self.tables()
            .allocations
            .values()
            .any(|a| a.resource_id == id && a.is_active() && a.window.overlaps(window))
    }
}

/// Cheap to clone; clones share the same tables.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_timing(DEFAULT_LOCK_TIMEOUT, Duration::ZERO)
    }

    /// `lock_latency` is slept while holding each row lock, widening race
    /// windows in concurrency tests.
    pub fn with_timing(lock_timeout: Duration, lock_latency: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: Mutex::new(Tables::default()),
                row_locks: Mutex::new(HashMap::new()),
                next_allocation_id: AtomicI64::new(1),
                faults: Faults::default(),
                lock_timeout,
                lock_latency,
            }),
        }
    }

    pub fn add_resource(&self, resource: Resource) {
        self.inner.tables().resources.insert(resource.id, resource);
    }

    pub fn add_subject(&self, subject: Subject) {
        self.inner.tables().subjects.insert(subject.id, subject);
    }

    /// Insert an allocation row directly, bypassing locks and checks.
    pub fn add_allocation(&self, new: NewAllocation, status: AllocationStatus) -> Allocation {
        let allocation = Allocation {
            id: self.inner.next_allocation_id.fetch_add(1, Ordering::SeqCst),
            resource_id: new.resource_id,
            subject_id: new.subject_id,
            test_type: new.test_type,
            window: new.window,
            status,
            created_at: Utc::now(),
        };
        self.inner
            .tables()
            .allocations
            .insert(allocation.id, allocation.clone());
        allocation
    }

    pub fn set_resource_enabled(&self, id: ResourceId, enabled: bool) {
        if let Some(r) = self.inner.tables().resources.get_mut(&id) {
            r.enabled = enabled;
        }
    }

    /// Every allocation row, in id order.
    pub fn allocations(&self) -> Vec<Allocation> {
        self.inner.tables().allocations.values().cloned().collect()
    }

    pub fn fail_next_begins(&self, n: u32) {
        self.inner.faults.begin.remaining.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_candidate_searches(&self, n: u32) {
        self.inner
            .faults
            .candidates
            .remaining
            .store(n, Ordering::SeqCst);
    }

    pub fn fail_next_schema_reads(&self, n: u32) {
        self.inner.faults.schema.remaining.store(n, Ordering::SeqCst);
    }

    pub fn begin_calls(&self) -> u32 {
        self.inner.faults.begin.calls.load(Ordering::SeqCst)
    }

    pub fn schema_reads(&self) -> u32 {
        self.inner.faults.schema.calls.load(Ordering::SeqCst)
    }

    fn select_allocations(&self, keep: impl Fn(&Allocation) -> bool) -> Vec<Allocation> {
        self.inner
            .tables()
            .allocations
            .values()
            .filter(|a| keep(a))
            .cloned()
            .collect()
    }
}

impl AllocationStore for MemoryStore {
    fn find_candidates<'a>(&'a self, query: &'a CandidateQuery) -> StoreFuture<'a, Vec<Resource>> {
        Box::pin(async move {
            self.inner.faults.candidates.trip("candidate search")?;
            let tables = self.inner.tables();
            let mut found: Vec<Resource> = tables
                .resources
                .values()
                .filter(|r| r.can_host(&query.class, &query.window))
                .filter(|r| {
                    !tables.allocations.values().any(|a| {
                        a.resource_id == r.id && a.is_active() && a.window.overlaps(&query.window)
                    })
                })
                .cloned()
                .collect();
            found.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
            Ok(found)
        })
    }

    fn begin(&self) -> StoreFuture<'_, Box<dyn StoreTx>> {
        Box::pin(async move {
            self.inner.faults.begin.trip("begin")?;
            let tx: Box<dyn StoreTx> = Box::new(MemoryTx {
                inner: Arc::clone(&self.inner),
                guards: HashMap::new(),
                pending: Vec::new(),
            });
            Ok(tx)
        })
    }

    fn subject<'a>(&'a self, lookup: &'a SubjectRef) -> StoreFuture<'a, Option<Subject>> {
        Box::pin(async move {
            let tables = self.inner.tables();
            let found = match lookup {
                SubjectRef::Id(id) => tables.subjects.get(id).cloned(),
                SubjectRef::Code(code) => tables.subjects.values().find(|s| &s.code == code).cloned(),
            };
            Ok(found)
        })
    }

    fn resources(&self) -> StoreFuture<'_, Vec<Resource>> {
        Box::pin(async move {
            let mut all: Vec<Resource> = self.inner.tables().resources.values().cloned().collect();
            all.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
            Ok(all)
        })
    }

    fn active_allocations(&self) -> StoreFuture<'_, Vec<Allocation>> {
        Box::pin(async move { Ok(self.select_allocations(Allocation::is_active)) })
    }

    fn allocations_by_status(&self, status: AllocationStatus) -> StoreFuture<'_, Vec<Allocation>> {
        Box::pin(async move { Ok(self.select_allocations(|a| a.status == status)) })
    }

    fn allocations_for_subject(&self, subject_id: SubjectId) -> StoreFuture<'_, Vec<Allocation>> {
        Box::pin(async move { Ok(self.select_allocations(|a| a.subject_id == subject_id)) })
    }

    fn count_by_status(&self, status: AllocationStatus) -> StoreFuture<'_, i64> {
        Box::pin(async move {
            let n = self.select_allocations(|a| a.status == status).len();
            Ok(i64::try_from(n).unwrap_or(i64::MAX))
        })
    }

    fn cancel_allocation(&self, id: AllocationId) -> StoreFuture<'_, CancelOutcome> {
        Box::pin(async move {
            let mut tables = self.inner.tables();
            let Some(allocation) = tables.allocations.get_mut(&id) else {
                return Ok(CancelOutcome::NotFound);
            };
            if allocation.status != AllocationStatus::Scheduled {
                return Ok(CancelOutcome::NotCancellable(allocation.clone()));
            }
            allocation.status = AllocationStatus::Cancelled;
            Ok(CancelOutcome::Cancelled(allocation.clone()))
        })
    }

    fn describe_schema(&self) -> StoreFuture<'_, SchemaDescription> {
        Box::pin(async move {
            self.inner.faults.schema.trip("schema read")?;
            Ok(memory_schema())
        })
    }
}

fn memory_schema() -> SchemaDescription {
    let table = |name: &str, cols: &[(&str, &str)]| TableDescription {
        name: name.to_string(),
        columns: cols
            .iter()
            .map(|(n, t)| ColumnDescription {
                name: (*n).to_string(),
                data_type: (*t).to_string(),
            })
            .collect(),
    };
    SchemaDescription {
        tables: vec![
            table(
                "allocations",
                &[
                    ("id", "bigint"),
                    ("resource_id", "bigint"),
                    ("subject_id", "bigint"),
                    ("test_type", "text"),
                    ("start_date", "date"),
                    ("end_date", "date"),
                    ("status", "text"),
                    ("created_at", "timestamp with time zone"),
                ],
            ),
            table(
                "resources",
                &[
                    ("id", "bigint"),
                    ("name", "text"),
                    ("weight_classes", "ARRAY"),
                    ("drive_types", "ARRAY"),
                    ("test_types", "ARRAY"),
                    ("enabled", "boolean"),
                    ("available_from", "date"),
                    ("available_to", "date"),
                ],
            ),
            table(
                "subjects",
                &[
                    ("id", "bigint"),
                    ("code", "text"),
                    ("weight_lbs", "integer"),
                    ("drive_type", "text"),
                ],
            ),
        ],
    }
}

struct MemoryTx {
    inner: Arc<Inner>,
    guards: HashMap<ResourceId, OwnedMutexGuard<()>>,
    pending: Vec<Allocation>,
}

impl StoreTx for MemoryTx {
    fn lock_resource(&mut self, id: ResourceId) -> StoreFuture<'_, Option<Resource>> {
        Box::pin(async move {
            if !self.guards.contains_key(&id) {
                let lock = self.inner.row_lock(id);
                let guard = tokio::time::timeout(self.inner.lock_timeout, lock.lock_owned())
                    .await
                    .map_err(|_| {
                        StoreError::Transient(format!(
                            "lock wait on resource {id} exceeded {:?}",
                            self.inner.lock_timeout
                        ))
                    })?;
                trace!("memory store: locked resource {id}");
                self.guards.insert(id, guard);
                if !self.inner.lock_latency.is_zero() {
                    tokio::time::sleep(self.inner.lock_latency).await;
                }
            }
            Ok(self.inner.tables().resources.get(&id).cloned())
        })
    }

    fn has_active_overlap(&mut self, id: ResourceId, window: Window) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let in_tx = self
                .pending
                .iter()
                .any(|a| a.resource_id == id && a.window.overlaps(&window));
            Ok(in_tx || self.inner.active_overlap(id, &window))
        })
    }

    fn insert_allocation<'a>(&'a mut self, new: &'a NewAllocation) -> StoreFuture<'a, Allocation> {
        Box::pin(async move {
            let allocation = Allocation {
                id: self.inner.next_allocation_id.fetch_add(1, Ordering::SeqCst),
                resource_id: new.resource_id,
                subject_id: new.subject_id,
                test_type: new.test_type.clone(),
                window: new.window,
                status: AllocationStatus::Scheduled,
                created_at: Utc::now(),
            };
            self.pending.push(allocation.clone());
            Ok(allocation)
        })
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move {
            let MemoryTx {
                inner,
                guards,
                pending,
            } = *self;
            {
                let mut tables = inner.tables();
                for allocation in pending {
                    tables.allocations.insert(allocation.id, allocation);
                }
            }
            // Row locks are released only after the rows are visible.
            drop(guards);
            Ok(())
        })
    }

    fn rollback(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move {
            drop(self);
            Ok(())
        })
    }
}
