//! Relational store seam.
//!
//! [`AllocationStore`] covers the lock-free reads and administrative writes;
//! [`StoreTx`] is one allocation transaction holding row locks until it is
//! committed or rolled back. Both traits return boxed futures so the
//! allocator can hold them as trait objects.
//!
//! Implementations:
//! - [`PgStore`]: Postgres via `sqlx`, `SELECT ... FOR UPDATE` row locks.
//! - [`MemoryStore`]: in-process tables with per-resource async locks that
//!   behave like row locks, plus fault injection for tests.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::domain::{
    Allocation, AllocationId, AllocationStatus, CancelOutcome, NewAllocation, Resource,
    ResourceId, Subject, SubjectId, SubjectRef,
};
use crate::error::StoreError;
use crate::schedule::compat::CompatibilityClass;
use crate::schedule::window::Window;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by store methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Input to the candidate search.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateQuery {
    pub class: CompatibilityClass,
    pub window: Window,
}

pub trait AllocationStore: Send + Sync {
    /// Enabled, compatible, available resources with no active allocation
    /// overlapping `query.window`, ordered by name then id. Takes no locks.
    fn find_candidates<'a>(&'a self, query: &'a CandidateQuery) -> StoreFuture<'a, Vec<Resource>>;

    /// Open a transaction for one allocation attempt.
    fn begin(&self) -> StoreFuture<'_, Box<dyn StoreTx>>;

    fn subject<'a>(&'a self, lookup: &'a SubjectRef) -> StoreFuture<'a, Option<Subject>>;

    /// All resources, ordered by name.
    fn resources(&self) -> StoreFuture<'_, Vec<Resource>>;

    /// Allocations whose status is not `cancelled`.
    fn active_allocations(&self) -> StoreFuture<'_, Vec<Allocation>>;

    fn allocations_by_status(&self, status: AllocationStatus) -> StoreFuture<'_, Vec<Allocation>>;

    fn allocations_for_subject(&self, subject_id: SubjectId) -> StoreFuture<'_, Vec<Allocation>>;

    fn count_by_status(&self, status: AllocationStatus) -> StoreFuture<'_, i64>;

    /// Flip a `scheduled` allocation to `cancelled` under a row lock.
    fn cancel_allocation(&self, id: AllocationId) -> StoreFuture<'_, CancelOutcome>;

    /// Tables and columns, for the agent's system prompt.
    fn describe_schema(&self) -> StoreFuture<'_, SchemaDescription>;
}

/// One allocation transaction. Dropping it without committing rolls back.
pub trait StoreTx: Send {
    /// Lock the resource row for the rest of the transaction. `None` if the
    /// row no longer exists.
    fn lock_resource(&mut self, id: ResourceId) -> StoreFuture<'_, Option<Resource>>;

    /// Whether any active allocation on `id` overlaps `window`, including
    /// rows inserted earlier in this transaction.
    fn has_active_overlap(&mut self, id: ResourceId, window: Window) -> StoreFuture<'_, bool>;

    fn insert_allocation<'a>(&'a mut self, new: &'a NewAllocation) -> StoreFuture<'a, Allocation>;

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()>;

    fn rollback(self: Box<Self>) -> StoreFuture<'static, ()>;
}

// ── Schema description ─────────────────────────────────────────────

#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ColumnDescription {
    pub name: String,
    pub data_type: String,
}

#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct TableDescription {
    pub name: String,
    pub columns: Vec<ColumnDescription>,
}

#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct SchemaDescription {
    pub tables: Vec<TableDescription>,
}

impl SchemaDescription {
    /// Compact `table(col type, ...)` lines for prompts.
    pub fn render(&self) -> String {
        self.tables
            .iter()
            .map(|t| {
                let cols: Vec<String> = t
                    .columns
                    .iter()
                    .map(|c| format!("{} {}", c.name, c.data_type))
                    .collect();
                format!("{}({})", t.name, cols.join(", "))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_renders_one_line_per_table() {
        let schema = SchemaDescription {
            tables: vec![TableDescription {
                name: "resources".into(),
                columns: vec![
                    ColumnDescription {
                        name: "id".into(),
                        data_type: "bigint".into(),
                    },
                    ColumnDescription {
                        name: "name".into(),
                        data_type: "text".into(),
                    },
                ],
            }],
        };
        assert_eq!(schema.render(), "resources(id bigint, name text)");
    }
}
