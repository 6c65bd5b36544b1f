//! Postgres [`AllocationStore`] over `sqlx`.
//!
//! Compatibility is `TEXT[] @> ARRAY[tag]` containment, active-overlap
//! exclusion is a `NOT EXISTS` anti-join served by the
//! `(resource_id, status)` index, and each allocation attempt runs in its own
//! transaction that takes `SELECT ... FOR UPDATE` on the resource row with a
//! bounded `lock_timeout`.

use super::{
    AllocationStore, CandidateQuery, ColumnDescription, SchemaDescription, StoreFuture, StoreTx,
    TableDescription,
};
use crate::domain::{
    Allocation, AllocationId, AllocationStatus, CancelOutcome, Capabilities, NewAllocation,
    Resource, ResourceId, Subject, SubjectId, SubjectRef,
};
use crate::error::StoreError;
use crate::schedule::window::{Window, overlap_sql};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{debug, info};

/// DDL applied by [`PgStore::migrate`].
pub const SCHEMA_SQL: &str = include_str!("schema.sql");

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLSTATEs worth retrying: lock timeout, serialization failure, deadlock,
/// statement cancel, shutdown, connection trouble.
const TRANSIENT_SQLSTATES: &[&str] = &[
    "55P03", "40001", "40P01", "57014", "57P01", "53300", "08000", "08003", "08006",
];

const RESOURCE_COLUMNS: &str = "r.id, r.name, r.weight_classes, r.drive_types, r.test_types, \
     r.enabled, r.available_from, r.available_to";

const ALLOCATION_COLUMNS: &str =
    "a.id, a.resource_id, a.subject_id, a.test_type, a.start_date, a.end_date, a.status, a.created_at";

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        let message = e.to_string();
        match &e {
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some(code) if TRANSIENT_SQLSTATES.contains(&code) => StoreError::Transient(message),
                Some(code)
                    if code.starts_with("22") || code.starts_with("23") || code.starts_with("42") =>
                {
                    StoreError::Permanent(message)
                }
                _ => StoreError::Unrecognized(message),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => StoreError::Transient(message),
            sqlx::Error::Configuration(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::RowNotFound
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::TypeNotFound { .. } => StoreError::Permanent(message),
            _ => StoreError::Unrecognized(message),
        }
    }
}

// ── Rows ───────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct ResourceRow {
    id: i64,
    name: String,
    weight_classes: Vec<String>,
    drive_types: Vec<String>,
    test_types: Vec<String>,
    enabled: bool,
    available_from: Option<NaiveDate>,
    available_to: Option<NaiveDate>,
}

impl From<ResourceRow> for Resource {
    fn from(row: ResourceRow) -> Self {
        Resource {
            id: row.id,
            name: row.name,
            capabilities: Capabilities {
                weight_classes: row.weight_classes,
                drive_types: row.drive_types,
                test_types: row.test_types,
            },
            enabled: row.enabled,
            available_from: row.available_from,
            available_to: row.available_to,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SubjectRow {
    id: i64,
    code: String,
    weight_lbs: i32,
    drive_type: String,
}

impl From<SubjectRow> for Subject {
    fn from(row: SubjectRow) -> Self {
        Subject {
            id: row.id,
            code: row.code,
            weight_lbs: row.weight_lbs,
            drive_type: row.drive_type,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AllocationRow {
    id: i64,
    resource_id: i64,
    subject_id: i64,
    test_type: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<AllocationRow> for Allocation {
    type Error = StoreError;

    fn try_from(row: AllocationRow) -> Result<Self, Self::Error> {
        let window = Window::new(row.start_date, row.end_date)
            .map_err(|e| StoreError::Permanent(format!("allocation {}: {e}", row.id)))?;
        let status = row
            .status
            .parse::<AllocationStatus>()
            .map_err(|e| StoreError::Permanent(format!("allocation {}: {e}", row.id)))?;
        Ok(Allocation {
            id: row.id,
            resource_id: row.resource_id,
            subject_id: row.subject_id,
            test_type: row.test_type,
            window,
            status,
            created_at: row.created_at,
        })
    }
}

fn into_allocations(rows: Vec<AllocationRow>) -> Result<Vec<Allocation>, StoreError> {
    rows.into_iter().map(Allocation::try_from).collect()
}

#[derive(sqlx::FromRow)]
struct ColumnRow {
    table_name: String,
    column_name: String,
    data_type: String,
}

fn candidates_sql() -> String {
    format!(
        r#"
        SELECT {RESOURCE_COLUMNS}
        FROM resources r
        WHERE r.enabled
          AND r.weight_classes @> ARRAY[$1]::text[]
          AND r.drive_types @> ARRAY[$2]::text[]
          AND r.test_types @> ARRAY[$3]::text[]
          AND (r.available_from IS NULL OR r.available_from <= $4)
          AND (r.available_to IS NULL OR r.available_to >= $5)
          AND NOT EXISTS (
              SELECT 1 FROM allocations a
              WHERE a.resource_id = r.id
                AND a.status <> 'cancelled'
                AND {overlap}
          )
        ORDER BY r.name, r.id
        "#,
        overlap = overlap_sql("a", 4, 5),
    )
}

// ── Store ──────────────────────────────────────────────────────────

/// Postgres-backed store. Clones share the pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        info!("Connected to Postgres (max_connections={max_connections})");
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// How long an allocation attempt waits for a resource row lock before
    /// failing with a retryable error.
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if they do not exist.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        info!("Schema migration applied");
        Ok(())
    }

    async fn fetch_allocations(&self, filter: AllocationFilter) -> Result<Vec<Allocation>, StoreError> {
        let clause = match filter {
            AllocationFilter::Active => "a.status <> 'cancelled'",
            AllocationFilter::Status(_) => "a.status = $1",
            AllocationFilter::Subject(_) => "a.subject_id = $1",
        };
        let sql = format!(
            "SELECT {ALLOCATION_COLUMNS} FROM allocations a WHERE {clause} \
             ORDER BY a.start_date, a.id"
        );
        let query = sqlx::query_as::<_, AllocationRow>(&sql);
        let query = match filter {
            AllocationFilter::Active => query,
            AllocationFilter::Status(status) => query.bind(status.as_str()),
            AllocationFilter::Subject(id) => query.bind(id),
        };
        into_allocations(query.fetch_all(&self.pool).await?)
    }
}

#[derive(Clone, Copy)]
enum AllocationFilter {
    Active,
    Status(AllocationStatus),
    Subject(SubjectId),
}

impl AllocationStore for PgStore {
    fn find_candidates<'a>(&'a self, query: &'a CandidateQuery) -> StoreFuture<'a, Vec<Resource>> {
        Box::pin(async move {
            let sql = candidates_sql();
            let rows = sqlx::query_as::<_, ResourceRow>(&sql)
                .bind(query.class.weight_class.as_tag())
                .bind(&query.class.drive_type)
                .bind(&query.class.test_type)
                .bind(query.window.start())
                .bind(query.window.end())
                .fetch_all(&self.pool)
                .await?;
            debug!(
                "Candidate search {:?} {} -> {} row(s)",
                query.class,
                query.window,
                rows.len()
            );
            Ok(rows.into_iter().map(Resource::from).collect())
        })
    }

    fn begin(&self) -> StoreFuture<'_, Box<dyn StoreTx>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await?;
            sqlx::query("SELECT set_config('lock_timeout', $1, true)")
                .bind(format!("{}ms", self.lock_timeout.as_millis()))
                .execute(&mut *tx)
                .await?;
            let tx: Box<dyn StoreTx> = Box::new(PgTx { tx });
            Ok(tx)
        })
    }

    fn subject<'a>(&'a self, lookup: &'a SubjectRef) -> StoreFuture<'a, Option<Subject>> {
        Box::pin(async move {
            const COLUMNS: &str = "SELECT id, code, weight_lbs, drive_type FROM subjects";
            let row = match lookup {
                SubjectRef::Id(id) => {
                    sqlx::query_as::<_, SubjectRow>(&format!("{COLUMNS} WHERE id = $1"))
                        .bind(id)
                        .fetch_optional(&self.pool)
                        .await?
                }
                SubjectRef::Code(code) => {
                    sqlx::query_as::<_, SubjectRow>(&format!("{COLUMNS} WHERE code = $1"))
                        .bind(code)
                        .fetch_optional(&self.pool)
                        .await?
                }
            };
            Ok(row.map(Subject::from))
        })
    }

    fn resources(&self) -> StoreFuture<'_, Vec<Resource>> {
        Box::pin(async move {
            let sql = format!("SELECT {RESOURCE_COLUMNS} FROM resources r ORDER BY r.name, r.id");
            let rows = sqlx::query_as::<_, ResourceRow>(&sql)
                .fetch_all(&self.pool)
                .await?;
            Ok(rows.into_iter().map(Resource::from).collect())
        })
    }

    fn active_allocations(&self) -> StoreFuture<'_, Vec<Allocation>> {
        Box::pin(self.fetch_allocations(AllocationFilter::Active))
    }

    fn allocations_by_status(&self, status: AllocationStatus) -> StoreFuture<'_, Vec<Allocation>> {
        Box::pin(self.fetch_allocations(AllocationFilter::Status(status)))
    }

    fn allocations_for_subject(&self, subject_id: SubjectId) -> StoreFuture<'_, Vec<Allocation>> {
        Box::pin(self.fetch_allocations(AllocationFilter::Subject(subject_id)))
    }

    fn count_by_status(&self, status: AllocationStatus) -> StoreFuture<'_, i64> {
        Box::pin(async move {
            let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM allocations WHERE status = $1")
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await?;
            Ok(n)
        })
    }

    fn cancel_allocation(&self, id: AllocationId) -> StoreFuture<'_, CancelOutcome> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await?;
            let sql = format!("SELECT {ALLOCATION_COLUMNS} FROM allocations a WHERE a.id = $1 FOR UPDATE");
            let Some(row) = sqlx::query_as::<_, AllocationRow>(&sql)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
            else {
                tx.rollback().await?;
                return Ok(CancelOutcome::NotFound);
            };
            let current = Allocation::try_from(row)?;
            if current.status != AllocationStatus::Scheduled {
                tx.rollback().await?;
                return Ok(CancelOutcome::NotCancellable(current));
            }

            let sql = format!(
                "UPDATE allocations a SET status = 'cancelled' WHERE a.id = $1 \
                 RETURNING {ALLOCATION_COLUMNS}"
            );
            let row = sqlx::query_as::<_, AllocationRow>(&sql)
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(CancelOutcome::Cancelled(Allocation::try_from(row)?))
        })
    }

    fn describe_schema(&self) -> StoreFuture<'_, SchemaDescription> {
        Box::pin(async move {
            let rows = sqlx::query_as::<_, ColumnRow>(
                r#"
                SELECT table_name::text AS table_name,
                       column_name::text AS column_name,
                       data_type::text AS data_type
                FROM information_schema.columns
                WHERE table_schema = 'public'
                ORDER BY table_name, ordinal_position
                "#,
            )
            .fetch_all(&self.pool)
            .await?;

            let mut tables: Vec<TableDescription> = Vec::new();
            for row in rows {
                let column = ColumnDescription {
                    name: row.column_name,
                    data_type: row.data_type,
                };
                match tables.last_mut() {
                    Some(t) if t.name == row.table_name => t.columns.push(column),
                    _ => tables.push(TableDescription {
                        name: row.table_name,
                        columns: vec![column],
                    }),
                }
            }
            Ok(SchemaDescription { tables })
        })
    }
}

// ── Transaction ────────────────────────────────────────────────────

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl StoreTx for PgTx {
    fn lock_resource(&mut self, id: ResourceId) -> StoreFuture<'_, Option<Resource>> {
        Box::pin(async move {
            let sql = format!("SELECT {RESOURCE_COLUMNS} FROM resources r WHERE r.id = $1 FOR UPDATE");
            let row = sqlx::query_as::<_, ResourceRow>(&sql)
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?;
            Ok(row.map(Resource::from))
        })
    }

    fn has_active_overlap(&mut self, id: ResourceId, window: Window) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let sql = format!(
                "SELECT EXISTS (SELECT 1 FROM allocations a WHERE a.resource_id = $1 \
                 AND a.status <> 'cancelled' AND {})",
                overlap_sql("a", 2, 3)
            );
            let clash = sqlx::query_scalar::<_, bool>(&sql)
                .bind(id)
                .bind(window.start())
                .bind(window.end())
                .fetch_one(&mut *self.tx)
                .await?;
            Ok(clash)
        })
    }

    fn insert_allocation<'a>(&'a mut self, new: &'a NewAllocation) -> StoreFuture<'a, Allocation> {
        Box::pin(async move {
            let sql = format!(
                "INSERT INTO allocations AS a (resource_id, subject_id, test_type, start_date, end_date, status) \
                 VALUES ($1, $2, $3, $4, $5, 'scheduled') RETURNING {ALLOCATION_COLUMNS}"
            );
            let row = sqlx::query_as::<_, AllocationRow>(&sql)
                .bind(new.resource_id)
                .bind(new.subject_id)
                .bind(&new.test_type)
                .bind(new.window.start())
                .bind(new.window.end())
                .fetch_one(&mut *self.tx)
                .await?;
            Allocation::try_from(row)
        })
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move {
            self.tx.commit().await?;
            Ok(())
        })
    }

    fn rollback(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move {
            self.tx.rollback().await?;
            Ok(())
        })
    }
}
