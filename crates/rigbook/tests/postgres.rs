//! Postgres store tests. They need a disposable database:
//!
//! ```sh
//! DATABASE_URL=postgres://localhost/rigbook_test cargo test --test postgres -- --ignored
//! ```
//!
//! Every run seeds its own rigs under a run-specific test type, so runs do
//! not see each other's rows.

mod common;

use chrono::Utc;
use common::{d, fast_allocator};
use rigbook::prelude::*;
use rigbook::schedule::Window;
use std::sync::Arc;

struct Seeded {
    store: Arc<PgStore>,
    test_type: String,
    subject_code: String,
}

async fn seeded(rigs: &[&str]) -> Seeded {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a test database");
    let store = PgStore::connect(&url, 20).await.unwrap();
    store.migrate().await.unwrap();

    let run = Utc::now().timestamp_micros();
    let test_type = format!("brake-{run}");
    let subject_code = format!("VIN-{run}");

    for name in rigs {
        sqlx::query(
            "INSERT INTO resources (name, weight_classes, drive_types, test_types) \
             VALUES ($1, ARRAY['<10K'], ARRAY['AWD'], ARRAY[$2])",
        )
        .bind(format!("{name}-{run}"))
        .bind(&test_type)
        .execute(store.pool())
        .await
        .unwrap();
    }
    sqlx::query("INSERT INTO subjects (code, weight_lbs, drive_type) VALUES ($1, 4800, 'AWD')")
        .bind(&subject_code)
        .execute(store.pool())
        .await
        .unwrap();

    Seeded {
        store: Arc::new(store),
        test_type,
        subject_code,
    }
}

fn request(seed: &Seeded, start: &str, days: u32) -> AllocationRequest {
    AllocationRequest {
        subject: SubjectRef::Code(seed.subject_code.clone()),
        start: d(start),
        days,
        test_type: seed.test_type.clone(),
        backup: false,
        max_backup_days: None,
    }
}

#[tokio::test]
#[ignore = "needs DATABASE_URL"]
async fn migrate_is_idempotent_and_schema_is_described() {
    let seed = seeded(&[]).await;
    seed.store.migrate().await.unwrap();

    let schema = seed.store.describe_schema().await.unwrap();
    let tables: Vec<_> = schema.tables.iter().map(|t| t.name.as_str()).collect();
    for table in ["allocations", "resources", "subjects"] {
        assert!(tables.contains(&table), "missing {table}: {tables:?}");
    }
}

#[tokio::test]
#[ignore = "needs DATABASE_URL"]
async fn books_and_lists_by_subject() {
    let seed = seeded(&["Rig-1"]).await;
    let service = AllocationService::new(seed.store.clone(), fast_allocator());

    let outcome = service
        .auto_allocate(&request(&seed, "2024-01-15", 2))
        .await
        .unwrap();
    let booking = outcome.booking().expect("should allocate");
    assert_eq!(
        booking.window,
        Window::new(d("2024-01-15"), d("2024-01-16")).unwrap()
    );

    let schedule = service
        .subject_allocations(&SubjectRef::Code(seed.subject_code.clone()))
        .await
        .unwrap();
    assert_eq!(schedule.allocations.len(), 1);
    assert!(schedule.allocations[0].resource_name.starts_with("Rig-1-"));

    let overlapping = service
        .auto_allocate(&request(&seed, "2024-01-16", 1))
        .await
        .unwrap();
    assert_eq!(overlapping, AllocationOutcome::NoCandidate);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "needs DATABASE_URL"]
async fn concurrent_requests_never_double_book() {
    let seed = seeded(&["Rig-1"]).await;
    let service = Arc::new(AllocationService::new(seed.store.clone(), fast_allocator()));

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let service = service.clone();
            let req = request(&seed, "2024-01-15", 1);
            tokio::spawn(async move { service.auto_allocate(&req).await })
        })
        .collect();

    let mut allocated = 0;
    for handle in handles {
        if let Ok(outcome) = handle.await.unwrap()
            && outcome.booking().is_some()
        {
            allocated += 1;
        }
    }
    assert_eq!(allocated, 1);

    let conflicts = service.detect_conflicts().await.unwrap();
    assert!(conflicts.is_empty(), "{conflicts:?}");
}
