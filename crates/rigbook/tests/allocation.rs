//! End-to-end booking scenarios against the in-memory store.
//!
//! These drive `AllocationService` the way the tool layer does and check
//! the committed rows directly, including under heavy contention.

mod common;

use common::{d, lab, lab_with, request, rig, service, vehicle};
use futures::future::join_all;
use rigbook::domain::{AllocationStatus, NewAllocation};
use rigbook::prelude::*;
use rigbook::schedule::{Window, detect_conflicts};
use std::time::Duration;

fn booked(store: &MemoryStore, resource_id: i64, start: &str, end: &str) {
    store.add_allocation(
        NewAllocation {
            resource_id,
            subject_id: 99,
            test_type: "brake".into(),
            window: Window::new(d(start), d(end)).unwrap(),
        },
        AllocationStatus::Scheduled,
    );
}

// ── Single requests ─────────────────────────────────────────────────

#[tokio::test]
async fn compatible_free_rig_is_booked() {
    let store = lab();
    let service = service(&store);

    let outcome = service
        .auto_allocate(&request("V1", "2024-01-15", 1))
        .await
        .unwrap();

    let booking = outcome.booking().expect("should allocate");
    assert_eq!(booking.resource.name, "Rig-1");
    assert_eq!(booking.window, Window::new(d("2024-01-15"), d("2024-01-15")).unwrap());
    assert!(!booking.used_backup);
    assert_eq!(booking.message(), "Allocated in requested window.");

    let rows = store.allocations();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, AllocationStatus::Scheduled);
    assert_eq!(rows[0].subject_id, 1);
}

#[tokio::test]
async fn overlapping_request_without_backup_finds_nothing() {
    let store = lab();
    booked(&store, 1, "2024-01-15", "2024-01-16");
    let service = service(&store);

    let outcome = service
        .auto_allocate(&request("V1", "2024-01-16", 2))
        .await
        .unwrap();

    assert_eq!(outcome, AllocationOutcome::NoCandidate);
    assert_eq!(store.allocations().len(), 1);
}

#[tokio::test]
async fn backup_window_keeps_duration_and_moves_forward() {
    let store = lab();
    booked(&store, 1, "2024-01-15", "2024-01-16");
    let service = service(&store);

    let mut req = request("V1", "2024-01-15", 2);
    req.backup = true;
    let outcome = service.auto_allocate(&req).await.unwrap();

    let booking = outcome.booking().expect("backup should allocate");
    assert!(booking.used_backup);
    assert_eq!(booking.shift_days, 2);
    assert_eq!(booking.window.start(), d("2024-01-17"));
    assert_eq!(booking.window.days(), 2);
    assert_eq!(booking.message(), "Allocated with backup shift of 2 day(s).");
}

#[tokio::test]
async fn backup_respects_the_shift_limit() {
    let store = lab();
    booked(&store, 1, "2024-01-15", "2024-01-20");
    let service = service(&store);

    let mut req = request("V1", "2024-01-15", 1);
    req.backup = true;
    req.max_backup_days = Some(3);
    let outcome = service.auto_allocate(&req).await.unwrap();

    assert_eq!(outcome, AllocationOutcome::NoCandidate);
}

#[tokio::test]
async fn cancelled_bookings_do_not_block() {
    let store = lab();
    store.add_allocation(
        NewAllocation {
            resource_id: 1,
            subject_id: 99,
            test_type: "brake".into(),
            window: Window::new(d("2024-01-15"), d("2024-01-15")).unwrap(),
        },
        AllocationStatus::Cancelled,
    );
    let service = service(&store);

    let outcome = service
        .auto_allocate(&request("V1", "2024-01-15", 1))
        .await
        .unwrap();
    assert!(outcome.booking().is_some());
}

#[tokio::test]
async fn disabled_and_unavailable_rigs_are_skipped() {
    let store = lab();
    store.set_resource_enabled(1, false);
    let mut closed = rig(2, "Rig-2");
    closed.available_to = Some(d("2024-01-10"));
    store.add_resource(closed);
    let service = service(&store);

    let found = service
        .find_available(
            &SubjectRef::parse("V1"),
            Window::for_request(d("2024-01-15"), d("2024-01-16")).unwrap(),
            "brake",
        )
        .await
        .unwrap();
    assert!(found.is_empty());

    let outcome = service
        .auto_allocate(&request("V1", "2024-01-15", 1))
        .await
        .unwrap();
    assert_eq!(outcome, AllocationOutcome::NoCandidate);
}

#[tokio::test]
async fn heavy_subject_needs_a_heavy_rig() {
    let store = lab();
    store.add_subject(vehicle(2, "TRUCK-7", 14_500, "AWD"));
    let mut heavy = rig(3, "Rig-H");
    heavy.capabilities.weight_classes = vec![">10K".into()];
    store.add_resource(heavy);
    let service = service(&store);

    let outcome = service
        .auto_allocate(&request("TRUCK-7", "2024-01-15", 1))
        .await
        .unwrap();
    assert_eq!(outcome.booking().unwrap().resource.name, "Rig-H");
}

#[tokio::test]
async fn candidate_search_is_read_only() {
    let store = lab();
    store.add_resource(rig(2, "Rig-0"));
    let service = service(&store);
    let window = Window::for_request(d("2024-01-15"), d("2024-01-17")).unwrap();

    let first = service
        .find_available(&SubjectRef::Id(1), window, "brake")
        .await
        .unwrap();
    let second = service
        .find_available(&SubjectRef::Id(1), window, "brake")
        .await
        .unwrap();

    assert_eq!(first, second);
    let names: Vec<_> = first.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["Rig-0", "Rig-1"]);
    assert!(store.allocations().is_empty());
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_any_write() {
    let store = lab();
    let service = service(&store);

    for days in [0, 31] {
        let err = service
            .auto_allocate(&request("V1", "2024-01-15", days))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)), "{days}: {err}");
    }

    let err = service
        .auto_allocate(&request("NOPE", "2024-01-15", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
    assert!(store.allocations().is_empty());
}

#[tokio::test]
async fn only_scheduled_allocations_cancel() {
    let store = lab();
    let service = service(&store);
    let booking = service
        .auto_allocate(&request("V1", "2024-01-15", 1))
        .await
        .unwrap();
    let id = booking.booking().unwrap().allocation.id;

    let cancelled = service.cancel_allocation(id).await.unwrap();
    assert_eq!(cancelled.status, AllocationStatus::Cancelled);

    let again = service.cancel_allocation(id).await.unwrap_err();
    assert!(matches!(again, ServiceError::Validation(_)));
    let missing = service.cancel_allocation(9_999).await.unwrap_err();
    assert!(matches!(missing, ServiceError::NotFound(_)));
}

// ── Contention ──────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fifty_concurrent_requests_book_exactly_once() {
    let store = lab_with(MemoryStore::with_timing(
        Duration::from_secs(5),
        Duration::from_millis(2),
    ));
    let service = service(&store);

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .auto_allocate(&request("V1", "2024-01-15", 1))
                    .await
            })
        })
        .collect();

    let outcomes: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();
    let allocated = outcomes.iter().filter(|o| o.booking().is_some()).count();
    let empty = outcomes
        .iter()
        .filter(|o| **o == AllocationOutcome::NoCandidate)
        .count();

    assert_eq!(allocated, 1);
    assert_eq!(empty, 49);
    assert_eq!(store.allocations().len(), 1);
    assert!(service.detect_conflicts().await.unwrap().is_empty());
    assert!(detect_conflicts(&store.allocations()).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn contention_spreads_across_rigs() {
    let store = lab_with(MemoryStore::with_timing(
        Duration::from_secs(5),
        Duration::from_millis(1),
    ));
    store.add_resource(rig(2, "Rig-2"));
    store.add_resource(rig(3, "Rig-3"));
    let service = service(&store);

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .auto_allocate(&request("V1", "2024-02-01", 3))
                    .await
            })
        })
        .collect();

    let mut allocated = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().booking().is_some() {
            allocated += 1;
        }
    }

    assert_eq!(allocated, 3);
    assert!(service.detect_conflicts().await.unwrap().is_empty());
}

#[tokio::test]
async fn transient_begin_failures_are_retried() {
    let store = lab();
    store.fail_next_begins(1);
    let service = service(&store);

    let outcome = service
        .auto_allocate(&request("V1", "2024-01-15", 1))
        .await
        .unwrap();
    assert!(outcome.booking().is_some());
    assert_eq!(store.begin_calls(), 2);
}
