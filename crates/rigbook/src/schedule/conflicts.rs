//! System-wide double-booking scan.
//!
//! Should always come back empty; a non-empty result means something wrote
//! allocations without going through the allocator.

use crate::domain::{Allocation, ResourceId};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Conflict {
    pub resource_id: ResourceId,
    pub first: Allocation,
    pub second: Allocation,
}

/// Every pair of active allocations on the same resource whose windows
/// overlap. Sweeps each resource's rows in start order, so the cost is
/// `O(n log n + k)` for `k` conflicts.
pub fn detect_conflicts(allocations: &[Allocation]) -> Vec<Conflict> {
    let mut by_resource: BTreeMap<ResourceId, Vec<&Allocation>> = BTreeMap::new();
    for allocation in allocations.iter().filter(|a| a.is_active()) {
        by_resource
            .entry(allocation.resource_id)
            .or_default()
            .push(allocation);
    }

    let mut conflicts = Vec::new();
    for (resource_id, mut rows) in by_resource {
        rows.sort_by_key(|a| (a.window.start(), a.window.end(), a.id));
        for (i, first) in rows.iter().enumerate() {
            // Sorted by start: the first later row that does not overlap
            // starts after `first` ends, and so does everything after it.
            for second in rows.iter().skip(i + 1) {
                if !first.window.overlaps(&second.window) {
                    break;
                }
                conflicts.push(Conflict {
                    resource_id,
                    first: (*first).clone(),
                    second: (*second).clone(),
                });
            }
        }
    }
    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AllocationStatus;
    use crate::schedule::window::Window;
    use chrono::{NaiveDate, Utc};

    fn alloc(id: i64, resource_id: i64, start: &str, end: &str, status: AllocationStatus) -> Allocation {
        Allocation {
            id,
            resource_id,
            subject_id: id * 10,
            test_type: "brake".into(),
            window: Window::new(
                start.parse::<NaiveDate>().unwrap(),
                end.parse::<NaiveDate>().unwrap(),
            )
            .unwrap(),
            status,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn clean_schedule_has_no_conflicts() {
        let rows = vec![
            alloc(1, 1, "2024-01-01", "2024-01-02", AllocationStatus::Scheduled),
            alloc(2, 1, "2024-01-03", "2024-01-04", AllocationStatus::Completed),
            alloc(3, 2, "2024-01-01", "2024-01-04", AllocationStatus::Scheduled),
        ];
        assert!(detect_conflicts(&rows).is_empty());
    }

    #[test]
    fn touching_windows_conflict() {
        let rows = vec![
            alloc(1, 1, "2024-01-01", "2024-01-02", AllocationStatus::Scheduled),
            alloc(2, 1, "2024-01-02", "2024-01-05", AllocationStatus::Scheduled),
        ];
        let found = detect_conflicts(&rows);
        assert_eq!(found.len(), 1);
        assert_eq!((found[0].first.id, found[0].second.id), (1, 2));
    }

    #[test]
    fn cancelled_rows_are_ignored() {
        let rows = vec![
            alloc(1, 1, "2024-01-01", "2024-01-05", AllocationStatus::Scheduled),
            alloc(2, 1, "2024-01-02", "2024-01-03", AllocationStatus::Cancelled),
        ];
        assert!(detect_conflicts(&rows).is_empty());
    }

    #[test]
    fn long_booking_conflicts_with_every_contained_one() {
        let rows = vec![
            alloc(4, 1, "2024-01-08", "2024-01-09", AllocationStatus::Scheduled),
            alloc(1, 1, "2024-01-01", "2024-01-31", AllocationStatus::Scheduled),
            alloc(2, 1, "2024-01-02", "2024-01-03", AllocationStatus::Scheduled),
            alloc(3, 2, "2024-01-02", "2024-01-03", AllocationStatus::Scheduled),
        ];
        let pairs: Vec<(i64, i64)> = detect_conflicts(&rows)
            .iter()
            .map(|c| (c.first.id, c.second.id))
            .collect();
        assert_eq!(pairs, vec![(1, 2), (1, 4)]);
    }
}
